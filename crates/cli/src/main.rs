use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;
use streamsnap_core::config::{Settings, load_settings, validate_settings};
use streamsnap_core::model::Placement;
use streamsnap_core::report::{
    render_backup_plan, render_outcomes, render_restore_plan, render_stream_outcome,
};
use streamsnap_core::run_log::{RunKind, start_run_log};
use streamsnap_core::{
    APP_NAME, AccountBackupConfig, AccountBackupOptions, AccountRestoreConfig,
    AccountRestoreOptions, BackupStatus, Confirm, ErrorKind, HttpStreamService, ProgressSink,
    RunEvent, run_account_backup_with, run_account_restore_with,
};

#[derive(Parser)]
#[command(name = "streamsnap")]
#[command(about = "Account-wide stream backup and restore", long_about = None)]
struct Cli {
    /// Print the final result (and errors) as JSON.
    #[arg(long)]
    json: bool,

    /// Stream run events to stdout as NDJSON.
    #[arg(long)]
    events: bool,

    #[arg(long)]
    config_dir: Option<PathBuf>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Management API base URL; overrides `service.url`.
    #[arg(long)]
    server: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Creates a backup of every stream on the account
    #[command(alias = "snapshot")]
    Backup {
        /// Directory the per-stream backups are written into
        target: PathBuf,

        /// Checks the stream for health prior to backup
        #[arg(long)]
        check: bool,

        /// Include consumer configuration and state
        #[arg(long, num_args = 0..=1, require_equals = true, default_missing_value = "true")]
        consumers: Option<bool>,

        /// Perform backup without prompting
        #[arg(long, short = 'f')]
        force: bool,

        /// Treat warnings as failures
        #[arg(long, short = 'w')]
        critical_warnings: bool,
    },
    /// Restores every stream backed up into a directory
    Restore {
        /// Directory holding the per-stream backups
        #[arg(value_parser = existing_dir)]
        directory: PathBuf,

        /// Place restored streams in a specific cluster
        #[arg(long)]
        cluster: Option<String>,

        /// Place restored streams on servers with this tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
}

fn existing_dir(s: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(s);
    if path.is_dir() {
        Ok(path)
    } else {
        Err(format!("{s:?} is not an existing directory"))
    }
}

#[derive(Debug, Serialize)]
struct CliError {
    code: &'static str,
    message: String,
    details: serde_json::Value,
    retryable: bool,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: false,
        }
    }

    fn retryable(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: true,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Terminal prompt. Fails when there is no terminal to ask.
struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str, default: bool) -> streamsnap_core::Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(default)
            .interact()
            .map_err(|e| streamsnap_core::Error::Confirmation {
                message: e.to_string(),
            })
    }
}

struct TextProgressSink;

impl ProgressSink for TextProgressSink {
    fn on_event(&self, event: &RunEvent) {
        match event {
            RunEvent::BackupPlanned { plan } => println!("{}", render_backup_plan(plan)),
            RunEvent::StreamStarted { .. } => {}
            RunEvent::StreamFinished { outcome } => {
                if let Some(line) = render_stream_outcome(outcome) {
                    println!("{line}");
                }
            }
            RunEvent::BackupSummary { outcomes, .. } => {
                let text = render_outcomes(outcomes);
                if !text.is_empty() {
                    print!("\n{text}");
                }
            }
            RunEvent::RestorePlanned { plan } => println!("{}", render_restore_plan(plan)),
            RunEvent::StreamRestored {
                stream,
                messages,
                consumers,
            } => println!(
                "Restored stream {stream:?} with {messages} messages and {consumers} consumers"
            ),
        }
    }
}

struct NdjsonProgressSink {
    run_id: String,
}

impl ProgressSink for NdjsonProgressSink {
    fn on_event(&self, event: &RunEvent) {
        let Ok(mut line) = serde_json::to_value(event) else {
            return;
        };
        if let Some(obj) = line.as_object_mut() {
            obj.insert("runId".to_string(), self.run_id.clone().into());
        }
        println!("{line}");
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            emit_error(&e, json);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_dir = cli
        .config_dir
        .or_else(|| {
            std::env::var("STREAMSNAP_CONFIG_DIR")
                .ok()
                .map(PathBuf::from)
        })
        .unwrap_or_else(default_config_dir);
    let data_dir = cli
        .data_dir
        .or_else(|| std::env::var("STREAMSNAP_DATA_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(default_data_dir);

    let mut settings = load_settings(&config_dir).map_err(map_core_err)?;
    if let Some(server) = cli.server {
        settings.service.url = server;
        validate_settings(&settings).map_err(map_core_err)?;
    }

    let output = Output {
        json: cli.json,
        events: cli.events,
    };

    match cli.cmd {
        Command::Backup {
            target,
            check,
            consumers,
            force,
            critical_warnings,
        } => {
            let config = AccountBackupConfig {
                target_dir: target,
                include_consumers: consumers.unwrap_or(settings.backup.consumers),
                check_health: check || settings.backup.check,
                force,
                fail_on_warning: critical_warnings || settings.backup.critical_warnings,
            };
            backup_run(&settings, &data_dir, config, output).await
        }
        Command::Restore {
            directory,
            cluster,
            tags,
        } => {
            let defaults = settings.restore.placement();
            let placement = Placement::new(
                cluster.or(defaults.cluster),
                if tags.is_empty() { defaults.tags } else { tags },
            );
            let config = AccountRestoreConfig {
                source_dir: directory,
                placement,
            };
            restore_run(&settings, &data_dir, config, output).await
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Output {
    json: bool,
    events: bool,
}

impl Output {
    fn sink<'a>(
        &self,
        text: &'a TextProgressSink,
        ndjson: &'a NdjsonProgressSink,
    ) -> Option<&'a dyn ProgressSink> {
        if self.events {
            Some(ndjson)
        } else if self.json {
            None
        } else {
            Some(text)
        }
    }
}

async fn backup_run(
    settings: &Settings,
    data_dir: &Path,
    config: AccountBackupConfig,
    output: Output,
) -> Result<(), CliError> {
    let service = connect(settings)?;

    let run_id = format!("run_{}", uuid::Uuid::new_v4());
    let _log = start_run_log(RunKind::Backup, &run_id, data_dir)
        .map_err(|e| CliError::new("io", format!("run log: {e}")))?;
    tracing::info!(
        event = "run.start",
        run_id = %run_id,
        kind = "backup",
        target = %config.target_dir.display(),
        "run.start"
    );

    let text = TextProgressSink;
    let ndjson = NdjsonProgressSink {
        run_id: run_id.clone(),
    };
    let opts = AccountBackupOptions {
        progress: output.sink(&text, &ndjson),
    };

    let res = run_account_backup_with(&service, &TerminalConfirm, config, opts)
        .await
        .map_err(map_core_err)?;

    if output.json && !output.events {
        println!(
            "{}",
            serde_json::to_string(&res).map_err(|e| CliError::new("io", e.to_string()))?
        );
    } else if !output.events {
        match res.status {
            BackupStatus::Declined => println!("Backup cancelled"),
            BackupStatus::Completed => println!(
                "Backed up {} streams to {}",
                res.outcomes.succeeded,
                res.plan.target.display()
            ),
        }
    }
    Ok(())
}

async fn restore_run(
    settings: &Settings,
    data_dir: &Path,
    config: AccountRestoreConfig,
    output: Output,
) -> Result<(), CliError> {
    let service = connect(settings)?;

    let run_id = format!("run_{}", uuid::Uuid::new_v4());
    let _log = start_run_log(RunKind::Restore, &run_id, data_dir)
        .map_err(|e| CliError::new("io", format!("run log: {e}")))?;
    tracing::info!(
        event = "run.start",
        run_id = %run_id,
        kind = "restore",
        source = %config.source_dir.display(),
        "run.start"
    );

    let text = TextProgressSink;
    let ndjson = NdjsonProgressSink {
        run_id: run_id.clone(),
    };
    let opts = AccountRestoreOptions {
        progress: output.sink(&text, &ndjson),
    };

    let res = run_account_restore_with(&service, config, opts)
        .await
        .map_err(map_core_err)?;

    if output.json && !output.events {
        println!(
            "{}",
            serde_json::to_string(&res).map_err(|e| CliError::new("io", e.to_string()))?
        );
    }
    Ok(())
}

fn connect(settings: &Settings) -> Result<HttpStreamService, CliError> {
    let config = settings.service.http_config().map_err(map_core_err)?;
    HttpStreamService::new(config).map_err(map_core_err)
}

fn default_config_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join(APP_NAME)
}

fn default_data_dir() -> PathBuf {
    default_config_dir()
}

fn map_core_err(e: streamsnap_core::Error) -> CliError {
    let message = e.to_string();
    match e {
        streamsnap_core::Error::BackupFailed { failures, warnings } => {
            CliError::new("backup.failed", message).with_details(serde_json::json!({
                "failures": failures,
                "warnings": warnings,
            }))
        }
        streamsnap_core::Error::RestoreFailed { stream, source } => {
            CliError::new("restore.failed", message).with_details(serde_json::json!({
                "stream": stream,
                "cause": source.to_string(),
            }))
        }
        streamsnap_core::Error::StreamExists { stream } => {
            CliError::new("restore.stream_exists", message)
                .with_details(serde_json::json!({ "stream": stream }))
        }
        other => match other.kind() {
            ErrorKind::Config => CliError::new("config.invalid", message),
            ErrorKind::Io => CliError::new("io", message),
            ErrorKind::Service | ErrorKind::NotFound | ErrorKind::Unhealthy => {
                CliError::retryable("service.unavailable", message)
            }
            ErrorKind::NoStreams => CliError::new("streams.none", message),
            ErrorKind::Confirmation => CliError::new("confirm.failed", message),
            ErrorKind::InvalidSource => CliError::new("restore.invalid_source", message),
            ErrorKind::Integrity => CliError::new("integrity", message),
            ErrorKind::Exists => CliError::new("restore.stream_exists", message),
            ErrorKind::UnsupportedStorage | ErrorKind::BackupFailed => {
                CliError::new("backup.failed", message)
            }
            ErrorKind::RestoreFailed => CliError::new("restore.failed", message),
        },
    }
}

fn emit_error(e: &CliError, json: bool) {
    if !json {
        let _ = writeln!(std::io::stderr(), "error: {}", e.message);
        return;
    }
    let json = serde_json::to_string(e).unwrap_or_else(|_| "{\"code\":\"unknown\",\"message\":\"json encode failed\",\"details\":{},\"retryable\":false}".to_string());
    let _ = writeln!(std::io::stderr(), "{json}");
}
