use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::artifact::{ArtifactSummary, BackupStreamOptions, backup_stream};
use crate::confirm::{Confirm, confirm_unless_forced};
use crate::outcome::{Outcome, RunOutcomes};
use crate::progress::{BackupPlan, ProgressSink, RunEvent};
use crate::service::{StreamHandle, StreamService, list_stream_handles};
use crate::{Error, Result};

pub const BACKUP_PROMPT: &str = "Perform backup";

#[derive(Debug, Clone)]
pub struct AccountBackupConfig {
    pub target_dir: PathBuf,
    pub include_consumers: bool,
    pub check_health: bool,
    pub force: bool,
    pub fail_on_warning: bool,
}

impl AccountBackupConfig {
    pub fn new(target_dir: impl Into<PathBuf>) -> Self {
        Self {
            target_dir: target_dir.into(),
            include_consumers: true,
            check_health: false,
            force: false,
            fail_on_warning: false,
        }
    }
}

#[derive(Default)]
pub struct AccountBackupOptions<'a> {
    pub progress: Option<&'a dyn ProgressSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Completed,
    Declined,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountBackupResult {
    pub status: BackupStatus,
    pub plan: BackupPlan,
    pub artifacts: Vec<ArtifactSummary>,
    pub outcomes: RunOutcomes,
}

pub async fn run_account_backup<S, C>(
    service: &S,
    gate: &C,
    config: AccountBackupConfig,
) -> Result<AccountBackupResult>
where
    S: StreamService + ?Sized,
    C: Confirm + ?Sized,
{
    run_account_backup_with(service, gate, config, AccountBackupOptions::default()).await
}

pub async fn run_account_backup_with<S, C>(
    service: &S,
    gate: &C,
    config: AccountBackupConfig,
    options: AccountBackupOptions<'_>,
) -> Result<AccountBackupResult>
where
    S: StreamService + ?Sized,
    C: Confirm + ?Sized,
{
    let started = Instant::now();
    let emit = |event: RunEvent| {
        if let Some(sink) = options.progress {
            sink.on_event(&event);
        }
    };

    let mut handles = list_stream_handles(service).await?;
    if handles.is_empty() {
        return Err(Error::NoStreams);
    }

    let plan = plan_backup(&mut handles, &config.target_dir).await;
    info!(
        event = "backup.plan",
        provider = service.provider(),
        target = %config.target_dir.display(),
        streams = plan.streams,
        total_bytes = plan.total_bytes,
        total_consumers = plan.total_consumers,
        "backup.plan"
    );
    emit(RunEvent::BackupPlanned { plan: plan.clone() });

    let mut result = AccountBackupResult {
        status: BackupStatus::Declined,
        plan,
        artifacts: Vec::new(),
        outcomes: RunOutcomes::new(),
    };

    if !confirm_unless_forced(gate, config.force, BACKUP_PROMPT, false)? {
        info!(event = "backup.declined", "backup.declined");
        return Ok(result);
    }
    result.status = BackupStatus::Completed;

    create_backup_root(&config.target_dir)?;

    let stream_options = BackupStreamOptions {
        check_health: config.check_health,
        include_consumers: config.include_consumers,
        include_subject_filters: false,
    };

    for handle in &handles {
        let stream = handle.name().to_string();
        emit(RunEvent::StreamStarted {
            stream: stream.clone(),
        });
        debug!(event = "backup.stream.start", stream = %stream, "backup.stream.start");

        let stream_started = Instant::now();
        let res = backup_one(handle, stream_options, &config.target_dir).await;
        let outcome = result.outcomes.record(&stream, &res);
        let duration_ms = stream_started.elapsed().as_millis() as u64;

        match &outcome.outcome {
            Outcome::Success => info!(
                event = "backup.stream.finish",
                stream = %stream,
                duration_ms,
                status = "success",
                "backup.stream.finish"
            ),
            Outcome::Warning(reason) => warn!(
                event = "backup.stream.finish",
                stream = %stream,
                duration_ms,
                status = "warning",
                reason = %reason,
                "backup.stream.finish"
            ),
            Outcome::Failure(reason) => error!(
                event = "backup.stream.finish",
                stream = %stream,
                duration_ms,
                status = "failure",
                reason = %reason,
                "backup.stream.finish"
            ),
        }

        if let Ok(summary) = res {
            result.artifacts.push(summary);
        }
        emit(RunEvent::StreamFinished { outcome });
    }

    let failed = result.outcomes.failed(config.fail_on_warning);
    info!(
        event = "backup.finish",
        duration_ms = started.elapsed().as_millis() as u64,
        succeeded = result.outcomes.succeeded,
        warnings = result.outcomes.warnings.len(),
        failures = result.outcomes.failures.len(),
        failed,
        "backup.finish"
    );
    emit(RunEvent::BackupSummary {
        outcomes: result.outcomes.clone(),
        failed,
    });

    result.outcomes = result.outcomes.into_result(config.fail_on_warning)?;
    Ok(result)
}

async fn plan_backup<S: StreamService + ?Sized>(
    handles: &mut [StreamHandle<'_, S>],
    target: &Path,
) -> BackupPlan {
    let mut plan = BackupPlan {
        target: target.to_path_buf(),
        streams: handles.len(),
        ..BackupPlan::default()
    };
    for handle in handles.iter_mut() {
        match handle.latest_state().await {
            Ok(state) => {
                plan.total_bytes += state.bytes;
                plan.total_consumers += state.consumer_count;
            }
            Err(e) => warn!(
                event = "backup.plan.state_failed",
                stream = %handle.name(),
                error = %e,
                "backup.plan.state_failed"
            ),
        }
    }
    plan
}

async fn backup_one<S: StreamService + ?Sized>(
    handle: &StreamHandle<'_, S>,
    options: BackupStreamOptions,
    root: &Path,
) -> Result<ArtifactSummary> {
    let target = artifact_dir(root, handle.name())?;
    backup_stream(handle, options, &target).await
}

pub fn artifact_dir(root: &Path, stream: &str) -> Result<PathBuf> {
    let unsafe_name = stream.is_empty()
        || stream == "."
        || stream == ".."
        || stream.contains(['/', '\\', '\0']);
    if unsafe_name {
        return Err(Error::InvalidConfig {
            message: format!("stream name {stream:?} is not usable as a directory name"),
        });
    }
    Ok(root.join(stream))
}

fn create_backup_root(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(path)?;
    }
    #[cfg(not(unix))]
    fs::create_dir_all(path)?;
    Ok(())
}
