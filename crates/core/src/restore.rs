use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::artifact::{BackupManifest, StreamRestorer, load_manifest};
use crate::model::{Placement, StreamInfo};
use crate::progress::{ProgressSink, RestorePlan, RunEvent};
use crate::service::StreamService;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct AccountRestoreConfig {
    pub source_dir: PathBuf,
    pub placement: Placement,
}

#[derive(Default)]
pub struct AccountRestoreOptions<'a> {
    pub progress: Option<&'a dyn ProgressSink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRestoreResult {
    pub plan: RestorePlan,
    pub restored: Vec<StreamInfo>,
}

#[derive(Debug, Clone)]
pub struct ValidatedArtifact {
    pub stream: String,
    pub dir: PathBuf,
    pub manifest: BackupManifest,
}

pub async fn run_account_restore<S: StreamService + ?Sized>(
    service: &S,
    config: AccountRestoreConfig,
) -> Result<AccountRestoreResult> {
    run_account_restore_with(service, config, AccountRestoreOptions::default()).await
}

pub async fn run_account_restore_with<S: StreamService + ?Sized>(
    service: &S,
    config: AccountRestoreConfig,
    options: AccountRestoreOptions<'_>,
) -> Result<AccountRestoreResult> {
    let started = Instant::now();
    let emit = |event: RunEvent| {
        if let Some(sink) = options.progress {
            sink.on_event(&event);
        }
    };

    let existing: HashSet<String> = service.stream_names(None).await?.into_iter().collect();
    let artifacts = validate_source(&config.source_dir, &existing)?;

    let plan = RestorePlan {
        source: config.source_dir.clone(),
        streams: artifacts.iter().map(|a| a.stream.clone()).collect(),
        total_bytes: artifacts.iter().map(|a| a.manifest.payload_bytes()).sum(),
    };
    info!(
        event = "restore.plan",
        provider = service.provider(),
        source = %config.source_dir.display(),
        streams = plan.streams.len(),
        total_bytes = plan.total_bytes,
        placement_cluster = config.placement.cluster.as_deref().unwrap_or(""),
        placement_tags = config.placement.tags.len(),
        "restore.plan"
    );
    if artifacts.is_empty() {
        warn!(event = "restore.empty", source = %config.source_dir.display(), "restore.empty");
    }
    emit(RunEvent::RestorePlanned { plan: plan.clone() });

    let mut restored = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let stream_started = Instant::now();
        let restorer = StreamRestorer::new(&artifact.dir, config.placement.clone());
        let info = match restorer.restore(service).await {
            Ok(info) => info,
            Err(e) => {
                error!(
                    event = "restore.stream.finish",
                    stream = %artifact.stream,
                    status = "failure",
                    error = %e,
                    "restore.stream.finish"
                );
                return Err(Error::RestoreFailed {
                    stream: artifact.stream,
                    source: Box::new(e),
                });
            }
        };
        info!(
            event = "restore.stream.finish",
            stream = %artifact.stream,
            status = "success",
            messages = info.state.messages,
            consumers = info.state.consumer_count,
            duration_ms = stream_started.elapsed().as_millis() as u64,
            "restore.stream.finish"
        );
        emit(RunEvent::StreamRestored {
            stream: artifact.stream,
            messages: info.state.messages,
            consumers: info.state.consumer_count,
        });
        restored.push(info);
    }

    info!(
        event = "restore.finish",
        restored = restored.len(),
        duration_ms = started.elapsed().as_millis() as u64,
        "restore.finish"
    );
    Ok(AccountRestoreResult { plan, restored })
}

pub fn validate_source(
    source: &Path,
    existing: &HashSet<String>,
) -> Result<Vec<ValidatedArtifact>> {
    if !source.is_dir() {
        return Err(Error::NotADirectory {
            path: source.to_path_buf(),
        });
    }

    let mut entries = fs::read_dir(source)?.collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut artifacts = Vec::with_capacity(entries.len());
    for entry in entries {
        let path = entry.path();
        if !entry.file_type()?.is_dir() {
            return Err(Error::NotADirectory { path });
        }

        let stream = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => return Err(Error::NonUtf8Path { path }),
        };
        if existing.contains(&stream) {
            return Err(Error::StreamExists { stream });
        }

        let manifest = load_manifest(&path)?;
        artifacts.push(ValidatedArtifact {
            stream,
            dir: path,
            manifest,
        });
    }

    info!(
        event = "restore.validate",
        source = %source.display(),
        artifacts = artifacts.len(),
        "restore.validate"
    );
    Ok(artifacts)
}
