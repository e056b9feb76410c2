use std::collections::BTreeSet;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{
    ConsumerSnapshot, Placement, StorageType, StoredMessage, StreamConfig, StreamInfo,
    StreamSnapshot, StreamState,
};
use crate::service::{SnapshotRequest, StreamHandle, StreamService};
use crate::{Error, Result};

pub const MANIFEST_FILE: &str = "backup.json";
pub const MESSAGES_FILE: &str = "stream.ndjson.zst";
pub const CONSUMERS_FILE: &str = "consumers.json";
pub const MANIFEST_VERSION: u32 = 1;

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub version: u32,
    pub stream: String,
    pub created_at: String,
    pub config: StreamConfig,
    pub state: StreamState,
    pub consumers_included: bool,
    pub health_checked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_filters: Option<Vec<String>>,
    pub files: Vec<ManifestFile>,
}

impl BackupManifest {
    pub fn file(&self, name: &str) -> Option<&ManifestFile> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn payload_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub name: String,
    pub size: u64,
    pub hash: String,
}

#[derive(Debug, Clone, Copy)]
pub struct BackupStreamOptions {
    pub check_health: bool,
    pub include_consumers: bool,
    pub include_subject_filters: bool,
}

impl Default for BackupStreamOptions {
    fn default() -> Self {
        Self {
            check_health: false,
            include_consumers: true,
            include_subject_filters: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub stream: String,
    pub path: PathBuf,
    pub messages: u64,
    pub consumers: usize,
    pub bytes_written: u64,
}

pub async fn backup_stream<S: StreamService + ?Sized>(
    handle: &StreamHandle<'_, S>,
    options: BackupStreamOptions,
    target_dir: &Path,
) -> Result<ArtifactSummary> {
    let stream = handle.name().to_string();
    if handle.config().storage == StorageType::Memory {
        return Err(Error::UnsupportedStorage {
            stream,
            storage: StorageType::Memory,
        });
    }

    // A manifest from an earlier run must not survive a failed re-run.
    let existed = target_dir.exists();
    if existed {
        remove_stale_manifest(target_dir)?;
    }

    let started = Instant::now();
    let snapshot = handle
        .service()
        .snapshot_stream(
            &stream,
            SnapshotRequest {
                check_health: options.check_health,
                include_consumers: options.include_consumers,
            },
        )
        .await?;

    match write_artifact(&snapshot, options, target_dir) {
        Ok(summary) => {
            debug!(
                event = "artifact.written",
                stream = %stream,
                path = %target_dir.display(),
                messages = summary.messages,
                consumers = summary.consumers,
                bytes_written = summary.bytes_written,
                duration_ms = started.elapsed().as_millis() as u64,
                "artifact.written"
            );
            Ok(summary)
        }
        Err(e) => {
            if !existed && let Err(cleanup) = fs::remove_dir_all(target_dir) {
                warn!(
                    event = "artifact.cleanup_failed",
                    stream = %stream,
                    path = %target_dir.display(),
                    error = %cleanup,
                    "artifact.cleanup_failed"
                );
            }
            Err(e)
        }
    }
}

fn write_artifact(
    snapshot: &StreamSnapshot,
    options: BackupStreamOptions,
    dir: &Path,
) -> Result<ArtifactSummary> {
    fs::create_dir_all(dir)?;
    remove_stale_manifest(dir)?;
    let manifest_path = dir.join(MANIFEST_FILE);

    let mut files = Vec::new();

    let mut ndjson = Vec::new();
    for msg in &snapshot.messages {
        serde_json::to_writer(&mut ndjson, msg).map_err(|e| Error::Integrity {
            message: format!("encode message {} failed: {e}", msg.seq),
        })?;
        ndjson.push(b'\n');
    }
    let compressed = zstd::stream::encode_all(ndjson.as_slice(), ZSTD_LEVEL)?;
    files.push(write_payload(dir, MESSAGES_FILE, &compressed)?);

    let consumers = if options.include_consumers {
        let json = serde_json::to_vec_pretty(&snapshot.consumers).map_err(|e| {
            Error::Integrity {
                message: format!("encode consumers failed: {e}"),
            }
        })?;
        files.push(write_payload(dir, CONSUMERS_FILE, &json)?);
        snapshot.consumers.len()
    } else {
        0
    };

    let subject_filters = options.include_subject_filters.then(|| {
        let mut set: BTreeSet<String> = snapshot.config.subjects.iter().cloned().collect();
        for c in &snapshot.consumers {
            set.extend(c.config.filter_subjects.iter().cloned());
        }
        set.into_iter().collect::<Vec<_>>()
    });

    let manifest = BackupManifest {
        version: MANIFEST_VERSION,
        stream: snapshot.config.name.clone(),
        created_at: chrono::Utc::now().to_rfc3339(),
        config: snapshot.config.clone(),
        state: snapshot.state.clone(),
        consumers_included: options.include_consumers,
        health_checked: options.check_health,
        subject_filters,
        files,
    };
    let manifest_json = serde_json::to_vec_pretty(&manifest).map_err(|e| Error::Integrity {
        message: format!("encode manifest failed: {e}"),
    })?;
    atomic_write(&manifest_path, &manifest_json)?;

    Ok(ArtifactSummary {
        stream: manifest.stream.clone(),
        path: dir.to_path_buf(),
        messages: snapshot.messages.len() as u64,
        consumers,
        bytes_written: manifest.payload_bytes() + manifest_json.len() as u64,
    })
}

fn remove_stale_manifest(dir: &Path) -> Result<()> {
    match fs::remove_file(dir.join(MANIFEST_FILE)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn write_payload(dir: &Path, name: &str, bytes: &[u8]) -> Result<ManifestFile> {
    fs::write(dir.join(name), bytes)?;
    Ok(ManifestFile {
        name: name.to_string(),
        size: bytes.len() as u64,
        hash: blake3::hash(bytes).to_hex().to_string(),
    })
}

fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(tmp, path)?;
    Ok(())
}

pub fn load_manifest(dir: &Path) -> Result<BackupManifest> {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(Error::MissingManifest {
            path: dir.to_path_buf(),
        });
    }

    let invalid = |message: String| Error::InvalidManifest {
        path: dir.to_path_buf(),
        message,
    };

    let bytes = fs::read(&path)?;
    let manifest: BackupManifest =
        serde_json::from_slice(&bytes).map_err(|e| invalid(format!("invalid json: {e}")))?;

    if manifest.version != MANIFEST_VERSION {
        return Err(invalid(format!(
            "unsupported manifest version: {}",
            manifest.version
        )));
    }
    if manifest.stream != manifest.config.name {
        return Err(invalid(format!(
            "stream {:?} does not match config name {:?}",
            manifest.stream, manifest.config.name
        )));
    }
    if let Some(dir_name) = dir.file_name().and_then(|n| n.to_str())
        && dir_name != manifest.stream
    {
        return Err(invalid(format!(
            "directory {dir_name:?} holds a backup of stream {:?}",
            manifest.stream
        )));
    }
    if manifest.file(MESSAGES_FILE).is_none() {
        return Err(invalid(format!("{MESSAGES_FILE} is not listed")));
    }
    if manifest.consumers_included && manifest.file(CONSUMERS_FILE).is_none() {
        return Err(invalid(format!("{CONSUMERS_FILE} is not listed")));
    }

    Ok(manifest)
}

#[derive(Debug, Clone)]
pub struct StreamRestorer {
    dir: PathBuf,
    placement: Placement,
}

impl StreamRestorer {
    pub fn new(dir: impl Into<PathBuf>, placement: Placement) -> Self {
        Self {
            dir: dir.into(),
            placement,
        }
    }

    pub fn load_snapshot(&self) -> Result<StreamSnapshot> {
        let manifest = load_manifest(&self.dir)?;
        for file in &manifest.files {
            verify_file(&self.dir, file)?;
        }

        let compressed = fs::read(self.dir.join(MESSAGES_FILE))?;
        let ndjson = zstd::stream::decode_all(compressed.as_slice())?;
        let mut messages = Vec::new();
        for (no, line) in BufReader::new(ndjson.as_slice()).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let msg: StoredMessage = serde_json::from_str(&line).map_err(|e| Error::Integrity {
                message: format!("{MESSAGES_FILE} line {}: {e}", no + 1),
            })?;
            messages.push(msg);
        }

        let consumers: Vec<ConsumerSnapshot> = if manifest.consumers_included {
            let bytes = fs::read(self.dir.join(CONSUMERS_FILE))?;
            serde_json::from_slice(&bytes).map_err(|e| Error::Integrity {
                message: format!("{CONSUMERS_FILE}: {e}"),
            })?
        } else {
            Vec::new()
        };

        let mut config = manifest.config;
        if !self.placement.is_empty() {
            config.placement = Some(self.placement.clone());
        }

        Ok(StreamSnapshot {
            config,
            state: manifest.state,
            messages,
            consumers,
        })
    }

    pub async fn restore<S: StreamService + ?Sized>(&self, service: &S) -> Result<StreamInfo> {
        let snapshot = self.load_snapshot()?;
        let stream = snapshot.config.name.clone();

        let existing = service.stream_names(None).await?;
        if existing.iter().any(|n| *n == stream) {
            return Err(Error::StreamExists { stream });
        }

        debug!(
            event = "artifact.restore",
            stream = %stream,
            path = %self.dir.display(),
            messages = snapshot.messages.len() as u64,
            consumers = snapshot.consumers.len() as u64,
            placement_cluster = snapshot
                .config
                .placement
                .as_ref()
                .and_then(|p| p.cluster.as_deref())
                .unwrap_or(""),
            "artifact.restore"
        );
        service.restore_stream(snapshot).await
    }
}

fn verify_file(dir: &Path, file: &ManifestFile) -> Result<()> {
    let path = dir.join(&file.name);
    let bytes = fs::read(&path).map_err(|e| Error::Integrity {
        message: format!("read {} failed: {e}", path.display()),
    })?;
    if bytes.len() as u64 != file.size {
        return Err(Error::Integrity {
            message: format!(
                "size mismatch: path={} expected={} got={}",
                path.display(),
                file.size,
                bytes.len()
            ),
        });
    }
    let hash = blake3::hash(&bytes).to_hex().to_string();
    if hash != file.hash {
        return Err(Error::Integrity {
            message: format!("hash mismatch: path={}", path.display()),
        });
    }
    Ok(())
}
