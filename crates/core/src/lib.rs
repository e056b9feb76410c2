mod artifact;
mod backup;
pub mod config;
mod confirm;
mod error;
pub mod model;
mod outcome;
mod progress;
pub mod report;
mod restore;
pub mod run_log;
pub mod service;

pub const APP_NAME: &str = "streamsnap";

pub use artifact::{
    ArtifactSummary, BackupManifest, BackupStreamOptions, CONSUMERS_FILE, MANIFEST_FILE,
    MESSAGES_FILE, ManifestFile, StreamRestorer, backup_stream, load_manifest,
};
pub use backup::{
    AccountBackupConfig, AccountBackupOptions, AccountBackupResult, BACKUP_PROMPT, BackupStatus,
    artifact_dir, run_account_backup, run_account_backup_with,
};
pub use confirm::{AssumeNo, AssumeYes, Confirm, confirm_unless_forced};
pub use error::{Error, ErrorKind, Result};
pub use outcome::{Outcome, RunOutcomes, StreamOutcome};
pub use progress::{BackupPlan, ProgressSink, RestorePlan, RunEvent};
pub use restore::{
    AccountRestoreConfig, AccountRestoreOptions, AccountRestoreResult, ValidatedArtifact,
    run_account_restore, run_account_restore_with, validate_source,
};
pub use service::http::{HttpStreamService, HttpStreamServiceConfig};
pub use service::{InMemoryService, SnapshotRequest, StreamHandle, StreamService};
