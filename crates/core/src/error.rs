use std::path::PathBuf;

use crate::model::StorageType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("service error: {message}")]
    Service { message: String },

    #[error("stream {stream:?} not found")]
    StreamNotFound { stream: String },

    #[error("stream {stream:?} exists already")]
    StreamExists { stream: String },

    #[error("stream {stream:?} failed health check: {message}")]
    Unhealthy { stream: String, message: String },

    #[error("{storage} storage streams can not be backed up")]
    UnsupportedStorage { stream: String, storage: StorageType },

    #[error("no streams found")]
    NoStreams,

    #[error("confirmation failed: {message}")]
    Confirmation { message: String },

    #[error("expected a directory: {path:?}")]
    NotADirectory { path: PathBuf },

    #[error("expected backup.json in {path:?}")]
    MissingManifest { path: PathBuf },

    #[error("invalid backup.json in {path:?}: {message}")]
    InvalidManifest { path: PathBuf, message: String },

    #[error("integrity error: {message}")]
    Integrity { message: String },

    #[error("backup failed: {failures} failures, {warnings} warnings")]
    BackupFailed { failures: usize, warnings: usize },

    #[error("restore for {stream} failed: {source}")]
    RestoreFailed {
        stream: String,
        #[source]
        source: Box<Error>,
    },

    #[error("unsupported path (must be UTF-8): {path:?}")]
    NonUtf8Path { path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Io,
    Service,
    NotFound,
    Exists,
    Unhealthy,
    UnsupportedStorage,
    NoStreams,
    Confirmation,
    InvalidSource,
    Integrity,
    BackupFailed,
    RestoreFailed,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConfig { .. } | Error::NonUtf8Path { .. } => ErrorKind::Config,
            Error::Io(_) => ErrorKind::Io,
            Error::Service { .. } => ErrorKind::Service,
            Error::StreamNotFound { .. } => ErrorKind::NotFound,
            Error::StreamExists { .. } => ErrorKind::Exists,
            Error::Unhealthy { .. } => ErrorKind::Unhealthy,
            Error::UnsupportedStorage { .. } => ErrorKind::UnsupportedStorage,
            Error::NoStreams => ErrorKind::NoStreams,
            Error::Confirmation { .. } => ErrorKind::Confirmation,
            Error::NotADirectory { .. }
            | Error::MissingManifest { .. }
            | Error::InvalidManifest { .. } => ErrorKind::InvalidSource,
            Error::Integrity { .. } => ErrorKind::Integrity,
            Error::BackupFailed { .. } => ErrorKind::BackupFailed,
            Error::RestoreFailed { .. } => ErrorKind::RestoreFailed,
        }
    }
}
