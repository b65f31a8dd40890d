//! Error types for the ingestion pipeline.

use crate::config::ConfigError;
use crate::scanner::ScanError;
use crate::upload::UploadError;
use crate::watcher::WatchError;
use archivist_car::CarError;
use archivist_db::DbError;
use thiserror::Error;

/// Pipeline result type.
pub type Result<T> = std::result::Result<T, IngestError>;

/// Everything that can stop a file from reaching the archive.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Status store error: {0}")]
    Database(#[from] DbError),

    /// The file could not be read or framed into a container
    #[error("Content addressing failed: {0}")]
    Content(#[from] CarError),

    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),

    /// The backend stored the bytes under a different identifier
    #[error("CID mismatch: computed {local}, backend reported {remote}")]
    CidMismatch { local: String, remote: String },

    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("Watch failed: {0}")]
    Watch(#[from] WatchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A spawned task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for IngestError {
    fn from(err: tokio::task::JoinError) -> Self {
        IngestError::Task(err.to_string())
    }
}
