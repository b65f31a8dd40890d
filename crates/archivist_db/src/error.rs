//! Error types for the status store.

use crate::types::FileStatus;
use thiserror::Error;

/// Status store operation result type.
pub type Result<T> = std::result::Result<T, DbError>;

/// Status store errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// SQLx error (connection, query, etc.)
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// IO error (database file or directory)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A record for this path already exists
    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    /// No record for this path
    #[error("Record not found: {0}")]
    NotFound(String),

    /// The record is not in a state that permits the requested transition
    #[error("Invalid transition for {path}: {from} -> {to}")]
    InvalidTransition {
        path: String,
        from: FileStatus,
        to: FileStatus,
    },

    /// A stored row could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl DbError {
    /// True when the error is the uniqueness conflict raised by `create_found`.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, DbError::AlreadyExists(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound(_))
    }
}
