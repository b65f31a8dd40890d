//! Error types for content addressing.

use std::io;
use thiserror::Error;

/// Content addressing error type
#[derive(Error, Debug)]
pub enum CarError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid CID: {0}")]
    InvalidCid(String),

    #[error("Invalid CAR: {0}")]
    InvalidCar(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CarError>;
