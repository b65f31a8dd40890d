//! Remote storage backends.
//!
//! A backend receives a CARv1 container and answers with the root CID it
//! stored the content under. The pipeline compares that answer with its own
//! computation; it never trusts the backend's identifier blindly.

mod local;
mod w3;

pub use local::LocalCarStore;
pub use w3::W3Backend;

use crate::config::{BackendKind, UploadConfig};
use archivist_car::TransferContainer;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    /// Backend unreachable or temporarily failing
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Backend refused the container or the target
    #[error("Rejected by backend: {0}")]
    Rejected(String),

    #[error("No upload target selected")]
    NoTarget,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend answered with something we could not interpret
    #[error("Unexpected backend response: {0}")]
    Protocol(String),
}

impl UploadError {
    /// Whether retrying the same upload might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, UploadError::Unavailable(_) | UploadError::Io(_))
    }
}

/// Identifier a backend reports for stored content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteId(pub String);

impl RemoteId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content-addressed storage the pipeline uploads to.
///
/// `select_target` is called once at startup. The selected target is
/// process-wide and must not change while uploads are in flight.
#[async_trait]
pub trait UploadBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn select_target(&self, target: &str) -> Result<(), UploadError>;

    async fn upload(&self, container: &TransferContainer) -> Result<RemoteId, UploadError>;
}

/// Build the backend named in the config. Does not select the target.
pub fn from_config(config: &UploadConfig) -> Result<Arc<dyn UploadBackend>, UploadError> {
    match config.backend {
        BackendKind::W3 => Ok(Arc::new(W3Backend::new(&config.w3_bin))),
        BackendKind::Local => {
            let dir = config.local_dir.as_ref().ok_or_else(|| {
                UploadError::Rejected("local backend requires upload.local_dir".to_string())
            })?;
            Ok(Arc::new(LocalCarStore::new(dir)))
        }
    }
}

/// Trim subprocess output for error messages.
pub(crate) fn excerpt(bytes: &[u8]) -> String {
    const MAX: usize = 512;
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    if text.len() <= MAX {
        return text.to_string();
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(UploadError::Unavailable("down".into()).is_transient());
        assert!(UploadError::Io(std::io::Error::other("reset")).is_transient());
        assert!(!UploadError::Rejected("quota".into()).is_transient());
        assert!(!UploadError::Protocol("garbage".into()).is_transient());
        assert!(!UploadError::NoTarget.is_transient());
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(400);
        let out = excerpt(long.as_bytes());
        assert!(out.ends_with("..."));
        assert!(out.len() <= 515);
        assert_eq!(excerpt(b"  short\n"), "short");
    }
}
