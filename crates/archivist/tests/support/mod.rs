#![allow(dead_code)]

use archivist::upload::{RemoteId, UploadBackend, UploadError};
use archivist::webhook::{Notifier, SuccessEvent};
use archivist::{ExtensionFilter, Pipeline, RetryPolicy};
use archivist_car::{read_car_roots, TransferContainer};
use archivist_db::{DbError, FileStatus, FileStatusRecord, StatusDb, StatusStore};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Reports the root recorded in the container header, like a real pinning
/// service that recomputes the DAG.
#[derive(Default)]
pub struct CountingBackend {
    pub uploads: AtomicUsize,
    pub delay: Duration,
    pub stored: Mutex<Vec<String>>,
}

impl CountingBackend {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UploadBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn select_target(&self, _target: &str) -> Result<(), UploadError> {
        Ok(())
    }

    async fn upload(&self, container: &TransferContainer) -> Result<RemoteId, UploadError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let roots = read_car_roots(container.open()?)
            .map_err(|e| UploadError::Protocol(e.to_string()))?;
        let root = roots[0].to_string();
        self.stored.lock().unwrap().push(root.clone());
        Ok(RemoteId(root))
    }
}

/// Always answers with the same unrelated CID.
#[derive(Default)]
pub struct MismatchBackend {
    pub uploads: AtomicUsize,
}

pub const FOREIGN_CID: &str = "bafkreihdwdcefgh4dqkjv67uzcmw7ojee6xedzdetojuzjevtenxquvyku";

#[async_trait]
impl UploadBackend for MismatchBackend {
    fn name(&self) -> &'static str {
        "mismatch"
    }

    async fn select_target(&self, _target: &str) -> Result<(), UploadError> {
        Ok(())
    }

    async fn upload(&self, _container: &TransferContainer) -> Result<RemoteId, UploadError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(RemoteId(FOREIGN_CID.to_string()))
    }
}

/// Fails the first `failures` uploads, then behaves like [`CountingBackend`].
pub struct FlakyBackend {
    pub failures: usize,
    pub transient: bool,
    pub calls: AtomicUsize,
    inner: CountingBackend,
}

impl FlakyBackend {
    pub fn new(failures: usize, transient: bool) -> Self {
        Self {
            failures,
            transient,
            calls: AtomicUsize::new(0),
            inner: CountingBackend::default(),
        }
    }

    pub fn always_failing(transient: bool) -> Self {
        Self::new(usize::MAX, transient)
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UploadBackend for FlakyBackend {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn select_target(&self, _target: &str) -> Result<(), UploadError> {
        Ok(())
    }

    async fn upload(&self, container: &TransferContainer) -> Result<RemoteId, UploadError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(if self.transient {
                UploadError::Unavailable("connection refused".to_string())
            } else {
                UploadError::Rejected("space quota exceeded".to_string())
            });
        }
        self.inner.upload(container).await
    }
}

/// A real store whose `Found -> Uploading` write always fails.
pub struct UploadingWriteFails {
    pub inner: StatusDb,
}

#[async_trait]
impl StatusStore for UploadingWriteFails {
    async fn lookup(&self, path: &str) -> archivist_db::Result<Option<FileStatusRecord>> {
        self.inner.lookup(path).await
    }

    async fn create_found(&self, path: &str) -> archivist_db::Result<()> {
        self.inner.create_found(path).await
    }

    async fn mark_uploading(&self, _path: &str, _content_hash: &str) -> archivist_db::Result<()> {
        Err(DbError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk I/O error",
        )))
    }

    async fn mark_success(&self, path: &str, cid: &str) -> archivist_db::Result<()> {
        self.inner.mark_success(path, cid).await
    }

    async fn mark_error(&self, path: &str, message: &str) -> archivist_db::Result<()> {
        self.inner.mark_error(path, message).await
    }

    async fn list(&self, status: Option<FileStatus>) -> archivist_db::Result<Vec<FileStatusRecord>> {
        self.inner.list(status).await
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub events: Mutex<Vec<SuccessEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<SuccessEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify_success(&self, event: SuccessEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn filter() -> ExtensionFilter {
    ExtensionFilter::new(["jpg", "png"])
}

pub fn pipeline(
    db: &StatusDb,
    backend: Arc<dyn UploadBackend>,
    notifier: Arc<dyn Notifier>,
) -> Pipeline {
    Pipeline::new(Arc::new(db.clone()), backend, notifier, filter())
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff: Duration::from_millis(1),
    }
}

/// Temp dir plus its canonical path, which is how records are keyed.
pub fn watched_root() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = std::fs::canonicalize(tmp.path()).unwrap();
    (tmp, root)
}

pub fn key(path: &Path) -> &str {
    path.to_str().unwrap()
}
