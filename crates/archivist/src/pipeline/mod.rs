//! Drives candidate paths through the status state machine.
//!
//! ```text
//! path ─► filter/stat ─► create_found ─► derive ─► mark_uploading ─► upload ─► mark_success
//!                            │              │                          │
//!                     AlreadyExists      IO error              failure/mismatch
//!                         skip          mark_error                mark_error
//! ```
//!
//! `create_found` is the only de-duplication primitive: whoever inserts the
//! record owns the file, every other observer of the same path skips it.

mod pool;
mod settle;

pub use pool::{PoolConfig, WorkerPool};
pub use settle::{wait_until_settled, Settled};

use crate::config::UploadConfig;
use crate::error::{IngestError, Result};
use crate::filter::ExtensionFilter;
use crate::scanner::DirectoryScanner;
use crate::upload::{RemoteId, UploadBackend, UploadError};
use crate::webhook::{Notifier, SuccessEvent};
use archivist_car::{Cid, ContentAddresser, TransferContainer};
use archivist_db::{FileStatus, StatusStore};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Recorded against records found in Uploading at startup.
pub const STUCK_UPLOAD_MESSAGE: &str = "interrupted before upload completed";
/// Recorded against records found in Found at startup.
pub const STUCK_FOUND_MESSAGE: &str = "interrupted before hashing completed";

/// Cap on a single retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Where a candidate path came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Scan,
    Watch,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::Scan => "scan",
            Trigger::Watch => "watch",
        })
    }
}

/// Why a path was not ingested. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// Gone before it could be examined
    Missing,
    /// Directory, symlink, socket, ...
    NotAFile,
    /// Extension not in the allowlist
    Filtered,
    /// Path cannot be stored as a UTF-8 key
    NotUtf8,
    /// Another attempt already owns the record
    Known,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Skipped(Skip),
    Archived { cid: Cid, content_hash: String },
}

/// Totals for one pass over the root.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub seen: usize,
    pub archived: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Exponential backoff for transient upload failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }

    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor).min(MAX_RETRY_DELAY)
    }
}

impl From<&UploadConfig> for RetryPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff(),
        }
    }
}

/// The orchestrator. The only component that writes to the status store.
pub struct Pipeline {
    store: Arc<dyn StatusStore>,
    backend: Arc<dyn UploadBackend>,
    notifier: Arc<dyn Notifier>,
    addresser: ContentAddresser,
    filter: ExtensionFilter,
    retry: RetryPolicy,
    settle: Duration,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn StatusStore>,
        backend: Arc<dyn UploadBackend>,
        notifier: Arc<dyn Notifier>,
        filter: ExtensionFilter,
    ) -> Self {
        Self {
            store,
            backend,
            notifier,
            addresser: ContentAddresser::default(),
            filter,
            retry: RetryPolicy::none(),
            settle: Duration::ZERO,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Quiet period required before a watched or recently modified file
    /// is hashed.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Run one candidate path through the full protocol.
    ///
    /// `Err` means the file failed; the failure has already been recorded
    /// on its status record when the record exists.
    pub async fn process(&self, path: &Path, trigger: Trigger) -> Result<Outcome> {
        if !self.filter.matches(path) {
            return Ok(Outcome::Skipped(Skip::Filtered));
        }

        if self.needs_settling(path, trigger).await
            && wait_until_settled(path, self.settle).await == Settled::Vanished
        {
            debug!(path = %path.display(), "Vanished before settling");
            return Ok(Outcome::Skipped(Skip::Missing));
        }

        match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(Outcome::Skipped(Skip::NotAFile)),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Not examinable, skipping");
                return Ok(Outcome::Skipped(Skip::Missing));
            }
        }

        let key = match path.to_str() {
            Some(key) => key,
            None => {
                warn!(path = %path.display(), "Skipping path that is not valid UTF-8");
                return Ok(Outcome::Skipped(Skip::NotUtf8));
            }
        };

        match self.store.create_found(key).await {
            Ok(()) => {}
            Err(e) if e.is_already_exists() => {
                debug!(path = key, source = %trigger, "Already known");
                return Ok(Outcome::Skipped(Skip::Known));
            }
            Err(e) => return Err(e.into()),
        }
        info!(path = key, source = %trigger, "Found new file");

        self.ingest(key, path).await
    }

    /// Live events always settle. Scanned files settle only when modified
    /// within the last quiet period, since a writer may still hold them.
    async fn needs_settling(&self, path: &Path, trigger: Trigger) -> bool {
        if self.settle.is_zero() {
            return false;
        }
        if trigger == Trigger::Watch {
            return true;
        }
        let modified = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return false,
        };
        // An mtime in the future also counts as recent.
        match SystemTime::now().duration_since(modified) {
            Ok(age) => age < self.settle,
            Err(_) => true,
        }
    }

    async fn ingest(&self, key: &str, path: &Path) -> Result<Outcome> {
        let addresser = self.addresser;
        let owned = path.to_path_buf();
        let derived = tokio::task::spawn_blocking(move || addresser.derive_path(&owned)).await;
        let (address, container) = match derived {
            Ok(Ok(derived)) => derived,
            Ok(Err(e)) => return self.fail(key, e.into()).await,
            Err(e) => return self.fail(key, e.into()).await,
        };

        if let Err(e) = self.store.mark_uploading(key, &address.sha256).await {
            return self.fail(key, e.into()).await;
        }
        debug!(
            path = key,
            cid = %address.cid,
            size = address.size,
            container_len = container.len(),
            "Uploading"
        );

        let remote = match self.upload_with_retry(key, &container).await {
            Ok(remote) => remote,
            Err(e) => return self.fail(key, e.into()).await,
        };
        if !same_cid(&remote, &address.cid) {
            let mismatch = IngestError::CidMismatch {
                local: address.cid.to_string(),
                remote: remote.0,
            };
            return self.fail(key, mismatch).await;
        }

        let cid = address.cid.to_string();
        self.store.mark_success(key, &cid).await?;
        info!(path = key, cid = %cid, backend = self.backend.name(), "Archived");

        self.notifier.notify_success(SuccessEvent {
            file_path: key.to_string(),
            cid,
            content_hash: address.sha256.clone(),
        });

        Ok(Outcome::Archived {
            cid: address.cid,
            content_hash: address.sha256,
        })
    }

    async fn upload_with_retry(
        &self,
        key: &str,
        container: &TransferContainer,
    ) -> std::result::Result<RemoteId, UploadError> {
        let mut attempt = 1;
        loop {
            match self.backend.upload(container).await {
                Ok(remote) => return Ok(remote),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        path = key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Upload failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Record `err` on the file's record and hand it back.
    async fn fail(&self, key: &str, err: IngestError) -> Result<Outcome> {
        if let Err(db_err) = self.store.mark_error(key, &err.to_string()).await {
            error!(path = key, error = %db_err, "Failed to record error status");
        }
        Err(err)
    }

    /// Process everything already under the scanner's root, one file at a
    /// time. Per-file failures are logged and counted; a walk error stops
    /// the pass.
    pub async fn run_scan(&self, scanner: &DirectoryScanner) -> Result<ScanSummary> {
        info!(root = %scanner.root().display(), "Starting scan");
        let mut rx = scanner.spawn();
        let mut summary = ScanSummary::default();

        while let Some(item) = rx.recv().await {
            let path = item?;
            summary.seen += 1;
            match self.process(&path, Trigger::Scan).await {
                Ok(Outcome::Archived { .. }) => summary.archived += 1,
                Ok(Outcome::Skipped(_)) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(path = %path.display(), source = %Trigger::Scan, error = %e, "Ingest failed");
                }
            }
        }

        info!(
            seen = summary.seen,
            archived = summary.archived,
            skipped = summary.skipped,
            failed = summary.failed,
            "Scan complete"
        );
        Ok(summary)
    }

    /// Report records left in Found or Uploading by an earlier process and,
    /// when `mark_error` is set, move them to Error.
    pub async fn reconcile_stuck(&self, mark_error: bool) -> Result<usize> {
        let mut total = 0;
        for (status, message) in [
            (FileStatus::Found, STUCK_FOUND_MESSAGE),
            (FileStatus::Uploading, STUCK_UPLOAD_MESSAGE),
        ] {
            let stuck = self.store.list(Some(status)).await?;
            for record in &stuck {
                warn!(path = %record.file_path, status = %status, since = %record.updated_at, "{}", message);
                if mark_error {
                    self.store.mark_error(&record.file_path, message).await?;
                }
            }
            if !stuck.is_empty() && !mark_error {
                warn!(
                    count = stuck.len(),
                    status = %status,
                    "Stuck records are skipped by scans; use `archivist reset --status {}` to retry them",
                    status.as_str().to_ascii_lowercase()
                );
            }
            total += stuck.len();
        }
        Ok(total)
    }
}

fn same_cid(remote: &RemoteId, local: &Cid) -> bool {
    match remote.as_str().parse::<Cid>() {
        Ok(remote) => remote == *local,
        Err(_) => remote.as_str() == local.to_string(),
    }
}
