//! Archivist: content-addressed ingestion of a watched directory.
//!
//! Files under a root are discovered by a startup scan and by live
//! filesystem events, content-addressed into CARv1 containers, uploaded to a
//! pinning backend, and tracked in a durable status table so that a file is
//! archived at most once.

pub mod config;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod scanner;
pub mod service;
pub mod upload;
pub mod watcher;
pub mod webhook;

pub use config::{Config, ConfigError};
pub use error::{IngestError, Result};
pub use filter::ExtensionFilter;
pub use pipeline::{Outcome, Pipeline, PoolConfig, RetryPolicy, ScanSummary, Skip, Trigger};
pub use scanner::{DirectoryScanner, ScanError};
pub use upload::{LocalCarStore, RemoteId, UploadBackend, UploadError, W3Backend};
pub use watcher::{DirectoryWatcher, FileEvent, FileEventKind, WatchError, WatchStream};
pub use webhook::{NoopNotifier, Notifier, SuccessEvent, WebhookNotifier};
