//! Durable status store for the Archivist ingestion pipeline.
//!
//! One row per file path ever seen. The store is the single source of truth
//! for "has this file been handled" and arbitrates races between concurrent
//! observers of the same path through the `file_path` uniqueness constraint.
//!
//! # Usage
//!
//! ```rust,ignore
//! use archivist_db::{StatusDb, StatusStore};
//!
//! let db = StatusDb::open("~/.archivist/status.sqlite3", 5).await?;
//! db.create_found("/data/a.jpg").await?;
//! db.mark_uploading("/data/a.jpg", "e3b0c442...").await?;
//! db.mark_success("/data/a.jpg", "bafkrei...").await?;
//! ```

mod error;
mod schema;
mod store;
mod types;

pub use error::{DbError, Result};
pub use store::StatusStore;
pub use types::{FileStatus, FileStatusRecord, StatusCounts};

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// SQLite-backed status store.
///
/// Cloning is cheap; clones share the same connection pool.
#[derive(Clone)]
pub struct StatusDb {
    pool: SqlitePool,
}

impl StatusDb {
    /// Open or create a database at the given path.
    ///
    /// Creates the status table if it doesn't exist.
    pub async fn open(path: impl AsRef<Path>, max_connections: u32) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Status database opened");
        Ok(db)
    }

    /// Open a private in-memory database (for tests and dry runs).
    ///
    /// Uses a single pooled connection that is never recycled, since every
    /// SQLite memory connection is its own database.
    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Get the underlying connection pool (escape hatch for ad hoc queries).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

// Timestamp utilities
impl StatusDb {
    /// Current time as milliseconds since Unix epoch.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Convert milliseconds to DateTime.
    pub fn millis_to_datetime(millis: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_database() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("status.sqlite3");

        let db = StatusDb::open(&db_path, 2).await.unwrap();
        assert!(db_path.exists());

        db.close().await;
    }

    #[tokio::test]
    async fn test_schema_creation_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("status.sqlite3");

        let db = StatusDb::open(&db_path, 2).await.unwrap();
        db.create_found("/data/a.jpg").await.unwrap();
        db.close().await;

        let db = StatusDb::open(&db_path, 2).await.unwrap();
        let record = db.lookup("/data/a.jpg").await.unwrap();
        assert_eq!(record.map(|r| r.status), Some(FileStatus::Found));
    }

    #[test]
    fn test_millis_roundtrip() {
        let now = StatusDb::now_millis();
        assert_eq!(StatusDb::millis_to_datetime(now).timestamp_millis(), now);
    }
}
