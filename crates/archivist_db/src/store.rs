//! Status transitions.
//!
//! Every transition is a single conditional statement, so concurrent callers
//! for the same path are arbitrated by SQLite rather than by an in-process lock.

use crate::error::{DbError, Result};
use crate::types::{FileStatus, FileStatusRecord, StatusCounts};
use crate::StatusDb;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::debug;

/// Durable mapping from file path to processing state.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Fetch the record for `path`, if any.
    async fn lookup(&self, path: &str) -> Result<Option<FileStatusRecord>>;

    /// Insert a new record in `Found` state.
    ///
    /// Fails with [`DbError::AlreadyExists`] when the path already has a
    /// record; callers treat that as "owned by another attempt".
    async fn create_found(&self, path: &str) -> Result<()>;

    /// `Found -> Uploading`, recording the content hash.
    async fn mark_uploading(&self, path: &str, content_hash: &str) -> Result<()>;

    /// `Uploading -> Success`, recording the CID.
    async fn mark_success(&self, path: &str, cid: &str) -> Result<()>;

    /// `Found | Uploading -> Error`.
    async fn mark_error(&self, path: &str, message: &str) -> Result<()>;

    /// Records in the given state, or all records, ordered by path.
    async fn list(&self, status: Option<FileStatus>) -> Result<Vec<FileStatusRecord>>;
}

const SELECT_COLUMNS: &str =
    "SELECT file_path, status, content_hash, cid, error, created_at, updated_at FROM file_status";

#[async_trait]
impl StatusStore for StatusDb {
    async fn lookup(&self, path: &str) -> Result<Option<FileStatusRecord>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE file_path = ?"))
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn create_found(&self, path: &str) -> Result<()> {
        let now = Self::now_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO file_status (file_path, status, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(file_path) DO NOTHING
            "#,
        )
        .bind(path)
        .bind(FileStatus::Found.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::AlreadyExists(path.to_string()));
        }
        debug!(path, "Record created");
        Ok(())
    }

    async fn mark_uploading(&self, path: &str, content_hash: &str) -> Result<()> {
        self.transition(path, FileStatus::Uploading, "content_hash = ?", content_hash)
            .await
    }

    async fn mark_success(&self, path: &str, cid: &str) -> Result<()> {
        self.transition(path, FileStatus::Success, "cid = ?, error = NULL", cid)
            .await
    }

    async fn mark_error(&self, path: &str, message: &str) -> Result<()> {
        self.transition(path, FileStatus::Error, "error = ?, cid = NULL", message)
            .await
    }

    async fn list(&self, status: Option<FileStatus>) -> Result<Vec<FileStatusRecord>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!("{SELECT_COLUMNS} WHERE status = ? ORDER BY file_path"))
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY file_path"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(row_to_record).collect()
    }
}

// Operator-only maintenance (never called by scan or watch) and the shared
// transition statement.
impl StatusDb {
    /// Record counts grouped by status.
    pub async fn counts(&self) -> Result<StatusCounts> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM file_status GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: String = row.get("status");
            let status = FileStatus::parse(&status)
                .ok_or_else(|| DbError::Corrupt(format!("unknown status '{}'", status)))?;
            counts.add(status, row.get::<i64, _>("n") as u64);
        }
        Ok(counts)
    }

    /// Delete the record for `path` so a later scan re-ingests it.
    ///
    /// Returns whether a record existed.
    pub async fn clear(&self, path: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM file_status WHERE file_path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every record in `status`. Returns the number removed.
    pub async fn clear_status(&self, status: FileStatus) -> Result<u64> {
        let result = sqlx::query("DELETE FROM file_status WHERE status = ?")
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Move `path` to `to` from any of its legal predecessors, applying
    /// `assignments` (one `?` placeholder, bound to `value`) in the same
    /// statement.
    async fn transition(
        &self,
        path: &str,
        to: FileStatus,
        assignments: &str,
        value: &str,
    ) -> Result<()> {
        let from = to.predecessors();
        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            "UPDATE file_status SET status = ?, {assignments}, updated_at = MAX(updated_at, ?) \
             WHERE file_path = ? AND status IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(value)
            .bind(Self::now_millis())
            .bind(path);
        for status in &from {
            query = query.bind(status.as_str());
        }
        let result = query.execute(&self.pool).await?;

        self.check_transition(path, result.rows_affected(), to).await
    }

    /// Turn a zero-row conditional update into the precise error.
    async fn check_transition(&self, path: &str, rows_affected: u64, to: FileStatus) -> Result<()> {
        if rows_affected > 0 {
            debug!(path, status = %to, "Record updated");
            return Ok(());
        }
        match self.lookup(path).await? {
            None => Err(DbError::NotFound(path.to_string())),
            Some(record) => Err(DbError::InvalidTransition {
                path: path.to_string(),
                from: record.status,
                to,
            }),
        }
    }
}

fn row_to_record(row: &SqliteRow) -> Result<FileStatusRecord> {
    let status: String = row.get("status");
    let status = FileStatus::parse(&status)
        .ok_or_else(|| DbError::Corrupt(format!("unknown status '{}'", status)))?;

    Ok(FileStatusRecord {
        file_path: row.get("file_path"),
        status,
        content_hash: row.get("content_hash"),
        cid: row.get("cid"),
        error_message: row.get("error"),
        created_at: StatusDb::millis_to_datetime(row.get("created_at")),
        updated_at: StatusDb::millis_to_datetime(row.get("updated_at")),
    })
}
