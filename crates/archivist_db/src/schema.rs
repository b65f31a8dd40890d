//! Schema creation for the status table.
//!
//! Timestamps are stored as INTEGER milliseconds since the Unix epoch.

use crate::error::Result;
use crate::StatusDb;
use tracing::info;

const FILE_STATUS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS file_status (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT UNIQUE NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('Found', 'Uploading', 'Success', 'Error')),
    content_hash TEXT,
    cid TEXT,
    error TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    CHECK ((status = 'Success') = (cid IS NOT NULL))
)"#;

const FILE_STATUS_INDEXES: [&str; 2] = [
    "CREATE INDEX IF NOT EXISTS idx_file_status_file_path ON file_status (file_path)",
    "CREATE INDEX IF NOT EXISTS idx_file_status_status ON file_status (status)",
];

impl StatusDb {
    /// Create the status table and its indexes if absent.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(FILE_STATUS_TABLE).execute(&self.pool).await?;
        for index in FILE_STATUS_INDEXES {
            sqlx::query(index).execute(&self.pool).await?;
        }

        info!("Status schema verified");
        Ok(())
    }
}
