//! `archivist reset`
//!
//! The explicit operator action that makes a file eligible for ingestion
//! again. Scans and watch events never delete records.

use anyhow::{bail, Context, Result};
use archivist::Config;
use archivist_db::{FileStatus, StatusDb};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct ResetArgs {
    pub paths: Vec<PathBuf>,
    pub status: Option<String>,
}

pub async fn run(config: &Config, args: ResetArgs) -> Result<()> {
    let db = StatusDb::open(&config.database.path, config.database.max_connections)
        .await
        .with_context(|| format!("Failed to open {}", config.database.path.display()))?;

    let result = reset(&db, args).await;
    db.close().await;
    result
}

async fn reset(db: &StatusDb, args: ResetArgs) -> Result<()> {
    if let Some(raw) = args.status {
        let status = match FileStatus::parse(&raw) {
            Some(s @ (FileStatus::Found | FileStatus::Uploading | FileStatus::Error)) => s,
            Some(other) => bail!(
                "Refusing to reset {} records; only found, uploading and error records can be reset",
                other
            ),
            None => bail!("Unknown status '{}'", raw),
        };
        let removed = db.clear_status(status).await?;
        println!("Removed {} {} record(s)", removed, status);
        return Ok(());
    }

    for path in &args.paths {
        let key = record_key(path)?;
        if db.clear(&key).await? {
            println!("Reset {}", key);
        } else {
            println!("No record for {}", key);
        }
    }
    Ok(())
}

/// Records are keyed by canonical absolute path. Fall back to the absolute
/// form for files that no longer exist.
fn record_key(path: &Path) -> Result<String> {
    let absolute = match std::fs::canonicalize(path) {
        Ok(p) => p,
        Err(_) if path.is_absolute() => path.to_path_buf(),
        Err(_) => std::env::current_dir()?.join(path),
    };
    absolute
        .to_str()
        .map(str::to_string)
        .with_context(|| format!("Path is not valid UTF-8: {}", absolute.display()))
}
