//! `archivist status`

use super::output::{format_time, print_table_colored};
use anyhow::{bail, Context, Result};
use archivist::Config;
use archivist_db::{FileStatus, FileStatusRecord, StatusCounts, StatusDb, StatusStore};
use comfy_table::Color;
use serde::Serialize;

#[derive(Debug)]
pub struct StatusArgs {
    pub status: Option<String>,
    pub limit: usize,
    pub json: bool,
}

#[derive(Serialize)]
struct StatusReport {
    counts: StatusCounts,
    records: Vec<FileStatusRecord>,
}

pub async fn run(config: &Config, args: StatusArgs) -> Result<()> {
    let filter = match args.status.as_deref() {
        Some(raw) => match FileStatus::parse(raw) {
            Some(status) => Some(status),
            None => bail!(
                "Unknown status '{}'. Expected one of: found, uploading, success, error",
                raw
            ),
        },
        None => None,
    };

    let db = StatusDb::open(&config.database.path, config.database.max_connections)
        .await
        .with_context(|| format!("Failed to open {}", config.database.path.display()))?;
    let counts = db.counts().await?;
    let mut records = db.list(filter).await?;
    db.close().await;

    records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    if args.json {
        let report = StatusReport { counts, records };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{} records: {} found, {} uploading, {} success, {} error",
        counts.total(),
        counts.found,
        counts.uploading,
        counts.success,
        counts.error
    );
    if records.is_empty() {
        return Ok(());
    }

    let shown = records.len().min(args.limit);
    let rows = records
        .iter()
        .take(args.limit)
        .map(|r| {
            let detail = match r.status {
                FileStatus::Success => r.cid.clone().unwrap_or_default(),
                FileStatus::Error => r.error_message.clone().unwrap_or_default(),
                _ => String::new(),
            };
            vec![
                (r.file_path.clone(), None),
                (r.status.to_string(), Some(status_color(r.status))),
                (detail, None),
                (format_time(r.updated_at), Some(Color::Grey)),
            ]
        })
        .collect();
    print_table_colored(&["PATH", "STATUS", "CID / ERROR", "UPDATED"], rows);

    if shown < records.len() {
        println!("... {} more (use --limit)", records.len() - shown);
    }
    Ok(())
}

fn status_color(status: FileStatus) -> Color {
    match status {
        FileStatus::Found => Color::Blue,
        FileStatus::Uploading => Color::Yellow,
        FileStatus::Success => Color::Green,
        FileStatus::Error => Color::Red,
    }
}
