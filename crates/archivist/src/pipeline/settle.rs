//! Wait for a freshly created file to stop changing.

use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Upper bound on polls before hashing whatever is there.
const MAX_SETTLE_ROUNDS: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Stable,
    Vanished,
}

#[derive(Debug, PartialEq, Eq)]
struct Snapshot {
    len: u64,
    modified: Option<SystemTime>,
}

async fn snapshot(path: &Path) -> Option<Snapshot> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some(Snapshot {
        len: meta.len(),
        modified: meta.modified().ok(),
    })
}

/// Poll size and mtime every `interval` until two reads agree.
pub async fn wait_until_settled(path: &Path, interval: Duration) -> Settled {
    let mut last = match snapshot(path).await {
        Some(s) => s,
        None => return Settled::Vanished,
    };

    for _ in 0..MAX_SETTLE_ROUNDS {
        tokio::time::sleep(interval).await;
        let current = match snapshot(path).await {
            Some(s) => s,
            None => return Settled::Vanished,
        };
        if current == last {
            return Settled::Stable;
        }
        last = current;
    }

    debug!(path = %path.display(), "File still changing, proceeding anyway");
    Settled::Stable
}
