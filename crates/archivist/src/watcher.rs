//! Native filesystem notifications for the watched root.
//!
//! The notify callback runs on the backend's own thread and only forwards
//! into an unbounded channel, so the OS queue is drained regardless of how
//! busy the pipeline is.

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Notification backend error: {0}")]
    Notify(#[from] notify::Error),

    #[error("Event stream closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    Create,
    Rename,
}

/// A path that may have just appeared under the root.
///
/// The path is a snapshot; the file may be gone by the time it is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
}

/// Receiving side of a subscription.
pub type WatchStream = mpsc::UnboundedReceiver<Result<FileEvent, WatchError>>;

/// An active recursive subscription. Unsubscribes on drop.
pub struct DirectoryWatcher {
    root: PathBuf,
    watcher: RecommendedWatcher,
    active: bool,
}

impl DirectoryWatcher {
    /// Subscribe to create and rename events under `root`.
    pub fn subscribe(root: &Path) -> Result<(Self, WatchStream), WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for file_event in map_event(event) {
                        // Receiver gone means we are shutting down
                        let _ = tx.send(Ok(file_event));
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(WatchError::Notify(e)));
                }
            }
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        info!(root = %root.display(), "Watching for new files");

        Ok((
            Self {
                root: root.to_path_buf(),
                watcher,
                active: true,
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Release the OS watch. The stream ends once buffered events are read.
    pub fn unsubscribe(mut self) -> Result<(), WatchError> {
        self.release()
    }

    fn release(&mut self) -> Result<(), WatchError> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        self.watcher.unwatch(&self.root)?;
        info!(root = %self.root.display(), "Stopped watching");
        Ok(())
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(root = %self.root.display(), error = %e, "Failed to unwatch");
        }
    }
}

/// Reduce a raw notification to the events the pipeline cares about.
fn map_event(event: Event) -> Vec<FileEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => FileEventKind::Create,
        // `From` names the old location, which no longer exists
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => return Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            debug!(paths = ?event.paths, "Rename");
            return event
                .paths
                .into_iter()
                .last()
                .map(|path| FileEvent {
                    kind: FileEventKind::Rename,
                    path,
                })
                .into_iter()
                .collect();
        }
        EventKind::Modify(ModifyKind::Name(_)) => FileEventKind::Rename,
        _ => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .map(|path| FileEvent { kind, path })
        .collect()
}
