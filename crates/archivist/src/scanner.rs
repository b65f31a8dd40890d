//! One-shot recursive enumeration of files already under the root.

use crate::filter::ExtensionFilter;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use walkdir::WalkDir;

/// Paths in flight between the walk thread and the consumer.
const SCAN_CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Walks a root once, yielding allowlisted regular files.
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    root: PathBuf,
    filter: ExtensionFilter,
}

impl DirectoryScanner {
    pub fn new(root: impl Into<PathBuf>, filter: ExtensionFilter) -> Self {
        Self {
            root: root.into(),
            filter,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazy walk. Directories, symlinks and non-matching files are skipped.
    ///
    /// The first walk error is yielded once, after which the iterator is
    /// exhausted.
    pub fn scan(&self) -> Scan {
        Scan {
            walker: WalkDir::new(&self.root).follow_links(false).into_iter(),
            filter: self.filter.clone(),
            done: false,
        }
    }

    /// Run [`scan`](Self::scan) on a blocking thread, streaming results
    /// through a bounded channel.
    ///
    /// The walk stops early when the receiver is dropped.
    pub fn spawn(&self) -> mpsc::Receiver<Result<PathBuf, ScanError>> {
        let (tx, rx) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
        let scan = self.scan();
        tokio::task::spawn_blocking(move || {
            for item in scan {
                if tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });
        rx
    }
}

/// Iterator returned by [`DirectoryScanner::scan`].
pub struct Scan {
    walker: walkdir::IntoIter,
    filter: ExtensionFilter,
    done: bool,
}

impl Iterator for Scan {
    type Item = Result<PathBuf, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.walker.next()? {
                Ok(entry) => {
                    if entry.file_type().is_file() && self.filter.matches(entry.path()) {
                        return Some(Ok(entry.into_path()));
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(ScanError::Walk(e)));
                }
            }
        }
    }
}

impl std::iter::FusedIterator for Scan {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn scanner(root: &Path) -> DirectoryScanner {
        DirectoryScanner::new(root, ExtensionFilter::new(["jpg", "png"]))
    }

    #[test]
    fn test_scan_filters_and_recurses() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("nested/deeper")).unwrap();
        fs::write(tmp.path().join("a.jpg"), b"a").unwrap();
        fs::write(tmp.path().join("b.tmp"), b"b").unwrap();
        fs::write(tmp.path().join("nested/c.PNG"), b"c").unwrap();
        fs::write(tmp.path().join("nested/deeper/d.jpg"), b"d").unwrap();
        fs::create_dir(tmp.path().join("folder.jpg")).unwrap();

        let mut found: Vec<PathBuf> = scanner(tmp.path()).scan().map(|r| r.unwrap()).collect();
        found.sort();

        assert_eq!(
            found,
            vec![
                tmp.path().join("a.jpg"),
                tmp.path().join("nested/c.PNG"),
                tmp.path().join("nested/deeper/d.jpg"),
            ]
        );
    }

    #[test]
    fn test_missing_root_yields_single_error() {
        let tmp = TempDir::new().unwrap();
        let mut scan = scanner(&tmp.path().join("missing")).scan();
        assert!(matches!(scan.next(), Some(Err(ScanError::Walk(_)))));
        assert!(scan.next().is_none());
        assert!(scan.next().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let tmp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("x.jpg"), b"x").unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("link")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("x.jpg"), tmp.path().join("y.jpg"))
            .unwrap();

        assert_eq!(scanner(tmp.path()).scan().count(), 0);
    }

    #[tokio::test]
    async fn test_spawned_scan_streams_paths() {
        let tmp = TempDir::new().unwrap();
        for i in 0..100 {
            fs::write(tmp.path().join(format!("{i}.jpg")), b"x").unwrap();
        }

        let mut rx = scanner(tmp.path()).spawn();
        let mut count = 0;
        while let Some(item) = rx.recv().await {
            item.unwrap();
            count += 1;
        }
        assert_eq!(count, 100);
    }
}
