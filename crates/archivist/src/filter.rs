//! Extension allowlist shared by the scanner, the watcher and the pipeline.

use std::collections::BTreeSet;
use std::path::Path;

/// Case-insensitive set of accepted file extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionFilter {
    allowed: BTreeSet<String>,
}

impl ExtensionFilter {
    /// Build from config values. `".JPG"`, `"jpg"` and `" Jpg "` are the same entry.
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = extensions
            .into_iter()
            .filter_map(|ext| normalize(ext.as_ref()))
            .collect();
        Self { allowed }
    }

    /// True when the final extension of `path` is in the allowlist.
    ///
    /// Files without an extension, or with a non-UTF-8 one, never match.
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.allowed.contains(&ext.to_ascii_lowercase()))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }
}

fn normalize(raw: &str) -> Option<String> {
    let ext = raw.trim().trim_start_matches('.');
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}
