//! Status record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing state of a file path.
///
/// Transitions only move forward: `Found -> Uploading -> {Success | Error}`,
/// plus `Found -> Error` when hashing fails before the upload starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileStatus {
    Found,
    Uploading,
    Success,
    Error,
}

impl FileStatus {
    pub const ALL: [FileStatus; 4] = [
        FileStatus::Found,
        FileStatus::Uploading,
        FileStatus::Success,
        FileStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Found => "Found",
            Self::Uploading => "Uploading",
            Self::Success => "Success",
            Self::Error => "Error",
        }
    }

    /// Case-insensitive parse.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "found" => Some(Self::Found),
            "uploading" => Some(Self::Uploading),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether `self -> next` is a legal state machine edge.
    pub fn can_transition_to(&self, next: FileStatus) -> bool {
        matches!(
            (self, next),
            (Self::Found, Self::Uploading)
                | (Self::Found, Self::Error)
                | (Self::Uploading, Self::Success)
                | (Self::Uploading, Self::Error)
        )
    }

    /// Every state that may move to `self`.
    pub fn predecessors(&self) -> Vec<FileStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(*self))
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the `file_status` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatusRecord {
    pub file_path: String,
    pub status: FileStatus,
    /// Hex SHA-256 of the file bytes, set by the Uploading transition.
    pub content_hash: Option<String>,
    /// Root CID of the uploaded container; present iff `status == Success`.
    pub cid: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Number of records per status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub found: u64,
    pub uploading: u64,
    pub success: u64,
    pub error: u64,
}

impl StatusCounts {
    pub fn total(&self) -> u64 {
        self.found + self.uploading + self.success + self.error
    }

    pub(crate) fn add(&mut self, status: FileStatus, n: u64) {
        match status {
            FileStatus::Found => self.found += n,
            FileStatus::Uploading => self.uploading += n,
            FileStatus::Success => self.success += n,
            FileStatus::Error => self.error += n,
        }
    }
}
