//! Task status set and legacy status normalization.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
///
/// `New` is the only initial state. `Merged` and `Pushed` are terminal for
/// orchestration purposes, but nothing prevents an operator from forcing a
/// task into another state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    New,
    InProgress,
    Iterating,
    Completed,
    Failed,
    Merged,
    Pushed,
}

impl TaskStatus {
    pub const ALL: [Self; 7] = [
        Self::New,
        Self::InProgress,
        Self::Iterating,
        Self::Completed,
        Self::Failed,
        Self::Merged,
        Self::Pushed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::InProgress => "IN_PROGRESS",
            Self::Iterating => "ITERATING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Merged => "MERGED",
            Self::Pushed => "PUSHED",
        }
    }

    /// True while an agent may still be writing into the workspace.
    pub fn is_active(self) -> bool {
        matches!(self, Self::InProgress | Self::Iterating)
    }

    /// Map a status string from any historical record format.
    ///
    /// Matching is case-insensitive and accepts `-`, `_` or space separators.
    /// Unknown values normalize to `New` so that migration never fails on them.
    pub fn from_legacy(raw: &str) -> Self {
        let key: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                '-' | ' ' => '_',
                other => other.to_ascii_lowercase(),
            })
            .collect();
        match key.as_str() {
            "in_progress" | "inprogress" | "running" | "started" => Self::InProgress,
            "iterating" => Self::Iterating,
            "completed" | "complete" | "done" => Self::Completed,
            "failed" | "error" => Self::Failed,
            "merged" => Self::Merged,
            "pushed" => Self::Pushed,
            _ => Self::New,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    /// Strict parse of the canonical form; see [`TaskStatus::from_legacy`] for the lenient one.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown status '{s}'"))
    }
}
