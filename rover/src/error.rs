//! Typed errors for the rover library.
//!
//! Adapters and the task store raise these; only the orchestrator and the CLI
//! catch and report them.

use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the git adapter.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("failed to spawn git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("git {command} produced more output than rover keeps")]
    OutputTruncated { command: String },

    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The branch has never been pushed; retry with `set_upstream`.
    #[error("branch {branch} has no upstream branch")]
    NoUpstream { branch: String },

    #[error("{path} is not a git repository with commits")]
    NotARepository { path: PathBuf },
}

#[derive(Debug, Error)]
pub enum RoverError {
    #[error("task {id} not found")]
    TaskNotFound { id: u64 },

    #[error("iteration {iteration} of task {id} not found")]
    IterationNotFound { id: u64, iteration: u32 },

    #[error("task {id} already exists")]
    TaskExists { id: u64 },

    #[error("invalid task record:\n- {}", .0.join("\n- "))]
    Validation(Vec<String>),

    #[error("malformed {path}: {source}")]
    Schema {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{action} {path}: {source}")]
    File {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    VersionControl(#[from] VcsError),

    #[error("container runtime: {0}")]
    Launch(String),

    #[error("prompt template: {0}")]
    Template(#[from] minijinja::Error),

    #[error("config {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("working tree at {path} has uncommitted changes; commit or stash them first")]
    DirtyTree { path: PathBuf },

    #[error("task {id} has no workspace (was it reset?)")]
    MissingWorkspace { id: u64 },
}

impl RoverError {
    pub(crate) fn file(
        action: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::File {
            action,
            path: path.into(),
            source,
        }
    }

    /// True for the "nothing there" kinds that callers usually report rather than escalate.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::TaskNotFound { .. } | Self::IterationNotFound { .. }
        )
    }
}

pub type Result<T, E = RoverError> = std::result::Result<T, E>;
