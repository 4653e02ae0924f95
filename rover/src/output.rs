//! Rendering command outcomes as human lines or JSON.

use std::fmt::Write as _;
use std::io::{self, Write};

use serde::Serialize;

use crate::core::status::TaskStatus;
use crate::core::task::TaskRecord;
use crate::io::task_store::TaskListing;
use crate::merge::{CleanupReport, MergeOutcome, PushOutcome, Unresolved};
use crate::orchestrator::{DeleteOutcome, Inspection, LogsOutcome, ResetOutcome, RunOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Human,
    Json,
}

/// Short, human-readable form of an outcome.
pub trait Human {
    fn human(&self) -> String;
}

/// Write `value` to `out` in the requested mode.
pub fn emit<T: Serialize + Human>(
    mode: OutputMode,
    value: &T,
    out: &mut dyn Write,
) -> io::Result<()> {
    match mode {
        OutputMode::Json => {
            let payload = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
            writeln!(out, "{payload}")
        }
        OutputMode::Human => {
            let text = value.human();
            if text.ends_with('\n') {
                write!(out, "{text}")
            } else {
                writeln!(out, "{text}")
            }
        }
    }
}

/// Lowercase status label used in listings.
pub fn status_label(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::New => "new",
        TaskStatus::InProgress => "in progress",
        TaskStatus::Iterating => "iterating",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Merged => "merged",
        TaskStatus::Pushed => "pushed",
    }
}

/// Serializable view of a [`TaskListing`].
#[derive(Debug, Clone, Serialize)]
pub struct ListView {
    pub tasks: Vec<TaskRecord>,
    pub unreadable: Vec<UnreadableTask>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnreadableTask {
    pub id: u64,
    pub error: String,
}

impl From<TaskListing> for ListView {
    fn from(listing: TaskListing) -> Self {
        Self {
            tasks: listing.tasks,
            unreadable: listing
                .unreadable
                .into_iter()
                .map(|(id, err)| UnreadableTask {
                    id,
                    error: err.to_string(),
                })
                .collect(),
        }
    }
}

impl Human for ListView {
    fn human(&self) -> String {
        if self.tasks.is_empty() && self.unreadable.is_empty() {
            return "No tasks.".to_string();
        }
        let mut text = format!("{:>4}  {:<12}  {:>4}  TITLE\n", "ID", "STATUS", "ITER");
        for task in &self.tasks {
            let _ = writeln!(
                text,
                "{:>4}  {:<12}  {:>4}  {}",
                task.id,
                status_label(task.status),
                task.iterations,
                task.title
            );
        }
        for broken in &self.unreadable {
            let _ = writeln!(
                text,
                "{:>4}  {:<12}  {:>4}  {}",
                broken.id, "unreadable", "-", broken.error
            );
        }
        text
    }
}

impl Human for TaskRecord {
    fn human(&self) -> String {
        let mut text = format!("Task {}: {}\n", self.id, self.title);
        let _ = writeln!(text, "  status:     {}", status_label(self.status));
        let _ = writeln!(text, "  iterations: {}", self.iterations);
        if let Some((path, branch)) = self.workspace() {
            let _ = writeln!(text, "  branch:     {branch}");
            let _ = writeln!(text, "  workspace:  {}", path.display());
        }
        if let Some(status) = &self.execution_status {
            let _ = writeln!(text, "  execution:  {status}");
        }
        if let Some(error) = &self.error {
            let _ = writeln!(text, "  error:      {error}");
        }
        text
    }
}

impl Human for RunOutcome {
    fn human(&self) -> String {
        format!(
            "Task {} iteration {} ({}): {}",
            self.task.id,
            self.iteration,
            self.container,
            status_label(self.task.status)
        )
    }
}

impl Human for Inspection {
    fn human(&self) -> String {
        let mut text = self.task.human();
        let _ = writeln!(text, "  description: {}", self.task.description);
        if let Some(iteration) = &self.iteration {
            let _ = writeln!(text, "\nIteration {}: {}", iteration.iteration, iteration.title);
        }
        if let Some(execution) = &self.execution {
            let _ = writeln!(text, "  status: {}", execution.status);
            if let Some(code) = execution.exit_code {
                let _ = writeln!(text, "  exit code: {code}");
            }
        }
        if let Some(summary) = self.output.as_ref().and_then(|o| o.summary.as_deref()) {
            let _ = writeln!(text, "\nSummary:\n{summary}");
        }
        text
    }
}

impl Human for PushOutcome {
    fn human(&self) -> String {
        match self {
            Self::NothingToPush => "Nothing to push.".to_string(),
            Self::Pushed {
                committed,
                set_upstream,
            } => {
                let mut text = String::from("Pushed task branch");
                if *set_upstream {
                    text.push_str(" (upstream set)");
                }
                if let Some(message) = committed {
                    let subject = message.lines().next().unwrap_or_default();
                    let _ = write!(text, " after committing \"{subject}\"");
                }
                text.push('.');
                text
            }
        }
    }
}

impl Human for CleanupReport {
    fn human(&self) -> String {
        let mut text = format!(
            "worktree removed: {}, branch deleted: {}",
            yes_no(self.worktree_removed),
            yes_no(self.branch_deleted)
        );
        for error in &self.errors {
            let _ = write!(text, "\n  warning: {error}");
        }
        text
    }
}

impl Human for MergeOutcome {
    fn human(&self) -> String {
        match self {
            Self::NothingToMerge => "Nothing to merge.".to_string(),
            Self::Merged {
                resolved, cleanup, ..
            } => {
                let mut text = String::from("Merged task branch.");
                if !resolved.is_empty() {
                    let _ = write!(text, " Resolved conflicts in: {}.", resolved.join(", "));
                }
                if let Some(cleanup) = cleanup {
                    let _ = write!(text, "\nCleanup: {}", cleanup.human());
                }
                text
            }
            Self::Aborted { conflicts, reason } => {
                let why = match reason {
                    Unresolved::Declined => "conflict resolution declined".to_string(),
                    Unresolved::ResolutionFailed { file, error } => {
                        format!("could not resolve {file}: {error}")
                    }
                    Unresolved::Rejected => "resolution rejected".to_string(),
                };
                let mut text = format!(
                    "Merge aborted ({why}). Conflicted files: {}",
                    conflicts.join(", ")
                );
                if matches!(reason, Unresolved::Declined | Unresolved::Rejected) {
                    text.push_str(
                        "\nTo resolve by hand: git merge <task branch>, fix the files, \
                         git add them, then git commit.",
                    );
                }
                text
            }
        }
    }
}

impl Human for LogsOutcome {
    fn human(&self) -> String {
        match self {
            Self::Snapshot { logs, .. } => logs.clone(),
            Self::Followed {
                container,
                interrupted,
            } => {
                if *interrupted {
                    format!("Stopped following {container}.")
                } else {
                    format!("{container} exited.")
                }
            }
        }
    }
}

impl Human for ResetOutcome {
    fn human(&self) -> String {
        format!("Task {} reset to new; {}", self.task.id, self.cleanup.human())
    }
}

impl Human for DeleteOutcome {
    fn human(&self) -> String {
        format!("Task {} deleted; {}", self.id, self.cleanup.human())
    }
}

/// Raw diff text; JSON wraps it as `{"diff": ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct DiffView {
    pub diff: String,
}

impl Human for DiffView {
    fn human(&self) -> String {
        if self.diff.is_empty() {
            "No changes.".to_string()
        } else {
            self.diff.clone()
        }
    }
}

/// Outcome of `workflow validate`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowCheck {
    pub name: String,
    pub steps: usize,
}

impl Human for WorkflowCheck {
    fn human(&self) -> String {
        format!("Workflow {} is valid ({} steps).", self.name, self.steps)
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
