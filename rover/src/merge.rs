//! Folding a task's workspace back into the operator's branch, or pushing it.
//!
//! The AI collaborator only writes commit messages and conflict resolutions;
//! whether to merge is decided here and by the operator. Steps run strictly in
//! order: commit, merge, resolve, confirm, then cleanup. Cleanup never runs
//! before the merge commit exists.

use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::commit::{fallback_message, merge_message, with_attribution};
use crate::core::task::TaskRecord;
use crate::error::{Result, RoverError, VcsError};
use crate::io::ai::AiCollaborator;
use crate::io::confirm::Confirm;
use crate::io::git::{Git, MergeResult, PushOptions, StatusOptions};
use crate::io::prompt::CommitContext;

/// Task-specific inputs shared by merge and push.
#[derive(Debug, Clone)]
pub struct TaskCheckout<'a> {
    pub task: &'a TaskRecord,
    pub worktree: &'a Path,
    pub branch: &'a str,
    /// Summaries of earlier iterations, oldest first.
    pub summaries: Vec<String>,
}

/// Commit policy shared by merge and push.
#[derive(Debug, Clone, Copy)]
pub struct CommitPolicy<'a> {
    pub trailer: Option<&'a str>,
    pub recent_commit_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PushOutcome {
    /// Clean workspace and nothing unpushed; no commit was made.
    NothingToPush,
    Pushed {
        /// Message of the commit created before pushing, if any.
        committed: Option<String>,
        set_upstream: bool,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub worktree_removed: bool,
    pub branch_deleted: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Unresolved {
    /// The operator declined automatic resolution.
    Declined,
    /// The AI could not resolve `file`.
    ResolutionFailed { file: String, error: String },
    /// Every file was resolved but the operator rejected the result.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    NothingToMerge,
    Merged {
        committed: Option<String>,
        /// Files whose conflicts the AI resolved.
        resolved: Vec<String>,
        cleanup: Option<CleanupReport>,
    },
    /// The merge was aborted; the repository is back in its pre-merge state.
    Aborted {
        conflicts: Vec<String>,
        #[serde(flatten)]
        reason: Unresolved,
    },
}

/// Commit pending workspace changes (if any) and push the task branch.
#[instrument(skip_all, fields(task_id = checkout.task.id, branch = %checkout.branch))]
pub fn push_task(
    git: Git<'_>,
    checkout: &TaskCheckout<'_>,
    ai: &dyn AiCollaborator,
    policy: CommitPolicy<'_>,
    message: Option<&str>,
) -> Result<PushOutcome> {
    let task_git = git.at(checkout.worktree);
    let has_changes = task_git.has_uncommitted_changes()?;
    let unpushed = task_git.has_unpushed_commits(checkout.branch)?;
    if !has_changes && !unpushed {
        info!("nothing to push");
        return Ok(PushOutcome::NothingToPush);
    }

    let committed = if has_changes {
        let message = match message.map(str::trim).filter(|m| !m.is_empty()) {
            Some(message) => with_attribution(message, policy.trailer),
            None => commit_message(git, checkout, ai, policy),
        };
        task_git
            .add_and_commit(&message)?
            .then_some(message)
    } else {
        None
    };

    let set_upstream = match task_git.push(checkout.branch, PushOptions::default()) {
        Ok(()) => false,
        Err(VcsError::NoUpstream { .. }) => {
            debug!("retrying push with --set-upstream");
            task_git.push(checkout.branch, PushOptions { set_upstream: true })?;
            true
        }
        Err(err) => return Err(err.into()),
    };
    info!(set_upstream, "task branch pushed");
    Ok(PushOutcome::Pushed {
        committed,
        set_upstream,
    })
}

/// Merge the task branch into the branch currently checked out in `git`'s workdir.
#[instrument(skip_all, fields(task_id = checkout.task.id, branch = %checkout.branch))]
pub fn merge_task(
    git: Git<'_>,
    checkout: &TaskCheckout<'_>,
    ai: &dyn AiCollaborator,
    confirm: &dyn Confirm,
    policy: CommitPolicy<'_>,
    cleanup: bool,
) -> Result<MergeOutcome> {
    let dirty = git.uncommitted_changes(StatusOptions {
        include_untracked: false,
    })?;
    if !dirty.is_empty() {
        warn!(changes = dirty.len(), "refusing to merge into a dirty tree");
        return Err(RoverError::DirtyTree {
            path: git.workdir().to_path_buf(),
        });
    }

    let task_git = git.at(checkout.worktree);
    let has_changes = task_git.has_uncommitted_changes()?;
    let has_commits = git.has_unmerged_commits(checkout.branch, None)?;
    if !has_changes && !has_commits {
        info!("nothing to merge");
        return Ok(MergeOutcome::NothingToMerge);
    }

    let committed = if has_changes {
        let message = commit_message(git, checkout, ai, policy);
        task_git
            .add_and_commit(&message)?
            .then_some(message)
    } else {
        None
    };

    let message = merge_message(checkout.task.id, &checkout.task.title);
    let resolved = match git.merge_branch(checkout.branch, &message)? {
        MergeResult::Merged => Vec::new(),
        MergeResult::Conflicts(conflicts) => {
            match resolve_conflicts(git, &conflicts, ai, confirm, policy) {
                Ok(Ok(())) => conflicts,
                Ok(Err(reason)) => {
                    git.abort_merge()?;
                    warn!(?reason, "merge aborted");
                    return Ok(MergeOutcome::Aborted { conflicts, reason });
                }
                Err(err) => {
                    warn!(err = %err, "conflict resolution failed, aborting merge");
                    if let Err(abort) = git.abort_merge() {
                        warn!(err = %abort, "could not abort merge");
                    }
                    return Err(err);
                }
            }
        }
    };
    info!(resolved = resolved.len(), "task branch merged");

    let cleanup = cleanup.then(|| cleanup_task(git, checkout.worktree, checkout.branch));
    Ok(MergeOutcome::Merged {
        committed,
        resolved,
        cleanup,
    })
}

/// Resolve every conflicted file with the AI, then ask before concluding.
///
/// The outer error is a git or file failure; the inner one says why the merge
/// must be aborted. Either way the caller aborts the merge.
fn resolve_conflicts(
    git: Git<'_>,
    conflicts: &[String],
    ai: &dyn AiCollaborator,
    confirm: &dyn Confirm,
    policy: CommitPolicy<'_>,
) -> Result<std::result::Result<(), Unresolved>> {
    let question = format!(
        "Merge stopped on {} conflicted file(s). Resolve them with AI?",
        conflicts.len()
    );
    if !confirm.confirm(&question) {
        return Ok(Err(Unresolved::Declined));
    }

    let recent = recent_commits(git, policy.recent_commit_count);
    for file in conflicts {
        let path = git.workdir().join(file);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) => {
                return Ok(Err(Unresolved::ResolutionFailed {
                    file: file.clone(),
                    error: format!("read {}: {err}", path.display()),
                }));
            }
        };
        let resolution = match ai.resolve_conflict(file, &raw, &recent) {
            Ok(resolution) => resolution,
            Err(err) => {
                warn!(file = %file, err = %err, "AI could not resolve conflict");
                return Ok(Err(Unresolved::ResolutionFailed {
                    file: file.clone(),
                    error: err.to_string(),
                }));
            }
        };
        fs::write(&path, resolution).map_err(|e| RoverError::file("write", &path, e))?;
        git.add(&[file.as_str()])?;
        debug!(file = %file, "conflict resolved and staged");
    }

    if !confirm.confirm("All conflicts resolved. Commit the merge?") {
        return Ok(Err(Unresolved::Rejected));
    }
    git.continue_merge()?;
    Ok(Ok(()))
}

/// AI-suggested commit message with the deterministic fallback, plus trailer.
fn commit_message(
    git: Git<'_>,
    checkout: &TaskCheckout<'_>,
    ai: &dyn AiCollaborator,
    policy: CommitPolicy<'_>,
) -> String {
    let context = CommitContext {
        title: checkout.task.title.clone(),
        description: checkout.task.description.clone(),
        recent_commits: recent_commits(git, policy.recent_commit_count),
        summaries: checkout.summaries.clone(),
    };
    let message = match ai.commit_message(&context) {
        Ok(message) if !message.trim().is_empty() => message,
        Ok(_) => fallback_message(&checkout.task.title, &checkout.task.description),
        Err(err) => {
            warn!(err = %err, "AI commit message unavailable, using fallback");
            fallback_message(&checkout.task.title, &checkout.task.description)
        }
    };
    with_attribution(&message, policy.trailer)
}

fn recent_commits(git: Git<'_>, count: usize) -> Vec<String> {
    git.recent_commits(None, count).unwrap_or_else(|err| {
        warn!(err = %err, "could not read recent commits");
        Vec::new()
    })
}

/// Remove the task worktree and branch; failures are reported, never raised.
pub fn cleanup_task(git: Git<'_>, worktree: &Path, branch: &str) -> CleanupReport {
    let mut report = CleanupReport::default();
    if worktree.exists() {
        match git.remove_worktree(worktree) {
            Ok(()) => report.worktree_removed = true,
            Err(err) => {
                warn!(err = %err, "failed to remove worktree");
                report.errors.push(err.to_string());
            }
        }
    }
    if git.branch_exists(branch) {
        match git.delete_branch(branch) {
            Ok(()) => report.branch_deleted = true,
            Err(err) => {
                warn!(err = %err, "failed to delete branch");
                report.errors.push(err.to_string());
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::NewTask;
    use crate::io::process::CommandOutput;
    use crate::test_support::{FakeRunner, FixedConfirm, ScriptedAi};
    use chrono::Utc;
    use uuid::Uuid;

    fn record() -> TaskRecord {
        TaskRecord::new(
            NewTask {
                id: 42,
                title: "Add retry logic".to_string(),
                description: "Retry failed HTTP calls".to_string(),
                agent: None,
                source_branch: None,
            },
            Uuid::nil(),
            Utc::now(),
        )
    }

    #[test]
    fn merge_refuses_dirty_destination_without_merging() {
        let runner = FakeRunner::new().on("git status", CommandOutput::ok(" M src/lib.rs\n"));
        let dir = tempfile::tempdir().expect("tempdir");
        let task = record();
        let checkout = TaskCheckout {
            task: &task,
            worktree: dir.path(),
            branch: "rover/task-42",
            summaries: Vec::new(),
        };
        let err = merge_task(
            Git::new(dir.path(), &runner),
            &checkout,
            &ScriptedAi::default(),
            &FixedConfirm(true),
            CommitPolicy {
                trailer: None,
                recent_commit_count: 5,
            },
            true,
        )
        .unwrap_err();

        assert!(matches!(err, RoverError::DirtyTree { .. }));
        assert!(!runner.calls().iter().any(|c| c.starts_with("git merge")));
    }

    #[test]
    fn commit_message_falls_back_when_ai_fails() {
        let runner = FakeRunner::new();
        let dir = tempfile::tempdir().expect("tempdir");
        let task = record();
        let checkout = TaskCheckout {
            task: &task,
            worktree: dir.path(),
            branch: "b",
            summaries: Vec::new(),
        };
        let message = commit_message(
            Git::new(dir.path(), &runner),
            &checkout,
            &ScriptedAi::default(),
            CommitPolicy {
                trailer: Some("Co-Authored-By: Rover <noreply@rover.local>"),
                recent_commit_count: 5,
            },
        );
        assert_eq!(
            message,
            "Add retry logic\n\nRetry failed HTTP calls\n\nCo-Authored-By: Rover <noreply@rover.local>"
        );
    }
}
