//! Git adapter for rover commands.
//!
//! Every repository operation is a blocking `git` subprocess issued through a
//! [`CommandRunner`]. Probes (`is_repo`, `has_commits`, ...) return plain
//! booleans; everything else returns a typed [`VcsError`] on failure.

use std::fs;
use std::path::Path;

use tracing::{debug, instrument, warn};

use crate::core::conflict::conflicted_paths;
use crate::core::diff::untracked_file_diff;
use crate::error::VcsError;
use crate::io::process::{CommandOutput, CommandRunner, RunOptions};

/// Remote that rover pushes to.
pub const REMOTE: &str = "origin";

/// Options for [`Git::diff`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffOptions {
    /// Restrict the diff to this path.
    pub path: Option<String>,
    /// Compare the working tree against this branch instead of the index.
    pub branch: Option<String>,
    pub name_only: bool,
    /// Append untracked files as if diffed against an empty file.
    pub include_untracked: bool,
}

/// Options for [`Git::uncommitted_changes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusOptions {
    pub include_untracked: bool,
}

impl Default for StatusOptions {
    fn default() -> Self {
        Self {
            include_untracked: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushOptions {
    pub set_upstream: bool,
}

/// Result of [`Git::merge_branch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    Merged,
    /// The merge stopped with these unmerged paths; the repository is mid-merge.
    Conflicts(Vec<String>),
}

/// Wrapper for executing git commands in a working directory.
#[derive(Clone, Copy)]
pub struct Git<'r> {
    workdir: &'r Path,
    runner: &'r dyn CommandRunner,
}

impl<'r> Git<'r> {
    pub fn new(workdir: &'r Path, runner: &'r dyn CommandRunner) -> Self {
        Self { workdir, runner }
    }

    pub fn workdir(&self) -> &Path {
        self.workdir
    }

    /// Same runner, different working directory (e.g. a task worktree).
    pub fn at(&self, workdir: &'r Path) -> Self {
        Self::new(workdir, self.runner)
    }

    pub fn is_repo(&self) -> bool {
        self.probe(&["rev-parse", "--is-inside-work-tree"])
    }

    pub fn has_commits(&self) -> bool {
        self.probe(&["rev-parse", "--verify", "--quiet", "HEAD"])
    }

    /// Return the current branch name (errors on detached HEAD).
    pub fn current_branch(&self) -> Result<String, VcsError> {
        let name = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = name.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(VcsError::CommandFailed {
                command: "rev-parse --abbrev-ref HEAD".to_string(),
                stderr: "detached HEAD".to_string(),
            });
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> bool {
        self.probe(&[
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/heads/{branch}"),
        ])
    }

    /// Check whether the remote-tracking branch `origin/<branch>` exists.
    pub fn remote_branch_exists(&self, branch: &str) -> bool {
        self.probe(&[
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/remotes/{REMOTE}/{branch}"),
        ])
    }

    /// Resolve the main branch: remote HEAD, then local `main`/`master`, else `main`.
    pub fn main_branch(&self) -> String {
        if let Ok(out) = self.run_checked(&["symbolic-ref", &format!("refs/remotes/{REMOTE}/HEAD")])
            && let Some(name) = out
                .stdout
                .trim()
                .strip_prefix(&format!("refs/remotes/{REMOTE}/"))
            && !name.is_empty()
        {
            return name.to_string();
        }
        for candidate in ["main", "master"] {
            if self.branch_exists(candidate) {
                return candidate.to_string();
            }
        }
        "main".to_string()
    }

    /// Create `branch` (from `base`, or HEAD) checked out in a new worktree at `path`.
    #[instrument(skip_all, fields(path = %path.display(), branch = %branch))]
    pub fn create_worktree(
        &self,
        path: &Path,
        branch: &str,
        base: Option<&str>,
    ) -> Result<(), VcsError> {
        let path_arg = path.to_string_lossy();
        let mut args = vec!["worktree", "add", "-b", branch, path_arg.as_ref()];
        if let Some(base) = base {
            args.push(base);
        }
        debug!("creating worktree");
        self.run_checked(&args)?;
        Ok(())
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn remove_worktree(&self, path: &Path) -> Result<(), VcsError> {
        let path_arg = path.to_string_lossy();
        self.run_checked(&["worktree", "remove", "--force", path_arg.as_ref()])?;
        self.run_checked(&["worktree", "prune"])?;
        Ok(())
    }

    pub fn delete_branch(&self, branch: &str) -> Result<(), VcsError> {
        self.run_checked(&["branch", "-D", branch])?;
        Ok(())
    }

    /// Diff of the working tree, optionally including untracked files.
    #[instrument(skip_all)]
    pub fn diff(&self, options: &DiffOptions) -> Result<String, VcsError> {
        let mut args = vec!["diff"];
        if options.name_only {
            args.push("--name-only");
        }
        if let Some(branch) = &options.branch {
            args.push(branch);
        }
        if let Some(path) = &options.path {
            args.push("--");
            args.push(path);
        }
        let mut out = self.run_capture(&args)?;

        if options.include_untracked {
            for file in self.untracked_files(options.path.as_deref())? {
                if options.name_only {
                    out.push_str(&file);
                    out.push('\n');
                    continue;
                }
                let path = self.workdir.join(&file);
                let contents =
                    fs::read(&path).map_err(|source| VcsError::Read { path, source })?;
                out.push_str(&untracked_file_diff(&file, &contents));
            }
        }
        Ok(out)
    }

    /// Untracked, non-ignored files (optionally under `path`).
    pub fn untracked_files(&self, path: Option<&str>) -> Result<Vec<String>, VcsError> {
        let mut args = vec!["ls-files", "-z", "--others", "--exclude-standard"];
        if let Some(path) = path {
            args.push("--");
            args.push(path);
        }
        let out = self.run_capture(&args)?;
        Ok(out
            .split('\0')
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Raw porcelain status lines; empty means a clean tree.
    pub fn uncommitted_changes(&self, options: StatusOptions) -> Result<Vec<String>, VcsError> {
        let untracked = if options.include_untracked {
            "-uall"
        } else {
            "-uno"
        };
        let out = self.run_capture(&["status", "--porcelain=v1", untracked])?;
        Ok(out
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn has_uncommitted_changes(&self) -> Result<bool, VcsError> {
        Ok(!self.uncommitted_changes(StatusOptions::default())?.is_empty())
    }

    /// True if `src` has commits not reachable from `target` (default: HEAD).
    pub fn has_unmerged_commits(&self, src: &str, target: Option<&str>) -> Result<bool, VcsError> {
        let range = format!("{}..{src}", target.unwrap_or("HEAD"));
        let out = self.run_capture(&["rev-list", "--count", &range])?;
        Ok(parse_count(&out) > 0)
    }

    /// True if `branch` has commits its remote-tracking branch lacks.
    ///
    /// A branch that was never pushed counts as unpushed when it is ahead of
    /// the main branch.
    pub fn has_unpushed_commits(&self, branch: &str) -> Result<bool, VcsError> {
        if self.remote_branch_exists(branch) {
            return self.has_unmerged_commits(branch, Some(&format!("{REMOTE}/{branch}")));
        }
        let main = self.main_branch();
        if !self.branch_exists(&main) {
            return Ok(true);
        }
        self.has_unmerged_commits(branch, Some(&main))
    }

    /// Subjects of the latest `count` commits on `branch` (default: HEAD).
    pub fn recent_commits(&self, branch: Option<&str>, count: usize) -> Result<Vec<String>, VcsError> {
        let limit = format!("-{count}");
        let mut args = vec!["log", limit.as_str(), "--pretty=format:%s"];
        if let Some(branch) = branch {
            args.push(branch);
        }
        let out = self.run_capture(&args)?;
        Ok(out
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }

    pub fn add(&self, paths: &[&str]) -> Result<(), VcsError> {
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.run_checked(&args)?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<(), VcsError> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool, VcsError> {
        let out = self.run_capture(&["diff", "--cached", "--name-only"])?;
        Ok(!out.trim().is_empty())
    }

    /// Stage everything and commit it.
    ///
    /// If nothing ends up staged, this returns `Ok(false)` and does nothing.
    #[instrument(skip_all)]
    pub fn add_and_commit(&self, message: &str) -> Result<bool, VcsError> {
        self.add_all()?;
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    /// Non-fast-forward merge of `branch` into the current branch.
    #[instrument(skip_all, fields(branch = %branch))]
    pub fn merge_branch(&self, branch: &str, message: &str) -> Result<MergeResult, VcsError> {
        let out = self.run(&["merge", "--no-ff", "-m", message, branch])?;
        if out.success() {
            debug!("merge succeeded");
            return Ok(MergeResult::Merged);
        }
        let conflicts = self.merge_conflicts()?;
        if conflicts.is_empty() {
            return Err(command_failed(&["merge", "--no-ff", branch], &out));
        }
        warn!(count = conflicts.len(), "merge stopped on conflicts");
        Ok(MergeResult::Conflicts(conflicts))
    }

    pub fn abort_merge(&self) -> Result<(), VcsError> {
        self.run_checked(&["merge", "--abort"])?;
        Ok(())
    }

    /// Conclude an in-progress merge with the prepared message.
    pub fn continue_merge(&self) -> Result<(), VcsError> {
        self.run_checked(&["-c", "core.editor=true", "merge", "--continue"])?;
        Ok(())
    }

    /// Paths with unmerged porcelain codes.
    pub fn merge_conflicts(&self) -> Result<Vec<String>, VcsError> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-z"])?;
        Ok(conflicted_paths(&out))
    }

    /// Push `branch`. Without `set_upstream`, a branch that was never pushed
    /// fails with [`VcsError::NoUpstream`].
    #[instrument(skip_all, fields(branch = %branch, set_upstream = options.set_upstream))]
    pub fn push(&self, branch: &str, options: PushOptions) -> Result<(), VcsError> {
        let args: Vec<&str> = if options.set_upstream {
            vec!["push", "--set-upstream", REMOTE, branch]
        } else {
            vec!["push"]
        };
        let out = self.run(&args)?;
        if out.success() {
            return Ok(());
        }
        if is_missing_upstream(&out.stderr) {
            debug!("branch has no upstream yet");
            return Err(VcsError::NoUpstream {
                branch: branch.to_string(),
            });
        }
        Err(command_failed(&args, &out))
    }

    fn probe(&self, args: &[&str]) -> bool {
        self.run(args).map(|out| out.success()).unwrap_or(false)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String, VcsError> {
        Ok(self.run_checked(args)?.stdout)
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput, VcsError> {
        let output = self.run(args)?;
        if !output.success() {
            return Err(command_failed(args, &output));
        }
        if output.stdout_truncated {
            warn!(args = %args.join(" "), "git output truncated");
            return Err(VcsError::OutputTruncated {
                command: args.join(" "),
            });
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput, VcsError> {
        debug!(args = %args.join(" "), workdir = %self.workdir.display(), "git");
        self.runner
            .run("git", args, &RunOptions::in_dir(self.workdir))
            .map_err(|source| VcsError::Spawn {
                command: args.join(" "),
                source,
            })
    }
}

fn command_failed(args: &[&str], output: &CommandOutput) -> VcsError {
    let stderr = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };
    VcsError::CommandFailed {
        command: args.join(" "),
        stderr: stderr.to_string(),
    }
}

fn is_missing_upstream(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("has no upstream branch") || lower.contains("no upstream configured")
}

fn parse_count(out: &str) -> u64 {
    out.trim().parse().unwrap_or(0)
}
