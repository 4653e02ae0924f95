//! Test helpers: a real git repository in a temp dir plus scripted collaborators.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tempfile::TempDir;

use crate::core::task::TaskRecord;
use crate::error::{Result as RoverResult, RoverError};
use crate::io::ai::{AiCollaborator, AiError, TaskExpansion};
use crate::io::confirm::Confirm;
use crate::io::git::Git;
use crate::io::iteration::PreviousContext;
use crate::io::launcher::{ContainerSpec, Launcher};
use crate::io::process::{CommandOutput, CommandRunner, RunOptions, StreamEnd, SystemRunner};
use crate::io::prompt::CommitContext;

/// A git repository on branch `main` with one commit (`README.md`).
pub struct TestRepo {
    dir: TempDir,
    _remote: Option<TempDir>,
    runner: SystemRunner,
}

impl TestRepo {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let repo = Self {
            dir,
            _remote: None,
            runner: SystemRunner::default(),
        };
        repo.git_cmd(&["init", "-q"])?;
        repo.git_cmd(&["symbolic-ref", "HEAD", "refs/heads/main"])?;
        repo.git_cmd(&["config", "user.email", "rover@example.com"])?;
        repo.git_cmd(&["config", "user.name", "Rover Tests"])?;
        repo.git_cmd(&["config", "commit.gpgsign", "false"])?;
        repo.write("README.md", "# test repo\n")?;
        repo.commit_all("initial commit")?;
        Ok(repo)
    }

    /// Like [`TestRepo::new`], with a bare `origin` that already has `main`.
    pub fn with_remote() -> std::io::Result<Self> {
        let mut repo = Self::new()?;
        let remote = tempfile::tempdir()?;
        run_git(remote.path(), &["init", "-q", "--bare"])?;
        let url = remote.path().to_string_lossy().into_owned();
        repo.git_cmd(&["remote", "add", "origin", &url])?;
        repo.git_cmd(&["push", "-q", "-u", "origin", "main"])?;
        repo._remote = Some(remote);
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn runner(&self) -> &SystemRunner {
        &self.runner
    }

    pub fn git(&self) -> Git<'_> {
        Git::new(self.path(), &self.runner)
    }

    pub fn write(&self, relative: &str, contents: &str) -> std::io::Result<PathBuf> {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn commit_all(&self, message: &str) -> std::io::Result<()> {
        self.git_cmd(&["add", "-A"])?;
        self.git_cmd(&["commit", "-q", "-m", message])
    }

    /// Run git in the repository and fail on non-zero exit.
    pub fn git_cmd(&self, args: &[&str]) -> std::io::Result<()> {
        run_git(self.path(), args)
    }

    /// Capture stdout of a git command run in the repository.
    pub fn git_stdout(&self, args: &[&str]) -> std::io::Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn run_git(dir: &Path, args: &[&str]) -> std::io::Result<()> {
    let output = Command::new("git").args(args).current_dir(dir).output()?;
    if output.status.success() {
        return Ok(());
    }
    Err(std::io::Error::other(format!(
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    )))
}

/// Records command lines and replays scripted outputs.
///
/// Rules match on a command-line prefix at a word boundary; the first matching
/// rule wins. Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct FakeRunner {
    rules: Vec<(String, CommandOutput)>,
    calls: RefCell<Vec<String>>,
    stdins: RefCell<Vec<Option<String>>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, prefix: &str, output: CommandOutput) -> Self {
        self.rules.push((prefix.to_string(), output));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn last_stdin(&self) -> Option<String> {
        self.stdins.borrow().last().cloned().flatten()
    }
}

impl CommandRunner for FakeRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
        options: &RunOptions,
    ) -> std::io::Result<CommandOutput> {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }
        self.calls.borrow_mut().push(line.clone());
        self.stdins.borrow_mut().push(
            options
                .stdin
                .as_deref()
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
        );
        let output = self
            .rules
            .iter()
            .find(|(prefix, _)| {
                line.strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with(' '))
            })
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::ok(""));
        Ok(output)
    }
}

/// AI collaborator with canned answers. Anything unscripted fails with
/// [`AiError::Empty`], which exercises the callers' fallbacks.
#[derive(Default)]
pub struct ScriptedAi {
    pub expansion: Option<TaskExpansion>,
    pub iteration_expansion: Option<TaskExpansion>,
    pub commit_message: Option<String>,
    /// Resolved contents by conflicted path.
    pub resolutions: BTreeMap<String, String>,
    /// Conflicted contents the AI was shown, by path.
    pub seen_conflicts: RefCell<Vec<(String, String)>>,
}

impl AiCollaborator for ScriptedAi {
    fn expand_task(&self, _description: &str) -> Result<TaskExpansion, AiError> {
        self.expansion.clone().ok_or(AiError::Empty)
    }

    fn expand_iteration(
        &self,
        _task: &TaskRecord,
        _instructions: &str,
        _previous: Option<&PreviousContext>,
    ) -> Result<TaskExpansion, AiError> {
        self.iteration_expansion.clone().ok_or(AiError::Empty)
    }

    fn commit_message(&self, _context: &CommitContext) -> Result<String, AiError> {
        self.commit_message.clone().ok_or(AiError::Empty)
    }

    fn resolve_conflict(
        &self,
        path: &str,
        content: &str,
        _recent_commits: &[String],
    ) -> Result<String, AiError> {
        self.seen_conflicts
            .borrow_mut()
            .push((path.to_string(), content.to_string()));
        self.resolutions.get(path).cloned().ok_or(AiError::Empty)
    }
}

/// Container launcher that "runs" the agent by writing files.
#[derive(Default)]
pub struct ScriptedLauncher {
    pub exit_code: i32,
    pub fail_start: bool,
    /// Files written into the task workspace when a container starts.
    pub workspace_files: Vec<(String, String)>,
    /// Files written into the iteration output directory when a container starts.
    pub output_files: Vec<(String, String)>,
    pub log_text: String,
    pub started: RefCell<Vec<ContainerSpec>>,
    pub stopped: RefCell<Vec<String>>,
    pub removed: RefCell<Vec<String>>,
}

impl Launcher for ScriptedLauncher {
    fn start(&self, spec: &ContainerSpec) -> RoverResult<String> {
        if self.fail_start {
            return Err(RoverError::Launch("docker daemon unavailable".to_string()));
        }
        for (relative, contents) in &self.workspace_files {
            let path = spec.workspace.join(relative);
            fs::write(&path, contents).map_err(|e| RoverError::file("write", &path, e))?;
        }
        for (relative, contents) in &self.output_files {
            let path = spec.output.join(relative);
            fs::write(&path, contents).map_err(|e| RoverError::file("write", &path, e))?;
        }
        self.started.borrow_mut().push(spec.clone());
        Ok(format!("container-{}", spec.name))
    }

    fn wait(&self, _name: &str, _timeout: Duration) -> RoverResult<i32> {
        Ok(self.exit_code)
    }

    fn stop(&self, name: &str) -> RoverResult<()> {
        self.stopped.borrow_mut().push(name.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> RoverResult<()> {
        self.removed.borrow_mut().push(name.to_string());
        Ok(())
    }

    fn logs(&self, _name: &str) -> RoverResult<String> {
        Ok(self.log_text.clone())
    }

    fn follow_logs(&self, _name: &str) -> RoverResult<StreamEnd> {
        Ok(StreamEnd::Interrupted)
    }
}

/// Answers every confirmation with the same value.
#[derive(Debug, Clone, Copy)]
pub struct FixedConfirm(pub bool);

impl Confirm for FixedConfirm {
    fn confirm(&self, _question: &str) -> bool {
        self.0
    }
}

/// Answers confirmations in order; `false` once exhausted.
#[derive(Debug, Default)]
pub struct ConfirmSequence {
    answers: RefCell<VecDeque<bool>>,
    pub questions: RefCell<Vec<String>>,
}

impl ConfirmSequence {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: RefCell::new(answers.into_iter().collect()),
            questions: RefCell::default(),
        }
    }
}

impl Confirm for ConfirmSequence {
    fn confirm(&self, question: &str) -> bool {
        self.questions.borrow_mut().push(question.to_string());
        self.answers.borrow_mut().pop_front().unwrap_or(false)
    }
}
