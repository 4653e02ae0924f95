//! Task orchestration: the façade behind every rover command.
//!
//! Sequences the task store, git adapter, iteration manager and container
//! launcher. This is the only layer that catches adapter errors and turns them
//! into task state (e.g. a failed workspace setup resets the task to NEW).

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::commit::title_from_description;
use crate::core::task::{ExecutionUpdate, NewTask, TaskRecord, timestamp};
use crate::error::{Result, RoverError, VcsError};
use crate::io::ai::AiCollaborator;
use crate::io::config::RoverConfig;
use crate::io::confirm::Confirm;
use crate::io::git::{DiffOptions, Git};
use crate::io::iteration::{IterationManager, IterationRecord, IterationStatus, PreviousContext};
use crate::io::launcher::{
    ContainerSpec, Launcher, OUTPUT_MOUNT, WORKSPACE_MOUNT, container_name, expand_command,
};
use crate::io::layout::{RoverPaths, ensure_layout};
use crate::io::process::StreamEnd;
use crate::io::prompt::{AgentPrompt, PromptEngine};
use crate::io::task_store::{TaskListing, TaskStore};
use crate::merge::{
    CleanupReport, CommitPolicy, MergeOutcome, PushOutcome, TaskCheckout, cleanup_task,
    merge_task, push_task,
};

/// Collaborators the orchestrator drives.
pub struct Services<'a> {
    pub git: Git<'a>,
    pub ai: &'a dyn AiCollaborator,
    pub launcher: &'a dyn Launcher,
    pub confirm: &'a dyn Confirm,
}

#[derive(Debug, Clone, Default)]
pub struct StartRequest {
    pub description: String,
    /// Skip AI title expansion and use this title.
    pub title: Option<String>,
    pub agent: Option<String>,
    /// Base branch for the task branch; defaults to the current branch.
    pub source_branch: Option<String>,
    /// Return once the container is running instead of waiting for it.
    pub detach: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub task: TaskRecord,
    pub iteration: u32,
    pub container: String,
}

#[derive(Debug, Clone, Default)]
pub struct DiffRequest {
    pub path: Option<String>,
    /// Compare against this branch instead of the workspace index.
    pub branch: Option<String>,
    pub name_only: bool,
    /// Leave out files git does not track yet.
    pub tracked_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub task: TaskRecord,
    pub iterations: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration: Option<IterationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PreviousContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<IterationStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LogsOutcome {
    Snapshot { container: String, logs: String },
    Followed { container: String, interrupted: bool },
}

#[derive(Debug, Clone, Serialize)]
pub struct ResetOutcome {
    pub task: TaskRecord,
    pub cleanup: CleanupReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteOutcome {
    pub id: u64,
    pub cleanup: CleanupReport,
}

pub struct Orchestrator<'a> {
    paths: RoverPaths,
    config: RoverConfig,
    store: TaskStore,
    prompts: PromptEngine,
    services: Services<'a>,
}

impl<'a> Orchestrator<'a> {
    /// Orchestrator for the project checked out at `services.git`'s workdir.
    pub fn new(config: RoverConfig, services: Services<'a>) -> Result<Self> {
        let paths = RoverPaths::new(services.git.workdir());
        Ok(Self {
            store: TaskStore::new(paths.clone()),
            paths,
            config,
            prompts: PromptEngine::new()?,
            services,
        })
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn paths(&self) -> &RoverPaths {
        &self.paths
    }

    fn iterations(&self, id: u64) -> IterationManager {
        IterationManager::new(id, self.paths.task(id).iterations_dir)
    }

    fn git(&self) -> Git<'a> {
        self.services.git
    }

    fn policy(&self) -> CommitPolicy<'_> {
        CommitPolicy {
            trailer: self.config.trailer(),
            recent_commit_count: self.config.recent_commit_count,
        }
    }

    /// Create a task, give it a workspace and run its first iteration.
    #[instrument(skip_all)]
    pub fn start(&self, request: StartRequest) -> Result<RunOutcome> {
        let git = self.git();
        if !git.is_repo() || !git.has_commits() {
            return Err(VcsError::NotARepository {
                path: git.workdir().to_path_buf(),
            }
            .into());
        }
        ensure_layout(&self.paths)?;

        let description = request.description.trim().to_string();
        let (title, description) = match request.title.filter(|t| !t.trim().is_empty()) {
            Some(title) => (title.trim().to_string(), description),
            None => self.expand_task(&description),
        };

        let id = self.store.next_id()?;
        let task = self.store.create(NewTask {
            id,
            title,
            description,
            agent: Some(request.agent.unwrap_or_else(|| self.config.agent.clone())),
            source_branch: request.source_branch,
        })?;
        let task = self.store.mark_in_progress(&task)?;
        let task = self.setup_workspace(&task)?;

        self.iterations(id)
            .create_initial(&task.title, &task.description, Utc::now())?;
        self.run_iteration(task, 1, request.detach)
    }

    fn expand_task(&self, description: &str) -> (String, String) {
        match self.services.ai.expand_task(description) {
            Ok(expansion) => {
                let description = if expansion.description.is_empty() {
                    description.to_string()
                } else {
                    expansion.description
                };
                (expansion.title, description)
            }
            Err(err) => {
                warn!(err = %err, "title expansion unavailable, deriving from description");
                (title_from_description(description), description.to_string())
            }
        }
    }

    /// Create the worktree and branch; on failure the task goes back to NEW.
    fn setup_workspace(&self, task: &TaskRecord) -> Result<TaskRecord> {
        let git = self.git();
        let worktree = self.paths.task(task.id).workspace_dir;
        let branch = branch_name(task);
        let created = match &task.source_branch {
            Some(base) => Ok(base.clone()),
            None => git.current_branch(),
        }
        .and_then(|base| git.create_worktree(&worktree, &branch, Some(&base)));

        if let Err(err) = created {
            warn!(id = task.id, err = %err, "workspace setup failed, resetting task");
            self.store.reset_to_new(task)?;
            return Err(err.into());
        }
        info!(id = task.id, branch = %branch, "workspace ready");
        self.store.set_workspace(task, worktree, branch)
    }

    /// Launch iteration `number` and, unless detached, wait for it to finish.
    #[instrument(skip_all, fields(id = task.id, number = number, detach = detach))]
    fn run_iteration(&self, task: TaskRecord, number: u32, detach: bool) -> Result<RunOutcome> {
        let Some((worktree, _)) = task.workspace() else {
            return Err(RoverError::MissingWorkspace { id: task.id });
        };
        let manager = self.iterations(task.id);
        let iteration = manager.load(number)?;
        let previous = iteration.previous_context.as_ref();
        let prompt = self.prompts.agent(&AgentPrompt {
            task_id: task.id,
            iteration: number,
            title: &iteration.title,
            description: &iteration.description,
            previous,
        })?;
        manager.write_prompt(number, &prompt)?;
        manager.clear_status(number)?;

        let name = container_name(task.id, number);
        let spec = ContainerSpec {
            name: name.clone(),
            image: self.config.image.clone(),
            workspace: worktree.clone(),
            output: manager.paths(number).dir,
            workdir: WORKSPACE_MOUNT.to_string(),
            command: expand_command(
                &self.config.agent_command,
                &format!("{OUTPUT_MOUNT}/prompt.md"),
            ),
            env: vec![
                ("ROVER_TASK_ID".to_string(), task.id.to_string()),
                ("ROVER_ITERATION".to_string(), number.to_string()),
                ("ROVER_AGENT".to_string(), task.agent_or_default().to_string()),
            ],
        };

        if let Err(err) = self.services.launcher.remove(&name) {
            debug!(err = %err, "no previous container to remove");
        }
        let container_id = match self.services.launcher.start(&spec) {
            Ok(id) => id,
            Err(err) => {
                self.store.mark_failed(&task, err.to_string())?;
                return Err(err);
            }
        };
        let task = self.store.set_container_info(&task, container_id, "running")?;
        if detach {
            return Ok(RunOutcome {
                task,
                iteration: number,
                container: name,
            });
        }

        let exit_code = match self.services.launcher.wait(&name, self.config.agent_timeout()) {
            Ok(code) => code,
            Err(err) => {
                self.store.mark_failed(&task, err.to_string())?;
                return Err(err);
            }
        };
        let reported = IterationStatus {
            status: if exit_code == 0 { "completed" } else { "failed" }.to_string(),
            exit_code: Some(exit_code),
            error: (exit_code != 0).then(|| format!("agent exited with code {exit_code}")),
            updated_at: Some(timestamp(Utc::now())),
        };
        let status = manager.record_exit(number, &reported)?;
        let task = self.apply_execution_status(&task, &status)?;
        Ok(RunOutcome {
            task,
            iteration: number,
            container: name,
        })
    }

    /// Fold a launcher status into the record, finishing the task when terminal.
    fn apply_execution_status(
        &self,
        task: &TaskRecord,
        status: &IterationStatus,
    ) -> Result<TaskRecord> {
        let mut task = task.clone();
        if task.execution_status.as_deref() != Some(status.status.as_str()) {
            task = self.store.update_execution_status(
                &task,
                ExecutionUpdate {
                    status: status.status.clone(),
                    exit_code: status.exit_code,
                    error: status.error.clone(),
                },
            )?;
        }
        if task.status.is_active() {
            match status.status.as_str() {
                "completed" => task = self.store.mark_completed(&task)?,
                "failed" | "error" => {
                    let error = status
                        .error
                        .clone()
                        .unwrap_or_else(|| "agent run failed".to_string());
                    task = self.store.mark_failed(&task, error)?;
                }
                _ => {}
            }
        }
        Ok(task)
    }

    /// Start a refinement iteration seeded with the previous iteration's output.
    #[instrument(skip_all, fields(id = id))]
    pub fn iterate(&self, id: u64, instructions: &str, detach: bool) -> Result<RunOutcome> {
        let task = self.store.load(id)?;
        self.require_workspace(&task)?;

        let manager = self.iterations(id);
        let previous = manager.latest_context()?;
        let number = manager.latest()?.unwrap_or(0).max(task.iterations) + 1;

        let (title, description) =
            match self
                .services
                .ai
                .expand_iteration(&task, instructions, previous.as_ref())
            {
                Ok(expansion) if !expansion.title.trim().is_empty() => {
                    (expansion.title, expansion.description)
                }
                Ok(_) => (task.title.clone(), instructions.trim().to_string()),
                Err(err) => {
                    warn!(err = %err, "iteration expansion unavailable, using instructions");
                    (task.title.clone(), instructions.trim().to_string())
                }
            };

        manager.create_iteration(number, &title, &description, previous, Utc::now())?;
        let mut task = task;
        while task.iterations < number {
            task = self.store.increment_iteration(&task)?;
        }
        let task = self.store.mark_iterating(&task)?;
        self.run_iteration(task, number, detach)
    }

    fn require_workspace(&self, task: &TaskRecord) -> Result<(PathBuf, String)> {
        match task.workspace() {
            Some((path, branch)) if path.exists() => Ok((path.clone(), branch.to_string())),
            _ => Err(RoverError::MissingWorkspace { id: task.id }),
        }
    }

    /// Every task, with running ones refreshed from their latest `status.json`.
    pub fn list(&self) -> Result<TaskListing> {
        let mut listing = self.store.list()?;
        listing.tasks = listing
            .tasks
            .into_iter()
            .map(|task| self.refresh(task))
            .collect();
        Ok(listing)
    }

    /// Best-effort status refresh; failures are logged and the record kept.
    fn refresh(&self, task: TaskRecord) -> TaskRecord {
        if !task.status.is_active() {
            return task;
        }
        match self.refresh_status(&task) {
            Ok(task) => task,
            Err(err) => {
                warn!(id = task.id, err = %err, "could not refresh execution status");
                task
            }
        }
    }

    fn refresh_status(&self, task: &TaskRecord) -> Result<TaskRecord> {
        let manager = self.iterations(task.id);
        let mut task = task.clone();
        if let Some(number) = manager.latest()?
            && let Some(status) = manager.read_status(number)?
        {
            task = self.apply_execution_status(&task, &status)?;
        }
        self.store.mark_status_checked(&task)
    }

    pub fn inspect(&self, id: u64, iteration: Option<u32>) -> Result<Inspection> {
        let task = self.refresh(self.store.load(id)?);
        let manager = self.iterations(id);
        let iterations = manager.list()?;
        let number = match iteration {
            Some(number) => Some(number),
            None => iterations.last().copied(),
        };
        let (iteration, output, execution) = match number {
            Some(number) => (
                Some(manager.load(number)?),
                Some(manager.context_of(number)?).filter(|c| !c.is_empty()),
                manager.read_status(number)?,
            ),
            None => (None, None, None),
        };
        Ok(Inspection {
            task,
            iterations,
            iteration,
            output,
            execution,
        })
    }

    pub fn diff(&self, id: u64, request: &DiffRequest) -> Result<String> {
        let task = self.store.load(id)?;
        let (worktree, _) = self.require_workspace(&task)?;
        let diff = self.git().at(&worktree).diff(&DiffOptions {
            path: request.path.clone(),
            branch: request.branch.clone(),
            name_only: request.name_only,
            include_untracked: !request.tracked_only,
        })?;
        Ok(diff)
    }

    pub fn logs(&self, id: u64, iteration: Option<u32>, follow: bool) -> Result<LogsOutcome> {
        let task = self.store.load(id)?;
        let number = match iteration {
            Some(number) => number,
            None => self.iterations(id).latest()?.unwrap_or(task.iterations),
        };
        let container = container_name(id, number);
        if follow {
            let end = self.services.launcher.follow_logs(&container)?;
            return Ok(LogsOutcome::Followed {
                container,
                interrupted: end == StreamEnd::Interrupted,
            });
        }
        let logs = self.services.launcher.logs(&container)?;
        Ok(LogsOutcome::Snapshot { container, logs })
    }

    fn checkout<'t>(
        &self,
        task: &'t TaskRecord,
        worktree: &'t Path,
        branch: &'t str,
    ) -> TaskCheckout<'t> {
        let summaries = self.iterations(task.id).summaries().unwrap_or_else(|err| {
            warn!(err = %err, "could not read iteration summaries");
            Vec::new()
        });
        TaskCheckout {
            task,
            worktree,
            branch,
            summaries,
        }
    }

    #[instrument(skip_all, fields(id = id))]
    pub fn push(&self, id: u64, message: Option<&str>) -> Result<PushOutcome> {
        let task = self.store.load(id)?;
        let (worktree, branch) = self.require_workspace(&task)?;
        let checkout = self.checkout(&task, &worktree, &branch);
        let outcome = push_task(
            self.git(),
            &checkout,
            self.services.ai,
            self.policy(),
            message,
        )?;
        if matches!(outcome, PushOutcome::Pushed { .. }) {
            self.store.mark_pushed(&task)?;
        }
        Ok(outcome)
    }

    #[instrument(skip_all, fields(id = id, cleanup = cleanup))]
    pub fn merge(&self, id: u64, cleanup: bool) -> Result<MergeOutcome> {
        let task = self.store.load(id)?;
        let (worktree, branch) = self.require_workspace(&task)?;
        let checkout = self.checkout(&task, &worktree, &branch);
        let outcome = merge_task(
            self.git(),
            &checkout,
            self.services.ai,
            self.services.confirm,
            self.policy(),
            cleanup,
        )?;
        if let MergeOutcome::Merged { cleanup, .. } = &outcome {
            let mut task = self.store.mark_merged(&task)?;
            if cleanup
                .as_ref()
                .is_some_and(|report| report.worktree_removed && report.errors.is_empty())
            {
                task = self.store.clear_workspace(&task)?;
            }
            debug!(status = %task.status, "merge recorded");
        }
        Ok(outcome)
    }

    /// Stop and remove the task's latest container.
    pub fn stop(&self, id: u64) -> Result<TaskRecord> {
        let task = self.store.load(id)?;
        let number = self.iterations(id).latest()?.unwrap_or(task.iterations);
        let container = container_name(id, number);
        self.services.launcher.stop(&container)?;
        if let Err(err) = self.services.launcher.remove(&container) {
            warn!(err = %err, "failed to remove stopped container");
        }
        self.store.update_execution_status(
            &task,
            ExecutionUpdate {
                status: "stopped".to_string(),
                exit_code: None,
                error: None,
            },
        )
    }

    /// Re-enter IN_PROGRESS and re-run the latest iteration.
    #[instrument(skip_all, fields(id = id))]
    pub fn restart(&self, id: u64, detach: bool) -> Result<RunOutcome> {
        let task = self.store.load(id)?;
        let task = self.store.restart(&task)?;
        let task = match self.require_workspace(&task) {
            Ok(_) => task,
            Err(_) => self.setup_workspace(&task)?,
        };
        let manager = self.iterations(id);
        let number = match manager.latest()? {
            Some(number) => number,
            None => {
                manager.create_initial(&task.title, &task.description, Utc::now())?;
                1
            }
        };
        self.run_iteration(task, number, detach)
    }

    /// Drop the workspace and branch and return the task to NEW.
    #[instrument(skip_all, fields(id = id))]
    pub fn reset(&self, id: u64) -> Result<ResetOutcome> {
        let task = self.store.load(id)?;
        let cleanup = self.teardown(&task);
        let task = self.store.clear_workspace(&task)?;
        let task = self.store.reset_to_new(&task)?;
        Ok(ResetOutcome { task, cleanup })
    }

    /// Remove the task's container, worktree, branch and directory.
    #[instrument(skip_all, fields(id = id))]
    pub fn delete(&self, id: u64) -> Result<DeleteOutcome> {
        let task = self.store.load(id)?;
        let cleanup = self.teardown(&task);
        self.store.delete(id)?;
        Ok(DeleteOutcome { id, cleanup })
    }

    /// Best-effort removal of everything a task owns outside its record.
    fn teardown(&self, task: &TaskRecord) -> CleanupReport {
        if task.status.is_active() {
            let number = self
                .iterations(task.id)
                .latest()
                .ok()
                .flatten()
                .unwrap_or(task.iterations);
            if let Err(err) = self.services.launcher.stop(&container_name(task.id, number)) {
                warn!(err = %err, "failed to stop container");
            }
        }
        for number in self.iterations(task.id).list().unwrap_or_default() {
            if let Err(err) = self.services.launcher.remove(&container_name(task.id, number)) {
                debug!(err = %err, "container already gone");
            }
        }
        let worktree = self.paths.task(task.id).workspace_dir;
        let worktree = task.worktree_path.clone().unwrap_or(worktree);
        let branch = task.branch_name.clone().unwrap_or_else(|| branch_name(task));
        cleanup_task(self.git(), &worktree, &branch)
    }
}

/// `rover/task-<id>-<first 8 chars of the uuid>`.
pub fn branch_name(task: &TaskRecord) -> String {
    let short: String = task.uuid.chars().filter(|c| *c != '-').take(8).collect();
    format!("rover/task-{}-{short}", task.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn branch_name_uses_id_and_uuid_prefix() {
        let task = TaskRecord::new(
            NewTask {
                id: 42,
                title: "Add retry logic".to_string(),
                description: "d".to_string(),
                agent: None,
                source_branch: None,
            },
            Uuid::parse_str("1b4e28ba-2fa1-11d2-883f-0016d3cca427").expect("uuid"),
            Utc::now(),
        );
        assert_eq!(branch_name(&task), "rover/task-42-1b4e28ba");
    }
}
