//! The persisted task record and its pure transition function.
//!
//! A [`TaskRecord`] is an immutable value: every change goes through
//! [`transition`], which returns a new record and never touches the disk.
//! Persistence happens separately in the task store.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::status::TaskStatus;

/// Schema version written into every record the current code saves.
pub const SCHEMA_VERSION: &str = "1.1";

/// Agent used when neither the request nor the config names one.
pub const DEFAULT_AGENT: &str = "claude";

/// Persisted task record (`.rover/tasks/<id>/description.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: u64,
    /// Stable identity that survives id reuse and migration.
    pub uuid: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_iteration_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status_check: Option<String>,
    pub iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub restart_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_restart_at: Option<String>,
    pub version: String,
}

/// Inputs for creating a brand-new task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub agent: Option<String>,
    pub source_branch: Option<String>,
}

/// Execution details reported by the container launcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionUpdate {
    pub status: String,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
}

/// Everything that may happen to a task record.
///
/// The source status is never checked: any event may be applied in any state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Started,
    Iterating,
    Completed,
    Failed { error: String },
    Merged,
    Pushed,
    Reset,
    Restarted,
    IterationAdded,
    WorkspaceAssigned { path: PathBuf, branch: String },
    WorkspaceCleared,
    TitleChanged(String),
    DescriptionChanged(String),
    ContainerAssigned { container_id: String, execution_status: String },
    ExecutionUpdated(ExecutionUpdate),
    StatusChecked,
}

impl TaskRecord {
    pub fn new(task: NewTask, uuid: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: task.id,
            uuid: uuid.to_string(),
            title: task.title,
            description: task.description,
            status: TaskStatus::New,
            created_at: timestamp(now),
            started_at: None,
            completed_at: None,
            failed_at: None,
            last_iteration_at: None,
            last_status_check: None,
            iterations: 1,
            worktree_path: None,
            branch_name: None,
            agent: task.agent,
            source_branch: task.source_branch,
            container_id: None,
            execution_status: None,
            running_at: None,
            error_at: None,
            exit_code: None,
            error: None,
            restart_count: 0,
            last_restart_at: None,
            version: SCHEMA_VERSION.to_string(),
        }
    }

    pub fn agent_or_default(&self) -> &str {
        self.agent.as_deref().unwrap_or(DEFAULT_AGENT)
    }

    /// Worktree path and branch, when a workspace has been assigned.
    pub fn workspace(&self) -> Option<(&PathBuf, &str)> {
        match (&self.worktree_path, &self.branch_name) {
            (Some(path), Some(branch)) => Some((path, branch.as_str())),
            _ => None,
        }
    }
}

/// Render `now` the way every timestamp field is stored.
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Apply `event` to `record`, returning the updated record.
pub fn transition(record: &TaskRecord, event: TaskEvent, now: DateTime<Utc>) -> TaskRecord {
    let mut next = record.clone();
    let stamp = timestamp(now);
    match event {
        TaskEvent::Started => {
            next.status = TaskStatus::InProgress;
            next.started_at.get_or_insert(stamp);
        }
        TaskEvent::Iterating => {
            next.status = TaskStatus::Iterating;
            next.last_iteration_at = Some(stamp);
        }
        TaskEvent::Completed => {
            next.status = TaskStatus::Completed;
            next.completed_at = Some(stamp);
        }
        TaskEvent::Failed { error } => {
            next.status = TaskStatus::Failed;
            next.failed_at = Some(stamp);
            next.error = Some(error);
        }
        TaskEvent::Merged => {
            next.status = TaskStatus::Merged;
            next.completed_at.get_or_insert(stamp);
        }
        TaskEvent::Pushed => {
            next.status = TaskStatus::Pushed;
            next.completed_at.get_or_insert(stamp);
        }
        TaskEvent::Reset => {
            next.status = TaskStatus::New;
            next.started_at = None;
            next.completed_at = None;
            next.failed_at = None;
            next.error = None;
        }
        TaskEvent::Restarted => {
            next.status = TaskStatus::InProgress;
            next.restart_count += 1;
            next.last_restart_at = Some(stamp.clone());
            next.started_at = Some(stamp);
            next.completed_at = None;
            next.failed_at = None;
            next.error = None;
        }
        TaskEvent::IterationAdded => {
            next.iterations += 1;
            next.last_iteration_at = Some(stamp);
        }
        TaskEvent::WorkspaceAssigned { path, branch } => {
            next.worktree_path = Some(path);
            next.branch_name = Some(branch);
        }
        TaskEvent::WorkspaceCleared => {
            next.worktree_path = None;
            next.branch_name = None;
            next.container_id = None;
        }
        TaskEvent::TitleChanged(title) => next.title = title,
        TaskEvent::DescriptionChanged(description) => next.description = description,
        TaskEvent::ContainerAssigned {
            container_id,
            execution_status,
        } => {
            next.container_id = Some(container_id);
            if execution_status == "running" {
                next.running_at = Some(stamp);
            }
            next.execution_status = Some(execution_status);
        }
        TaskEvent::ExecutionUpdated(update) => {
            match update.status.as_str() {
                "running" => next.running_at = Some(stamp),
                "failed" | "error" => {
                    next.error_at = Some(stamp);
                    if update.error.is_some() {
                        next.error = update.error;
                    }
                }
                _ => {}
            }
            if update.exit_code.is_some() {
                next.exit_code = update.exit_code;
            }
            next.execution_status = Some(update.status);
        }
        TaskEvent::StatusChecked => next.last_status_check = Some(stamp),
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0)
            .single()
            .expect("valid time")
    }

    fn task(id: u64, title: &str) -> TaskRecord {
        TaskRecord::new(
            NewTask {
                id,
                title: title.to_string(),
                description: "make it retry".to_string(),
                agent: None,
                source_branch: None,
            },
            Uuid::nil(),
            at(0),
        )
    }

    #[test]
    fn new_task_starts_in_new_with_one_iteration() {
        let record = task(1, "t");
        assert_eq!(record.status, TaskStatus::New);
        assert_eq!(record.iterations, 1);
        assert_eq!(record.version, SCHEMA_VERSION);
        assert_eq!(record.created_at, "2026-03-01T12:00:00.000Z");
        assert_eq!(record.agent_or_default(), "claude");
    }

    #[test]
    fn mark_failed_records_error_and_timestamp() {
        let failed = transition(
            &task(1, "t"),
            TaskEvent::Failed {
                error: "boom".to_string(),
            },
            at(5),
        );
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));
        let failed_at = failed.failed_at.expect("failed_at set");
        assert!(DateTime::parse_from_rfc3339(&failed_at).is_ok());
    }

    #[test]
    fn started_keeps_the_first_start_time() {
        let first = transition(&task(1, "t"), TaskEvent::Started, at(1));
        let again = transition(&first, TaskEvent::Started, at(9));
        assert_eq!(again.started_at, first.started_at);
    }

    #[test]
    fn merged_and_pushed_only_fill_missing_completion_time() {
        let completed = transition(&task(1, "t"), TaskEvent::Completed, at(2));
        let merged = transition(&completed, TaskEvent::Merged, at(7));
        assert_eq!(merged.status, TaskStatus::Merged);
        assert_eq!(merged.completed_at, completed.completed_at);

        let pushed = transition(&task(2, "t"), TaskEvent::Pushed, at(3));
        assert_eq!(pushed.status, TaskStatus::Pushed);
        assert!(pushed.completed_at.is_some());
    }

    #[test]
    fn restart_increments_count_and_reenters_in_progress() {
        let failed = transition(
            &task(1, "t"),
            TaskEvent::Failed {
                error: "x".to_string(),
            },
            at(1),
        );
        let restarted = transition(&failed, TaskEvent::Restarted, at(2));
        assert_eq!(restarted.status, TaskStatus::InProgress);
        assert_eq!(restarted.restart_count, 1);
        assert_eq!(restarted.last_restart_at, restarted.started_at);
        assert!(restarted.error.is_none());
        assert!(restarted.failed_at.is_none());
    }

    /// Any status may be forced into any other; nothing guards the source state.
    #[test]
    fn transitions_are_permissive_from_every_state() {
        let events = [
            (TaskEvent::Started, TaskStatus::InProgress),
            (TaskEvent::Iterating, TaskStatus::Iterating),
            (TaskEvent::Completed, TaskStatus::Completed),
            (
                TaskEvent::Failed {
                    error: "e".to_string(),
                },
                TaskStatus::Failed,
            ),
            (TaskEvent::Merged, TaskStatus::Merged),
            (TaskEvent::Pushed, TaskStatus::Pushed),
            (TaskEvent::Reset, TaskStatus::New),
            (TaskEvent::Restarted, TaskStatus::InProgress),
        ];
        for from in TaskStatus::ALL {
            let mut record = task(1, "t");
            record.status = from;
            for (event, expected) in events.clone() {
                assert_eq!(transition(&record, event, at(1)).status, expected);
            }
        }
    }

    #[test]
    fn add_retry_logic_scenario() {
        let created = task(42, "Add retry logic");
        assert_eq!(created.iterations, 1);
        assert_eq!(created.status, TaskStatus::New);

        let started = transition(&created, TaskEvent::Started, at(1));
        assert_eq!(started.status, TaskStatus::InProgress);
        assert!(started.started_at.as_deref().is_some_and(|s| !s.is_empty()));

        let mut iterated = started;
        for minute in 2..5 {
            iterated = transition(&iterated, TaskEvent::IterationAdded, at(minute));
        }
        assert_eq!(iterated.iterations, 4);

        let failed = transition(
            &iterated,
            TaskEvent::Failed {
                error: "timeout".to_string(),
            },
            at(6),
        );
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("timeout"));

        let reset = transition(&failed, TaskEvent::Reset, at(7));
        assert_eq!(reset.status, TaskStatus::New);
        assert_eq!(reset.iterations, 4);
    }

    #[test]
    fn execution_updates_track_running_and_failure_times() {
        let running = transition(
            &task(1, "t"),
            TaskEvent::ContainerAssigned {
                container_id: "abc".to_string(),
                execution_status: "running".to_string(),
            },
            at(1),
        );
        assert_eq!(running.container_id.as_deref(), Some("abc"));
        assert!(running.running_at.is_some());

        let failed = transition(
            &running,
            TaskEvent::ExecutionUpdated(ExecutionUpdate {
                status: "failed".to_string(),
                exit_code: Some(2),
                error: Some("agent crashed".to_string()),
            }),
            at(2),
        );
        assert_eq!(failed.execution_status.as_deref(), Some("failed"));
        assert_eq!(failed.exit_code, Some(2));
        assert_eq!(failed.error.as_deref(), Some("agent crashed"));
        assert!(failed.error_at.is_some());
    }

    #[test]
    fn record_serializes_with_camel_case_keys() {
        let record = transition(&task(3, "t"), TaskEvent::Started, at(1));
        let value = serde_json::to_value(&record).expect("serialize");
        assert_eq!(value["status"], "IN_PROGRESS");
        assert!(value.get("startedAt").is_some());
        assert!(value.get("completedAt").is_none());
        assert_eq!(value["restartCount"], 0);
    }
}
