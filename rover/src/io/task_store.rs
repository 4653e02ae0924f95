//! Persistence of task records under `.rover/tasks/<id>/description.json`.
//!
//! The store never mutates a record in place: every named operation applies a
//! [`TaskEvent`] through [`transition`] and persists the result before
//! returning it, so each state change is durable on its own.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::migration::{DocumentError, StoredTask, classify, migrate};
use crate::core::task::{ExecutionUpdate, NewTask, TaskEvent, TaskRecord, transition};
use crate::core::validation::validate_record;
use crate::error::{Result, RoverError};
use crate::io::atomic::write_json;
use crate::io::layout::{RoverPaths, TaskPaths, numeric_entries};

/// Source of "now" for timestamps.
pub type Clock = fn() -> DateTime<Utc>;

/// Records found by [`TaskStore::list`].
#[derive(Debug, Default)]
pub struct TaskListing {
    pub tasks: Vec<TaskRecord>,
    /// Task directories whose record could not be loaded.
    pub unreadable: Vec<(u64, RoverError)>,
}

#[derive(Debug, Clone)]
pub struct TaskStore {
    paths: RoverPaths,
    clock: Clock,
}

impl TaskStore {
    pub fn new(paths: RoverPaths) -> Self {
        Self {
            paths,
            clock: Utc::now,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn paths(&self) -> &RoverPaths {
        &self.paths
    }

    pub fn task_paths(&self, id: u64) -> TaskPaths {
        self.paths.task(id)
    }

    pub fn exists(&self, id: u64) -> bool {
        self.paths.task(id).description_path.is_file()
    }

    /// Ids of every task directory, numerically sorted.
    pub fn ids(&self) -> Result<Vec<u64>> {
        numeric_entries(&self.paths.tasks_dir)
    }

    /// Highest existing id + 1 (ids start at 1).
    pub fn next_id(&self) -> Result<u64> {
        Ok(self.ids()?.last().map_or(1, |max| max + 1))
    }

    /// Write a brand-new record with status NEW.
    #[instrument(skip_all, fields(id = task.id))]
    pub fn create(&self, task: NewTask) -> Result<TaskRecord> {
        if self.exists(task.id) {
            return Err(RoverError::TaskExists { id: task.id });
        }
        let record = TaskRecord::new(task, Uuid::new_v4(), (self.clock)());
        self.save(&record)?;
        info!(id = record.id, title = %record.title, "task created");
        Ok(record)
    }

    /// Load a record, migrating it in place when it was written by an older schema.
    #[instrument(skip(self))]
    pub fn load(&self, id: u64) -> Result<TaskRecord> {
        let paths = self.paths.task(id);
        let raw = match fs::read_to_string(&paths.description_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RoverError::TaskNotFound { id });
            }
            Err(e) => return Err(RoverError::file("read", &paths.description_path, e)),
        };
        let schema_error = |source| RoverError::Schema {
            path: paths.description_path.clone(),
            source,
        };
        let doc: Value = serde_json::from_str(&raw).map_err(schema_error)?;

        match classify(doc) {
            Ok(StoredTask::Current(record)) if record.id != id => {
                Err(RoverError::Validation(vec![format!(
                    "id {} does not match task directory {id}",
                    record.id
                )]))
            }
            Ok(StoredTask::Current(record)) => Ok(record),
            Ok(StoredTask::Legacy(legacy)) => {
                if let Some(stored) = legacy.id
                    && stored != id
                {
                    warn!(
                        id,
                        stored,
                        "legacy record id disagrees with its directory, keeping the directory id"
                    );
                }
                let from = legacy.version.clone();
                let record = migrate(legacy, id, Uuid::new_v4(), (self.clock)());
                if from.as_deref() != Some(record.version.as_str()) {
                    info!(id, from = ?from, to = %record.version, "migrating task record");
                    fs::write(&paths.backup_path, &raw)
                        .map_err(|e| RoverError::file("write backup", &paths.backup_path, e))?;
                    self.save(&record)?;
                }
                Ok(record)
            }
            Err(DocumentError::Invalid(errors)) => Err(RoverError::Validation(errors)),
            Err(DocumentError::Malformed(source)) => Err(schema_error(source)),
        }
    }

    /// Re-read a record from disk.
    pub fn reload(&self, record: &TaskRecord) -> Result<TaskRecord> {
        self.load(record.id)
    }

    /// Validate then persist.
    pub fn save(&self, record: &TaskRecord) -> Result<()> {
        let errors = validate_record(record);
        if !errors.is_empty() {
            return Err(RoverError::Validation(errors));
        }
        let path = self.paths.task(record.id).description_path;
        debug!(id = record.id, status = %record.status, path = %path.display(), "saving task");
        write_json(&path, record)
    }

    /// Remove the task directory (record, iterations, and anything left in it).
    #[instrument(skip(self))]
    pub fn delete(&self, id: u64) -> Result<()> {
        let dir = self.paths.task(id).dir;
        if !dir.exists() {
            return Err(RoverError::TaskNotFound { id });
        }
        fs::remove_dir_all(&dir).map_err(|e| RoverError::file("remove", &dir, e))?;
        info!(id, "task deleted");
        Ok(())
    }

    /// Every loadable task, by ascending id.
    pub fn list(&self) -> Result<TaskListing> {
        let mut listing = TaskListing::default();
        for id in self.ids()? {
            if !self.exists(id) {
                continue;
            }
            match self.load(id) {
                Ok(record) => listing.tasks.push(record),
                Err(err) => {
                    warn!(id, err = %err, "skipping unreadable task");
                    listing.unreadable.push((id, err));
                }
            }
        }
        Ok(listing)
    }

    /// Apply `event` and persist the result.
    pub fn apply(&self, record: &TaskRecord, event: TaskEvent) -> Result<TaskRecord> {
        let next = transition(record, event, (self.clock)());
        self.save(&next)?;
        if next.status != record.status {
            info!(id = next.id, from = %record.status, to = %next.status, "task status changed");
        }
        Ok(next)
    }

    pub fn mark_in_progress(&self, record: &TaskRecord) -> Result<TaskRecord> {
        self.apply(record, TaskEvent::Started)
    }

    pub fn mark_iterating(&self, record: &TaskRecord) -> Result<TaskRecord> {
        self.apply(record, TaskEvent::Iterating)
    }

    pub fn mark_completed(&self, record: &TaskRecord) -> Result<TaskRecord> {
        self.apply(record, TaskEvent::Completed)
    }

    pub fn mark_failed(&self, record: &TaskRecord, error: impl Into<String>) -> Result<TaskRecord> {
        self.apply(
            record,
            TaskEvent::Failed {
                error: error.into(),
            },
        )
    }

    pub fn mark_merged(&self, record: &TaskRecord) -> Result<TaskRecord> {
        self.apply(record, TaskEvent::Merged)
    }

    pub fn mark_pushed(&self, record: &TaskRecord) -> Result<TaskRecord> {
        self.apply(record, TaskEvent::Pushed)
    }

    /// Back to NEW; the iteration count is kept.
    pub fn reset_to_new(&self, record: &TaskRecord) -> Result<TaskRecord> {
        self.apply(record, TaskEvent::Reset)
    }

    pub fn restart(&self, record: &TaskRecord) -> Result<TaskRecord> {
        self.apply(record, TaskEvent::Restarted)
    }

    pub fn increment_iteration(&self, record: &TaskRecord) -> Result<TaskRecord> {
        self.apply(record, TaskEvent::IterationAdded)
    }

    pub fn set_workspace(
        &self,
        record: &TaskRecord,
        path: impl Into<PathBuf>,
        branch: impl Into<String>,
    ) -> Result<TaskRecord> {
        self.apply(
            record,
            TaskEvent::WorkspaceAssigned {
                path: path.into(),
                branch: branch.into(),
            },
        )
    }

    pub fn clear_workspace(&self, record: &TaskRecord) -> Result<TaskRecord> {
        self.apply(record, TaskEvent::WorkspaceCleared)
    }

    pub fn update_title(&self, record: &TaskRecord, title: impl Into<String>) -> Result<TaskRecord> {
        self.apply(record, TaskEvent::TitleChanged(title.into()))
    }

    pub fn update_description(
        &self,
        record: &TaskRecord,
        description: impl Into<String>,
    ) -> Result<TaskRecord> {
        self.apply(record, TaskEvent::DescriptionChanged(description.into()))
    }

    pub fn set_container_info(
        &self,
        record: &TaskRecord,
        container_id: impl Into<String>,
        execution_status: impl Into<String>,
    ) -> Result<TaskRecord> {
        self.apply(
            record,
            TaskEvent::ContainerAssigned {
                container_id: container_id.into(),
                execution_status: execution_status.into(),
            },
        )
    }

    pub fn update_execution_status(
        &self,
        record: &TaskRecord,
        update: ExecutionUpdate,
    ) -> Result<TaskRecord> {
        self.apply(record, TaskEvent::ExecutionUpdated(update))
    }

    pub fn mark_status_checked(&self, record: &TaskRecord) -> Result<TaskRecord> {
        self.apply(record, TaskEvent::StatusChecked)
    }
}
