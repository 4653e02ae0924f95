//! Per-iteration working files under `.rover/tasks/<id>/iterations/<n>/`.
//!
//! The manager only allocates iteration slots and threads context forward.
//! `plan.md`, `changes.md` and `summary.md` are produced by the agent, and
//! `status.json` by the container launcher; both are read back opportunistically.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::core::task::timestamp;
use crate::error::{Result, RoverError};
use crate::io::atomic::write_json;
use crate::io::layout::numeric_entries;

/// Files inside one iteration directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub metadata_path: PathBuf,
    pub prompt_path: PathBuf,
    pub plan_path: PathBuf,
    pub changes_path: PathBuf,
    pub summary_path: PathBuf,
    pub status_path: PathBuf,
}

impl IterationPaths {
    pub fn new(iterations_dir: &Path, number: u32) -> Self {
        let dir = iterations_dir.join(number.to_string());
        Self {
            metadata_path: dir.join("iteration.json"),
            prompt_path: dir.join("prompt.md"),
            plan_path: dir.join("plan.md"),
            changes_path: dir.join("changes.md"),
            summary_path: dir.join("summary.md"),
            status_path: dir.join("status.json"),
            dir,
        }
    }
}

/// Output of an earlier iteration handed to the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviousContext {
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl PreviousContext {
    pub fn is_empty(&self) -> bool {
        self.plan.is_none() && self.changes.is_none() && self.summary.is_none()
    }
}

/// `iteration.json`; written once when the iteration starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    pub iteration: u32,
    pub task_id: u64,
    pub title: String,
    pub description: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_context: Option<PreviousContext>,
}

/// `status.json` as written by the launcher. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IterationStatus {
    pub status: String,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub updated_at: Option<String>,
}

/// Allocates and reads the iterations of a single task.
#[derive(Debug, Clone)]
pub struct IterationManager {
    task_id: u64,
    iterations_dir: PathBuf,
}

impl IterationManager {
    pub fn new(task_id: u64, iterations_dir: impl Into<PathBuf>) -> Self {
        Self {
            task_id,
            iterations_dir: iterations_dir.into(),
        }
    }

    pub fn paths(&self, number: u32) -> IterationPaths {
        IterationPaths::new(&self.iterations_dir, number)
    }

    /// Write iteration 1.
    pub fn create_initial(
        &self,
        title: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<IterationRecord> {
        self.create_iteration(1, title, description, None, now)
    }

    /// Write iteration `number`, seeded with the previous iteration's output.
    ///
    /// Fails if the iteration already exists; earlier iterations are never edited.
    #[instrument(skip_all, fields(task_id = self.task_id, number = number))]
    pub fn create_iteration(
        &self,
        number: u32,
        title: &str,
        description: &str,
        previous: Option<PreviousContext>,
        now: DateTime<Utc>,
    ) -> Result<IterationRecord> {
        let paths = self.paths(number);
        fs::create_dir_all(&paths.dir)
            .map_err(|e| RoverError::file("create directory", &paths.dir, e))?;

        let record = IterationRecord {
            iteration: number,
            task_id: self.task_id,
            title: title.to_string(),
            description: description.to_string(),
            created_at: timestamp(now),
            previous_context: previous.filter(|p| !p.is_empty()),
        };
        let mut buf = serde_json::to_string_pretty(&record).map_err(|source| RoverError::Schema {
            path: paths.metadata_path.clone(),
            source,
        })?;
        buf.push('\n');
        write_once(&paths.metadata_path, &buf)?;
        info!(task_id = self.task_id, iteration = number, "iteration created");
        Ok(record)
    }

    /// Existing iteration numbers, ascending.
    pub fn list(&self) -> Result<Vec<u32>> {
        Ok(numeric_entries(&self.iterations_dir)?
            .into_iter()
            .filter_map(|n| u32::try_from(n).ok())
            .collect())
    }

    /// Numerically highest iteration number.
    pub fn latest(&self) -> Result<Option<u32>> {
        Ok(self.list()?.last().copied())
    }

    pub fn load(&self, number: u32) -> Result<IterationRecord> {
        let path = self.paths(number).metadata_path;
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RoverError::IterationNotFound {
                    id: self.task_id,
                    iteration: number,
                });
            }
            Err(e) => return Err(RoverError::file("read", &path, e)),
        };
        serde_json::from_str(&raw).map_err(|source| RoverError::Schema { path, source })
    }

    /// Agent output of iteration `number`; missing files are simply absent.
    pub fn context_of(&self, number: u32) -> Result<PreviousContext> {
        let paths = self.paths(number);
        Ok(PreviousContext {
            iteration: number,
            plan: read_optional(&paths.plan_path)?,
            changes: read_optional(&paths.changes_path)?,
            summary: read_optional(&paths.summary_path)?,
        })
    }

    /// Context of the numerically highest iteration, if any exists.
    pub fn latest_context(&self) -> Result<Option<PreviousContext>> {
        match self.latest()? {
            Some(number) => {
                debug!(task_id = self.task_id, iteration = number, "reading latest context");
                self.context_of(number).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Summaries of every iteration that produced one, oldest first.
    pub fn summaries(&self) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for number in self.list()? {
            if let Some(summary) = read_optional(&self.paths(number).summary_path)? {
                out.push(summary);
            }
        }
        Ok(out)
    }

    /// Write the agent prompt for iteration `number` unless one already exists.
    pub fn write_prompt(&self, number: u32, prompt: &str) -> Result<PathBuf> {
        let path = self.paths(number).prompt_path;
        if !path.exists() {
            write_once(&path, prompt)?;
        }
        Ok(path)
    }

    /// Record the final run status when the launcher reports an exit code.
    ///
    /// A terminal status the agent already wrote itself is left untouched.
    pub fn record_exit(&self, number: u32, status: &IterationStatus) -> Result<IterationStatus> {
        if let Some(existing) = self.read_status(number)?
            && matches!(existing.status.as_str(), "completed" | "failed")
        {
            return Ok(existing);
        }
        let path = self.paths(number).status_path;
        write_json(&path, status)?;
        Ok(status.clone())
    }

    /// Forget the status of an earlier run before the iteration is re-run.
    pub fn clear_status(&self, number: u32) -> Result<()> {
        let path = self.paths(number).status_path;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RoverError::file("remove", &path, e)),
        }
    }

    /// Launcher-reported status for iteration `number`.
    pub fn read_status(&self, number: u32) -> Result<Option<IterationStatus>> {
        let path = self.paths(number).status_path;
        let Some(raw) = read_optional(&path)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| RoverError::Schema { path, source })
    }
}

fn write_once(path: &Path, contents: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| RoverError::file("create", path, e))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| RoverError::file("write", path, e))
}

/// Trimmed file contents; missing or blank files are `None`.
fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let trimmed = contents.trim();
            Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RoverError::file("read", path, e)),
    }
}
