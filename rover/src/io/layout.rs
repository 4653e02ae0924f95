//! Canonical paths under `.rover/` and the scaffolding they need.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, RoverError};

const ROVER_GITIGNORE_ENTRY: &str = "tasks/";

/// All canonical paths within `.rover/` for a project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoverPaths {
    pub root: PathBuf,
    pub rover_dir: PathBuf,
    pub tasks_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
}

/// Paths owned by a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPaths {
    pub dir: PathBuf,
    pub description_path: PathBuf,
    pub backup_path: PathBuf,
    pub workspace_dir: PathBuf,
    pub iterations_dir: PathBuf,
}

impl RoverPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let rover_dir = root.join(".rover");
        Self {
            tasks_dir: rover_dir.join("tasks"),
            gitignore_path: rover_dir.join(".gitignore"),
            config_path: rover_dir.join("config.toml"),
            rover_dir,
            root,
        }
    }

    pub fn task(&self, id: u64) -> TaskPaths {
        let dir = self.tasks_dir.join(id.to_string());
        TaskPaths {
            description_path: dir.join("description.json"),
            backup_path: dir.join("description.json.backup"),
            workspace_dir: dir.join("workspace"),
            iterations_dir: dir.join("iterations"),
            dir,
        }
    }
}

/// Create `.rover/tasks/` and make sure task directories are git-ignored.
///
/// Idempotent: an existing `.gitignore` is only appended to when the entry is missing.
pub fn ensure_layout(paths: &RoverPaths) -> Result<()> {
    if paths.rover_dir.exists() && !paths.rover_dir.is_dir() {
        return Err(RoverError::file(
            "use",
            &paths.rover_dir,
            std::io::Error::other(".rover exists but is not a directory"),
        ));
    }
    fs::create_dir_all(&paths.tasks_dir)
        .map_err(|e| RoverError::file("create directory", &paths.tasks_dir, e))?;

    let existing = match fs::read_to_string(&paths.gitignore_path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(RoverError::file("read", &paths.gitignore_path, e)),
    };
    if existing.lines().any(|l| l.trim() == ROVER_GITIGNORE_ENTRY) {
        return Ok(());
    }

    let mut contents = existing;
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(ROVER_GITIGNORE_ENTRY);
    contents.push('\n');
    debug!(path = %paths.gitignore_path.display(), "writing .rover/.gitignore");
    fs::write(&paths.gitignore_path, contents)
        .map_err(|e| RoverError::file("write", &paths.gitignore_path, e))
}

/// Numeric directory names under `dir`, ignoring anything else.
pub(crate) fn numeric_entries(dir: &Path) -> Result<Vec<u64>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RoverError::file("read directory", dir, e)),
    };
    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RoverError::file("read directory", dir, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_paths_are_nested_under_tasks_dir() {
        let paths = RoverPaths::new("/project");
        let task = paths.task(7);
        assert_eq!(task.dir, PathBuf::from("/project/.rover/tasks/7"));
        assert_eq!(
            task.backup_path,
            PathBuf::from("/project/.rover/tasks/7/description.json.backup")
        );
        assert_eq!(
            task.workspace_dir,
            PathBuf::from("/project/.rover/tasks/7/workspace")
        );
    }

    #[test]
    fn ensure_layout_is_idempotent_and_preserves_gitignore() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RoverPaths::new(temp.path());
        fs::create_dir_all(&paths.rover_dir).expect("mkdir");
        fs::write(&paths.gitignore_path, "scratch/").expect("seed");

        ensure_layout(&paths).expect("first");
        ensure_layout(&paths).expect("second");

        assert!(paths.tasks_dir.is_dir());
        let contents = fs::read_to_string(&paths.gitignore_path).expect("read");
        assert_eq!(contents, "scratch/\ntasks/\n");
    }

    #[test]
    fn numeric_entries_sort_numerically_and_skip_noise() {
        let temp = tempfile::tempdir().expect("tempdir");
        for name in ["9", "10", "2", "notes"] {
            fs::create_dir(temp.path().join(name)).expect("mkdir");
        }
        fs::write(temp.path().join("11"), "file, not dir").expect("write");
        assert_eq!(numeric_entries(temp.path()).expect("scan"), vec![2, 9, 10]);
        assert!(
            numeric_entries(&temp.path().join("missing"))
                .expect("missing")
                .is_empty()
        );
    }
}
