//! Atomic file replacement shared by the JSON/TOML writers.

use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::error::{Result, RoverError};

/// Write `contents` to a sibling temp file, then rename over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        RoverError::file(
            "write",
            path,
            std::io::Error::other("path has no parent directory"),
        )
    })?;
    fs::create_dir_all(parent).map_err(|e| RoverError::file("create directory", parent, e))?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents).map_err(|e| RoverError::file("write", &tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| RoverError::file("replace", path, e))
}

/// Pretty JSON with a trailing newline, written atomically.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).map_err(|source| RoverError::Schema {
        path: path.to_path_buf(),
        source,
    })?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_existing_file_without_leaving_temp() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested/state.json");
        write_json(&path, &serde_json::json!({"a": 1})).expect("first");
        write_json(&path, &serde_json::json!({"a": 2})).expect("second");

        assert_eq!(
            fs::read_to_string(&path).expect("read"),
            "{\n  \"a\": 2\n}\n"
        );
        assert!(!temp.path().join("nested/state.json.tmp").exists());
    }
}
