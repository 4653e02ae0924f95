//! Stable exit codes for rover CLI commands.

/// Command succeeded, including an interrupted `logs --follow`.
pub const OK: i32 = 0;
/// Command failed: bad arguments, config, git, or container runtime errors.
pub const FAILED: i32 = 1;
/// The requested task or iteration does not exist.
pub const NOT_FOUND: i32 = 2;
/// A task record or workflow file failed validation.
pub const INVALID: i32 = 3;
/// The merge was aborted or refused; the repository is unchanged.
pub const MERGE_ABORTED: i32 = 4;
