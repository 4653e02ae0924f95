//! Task orchestration for coding agents working in isolated git worktrees.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (task record transitions,
//!   validation, schema migration, commit messages, conflict markers).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (filesystem, git, containers, the AI
//!   collaborator). External programs are reached only through
//!   [`io::process::CommandRunner`] so tests can script them.
//!
//! Orchestration modules ([`orchestrator`], [`merge`]) compose core logic with
//! I/O to implement the CLI commands.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod merge;
pub mod orchestrator;
pub mod output;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
