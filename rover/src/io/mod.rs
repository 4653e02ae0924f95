//! Side-effecting adapters used by rover commands.
//!
//! Everything that touches the filesystem or spawns a process lives here so
//! that `core` stays pure. Adapters raise typed errors and never decide
//! whether a failure is fatal; orchestration does.

pub(crate) mod atomic;
pub mod ai;
pub mod config;
pub mod confirm;
pub mod git;
pub mod iteration;
pub mod launcher;
pub mod layout;
pub mod process;
pub mod prompt;
pub mod task_store;
