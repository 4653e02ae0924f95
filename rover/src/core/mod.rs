//! Deterministic, pure logic shared by rover commands.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! values (task records, porcelain text, message strings) and return
//! deterministic outputs suitable for tests.

pub mod commit;
pub mod conflict;
pub mod diff;
pub mod migration;
pub mod status;
pub mod task;
pub mod validation;
