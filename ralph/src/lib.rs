//! Checkpointed orchestration of an external coding agent over a PRD.
//!
//! A run works through the items of an ItemSet (PRD) one at a time. Each item
//! is handed to an agent process, verified by the project's tests and any
//! configured hooks, and committed as a checkpoint so the run can be paused,
//! resumed after a crash, or selectively rolled back.
//!
//! - **[`core`]**: Pure, deterministic logic (item selection, phases,
//!   reconciliation, prompt rendering, progress math). No I/O.
//! - **[`io`]**: Side-effecting adapters (files, git, child processes, hooks,
//!   test runners).
//! - **[`agents`]**: Agent definitions, the liveness watchdog, and the
//!   streaming agent executor.
//!
//! Orchestration modules ([`start`], [`run_loop`], [`rollback`], [`status`],
//! [`pr`], [`log`]) coordinate core logic with I/O to implement CLI commands.

pub mod agents;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod log;
pub mod logging;
pub mod pr;
pub mod report;
pub mod rollback;
pub mod run_loop;
pub mod start;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
