//! Error taxonomy for runs and operator commands.
//!
//! Library functions return `anyhow::Result`; these variants travel inside
//! `anyhow::Error` and are recovered with `downcast_ref` where a caller needs to
//! branch on them. Per-item pipeline failures (agent, tests, hooks) are also
//! used as halt reasons in [`crate::run_loop::RunOutcome::Halted`].

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RalphError {
    #[error("agent not found: {command}")]
    AgentNotFound { command: String },
    #[error("agent failed with exit code {exit_code}")]
    AgentExecutionFailure { exit_code: i32 },
    #[error("agent has been silent for {}s", silence.as_secs())]
    WatchdogTimeout { silence: Duration },
    #[error("tests failed")]
    TestFailure { output: String },
    #[error("hook failed ({command}) with exit code {exit_code}")]
    HookFailure { command: String, exit_code: i32 },
    #[error("no test infrastructure detected")]
    NoTestInfrastructure,
    #[error("git {command} failed: {message}")]
    VersionControl { command: String, message: String },
    #[error("no ralph run found (run `ralph start <prd>` first)")]
    RunStateNotFound,
    #[error("item {item_id} has no checkpoint to roll back")]
    RollbackTargetMissing { item_id: u32 },
    #[error("a ralph run is already in progress (use `ralph resume` or `ralph clear`)")]
    RunAlreadyActive,
    #[error("invalid PRD {}: {message}", path.display())]
    InvalidItemSet { path: PathBuf, message: String },
    #[error("item {item_id} not found in PRD")]
    ItemNotFound { item_id: u32 },
    #[error("unknown agent '{name}' (expected one of: claude, codex, gemini)")]
    UnknownAgent { name: String },
    #[error("working directory has uncommitted changes (commit or stash them, or use --force)")]
    DirtyWorkingTree,
}
