//! Stable exit codes for ralph CLI commands.

/// Command succeeded (or the run completed every item).
pub const OK: i32 = 0;
/// Command failed: no run, run already active, invalid PRD, git error, or a
/// rollback target without a checkpoint.
pub const INVALID: i32 = 1;
/// The run halted in the per-item pipeline and is waiting for `ralph resume`.
pub const HALTED: i32 = 2;
