//! Operator hook commands run around each checkpoint.

use std::fmt;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::process::{DEFAULT_OUTPUT_LIMIT_BYTES, run_command_with_timeout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    PreCommit,
    PostItem,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::PreCommit => f.write_str("pre-commit"),
            HookKind::PostItem => f.write_str("post-item"),
        }
    }
}

/// What to do after a hook fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    StopOnFirst,
    ContinueOnFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookResult {
    pub command: String,
    pub success: bool,
    pub output: String,
    pub exit_code: i32,
}

/// Run one hook via `sh -c` in `workdir`.
///
/// Never fails: a timeout or spawn error is a failed result with exit code -1.
#[instrument(skip_all, fields(command = command))]
pub fn run_hook(workdir: &Path, command: &str, timeout: Duration) -> HookResult {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).current_dir(workdir);
    match run_command_with_timeout(cmd, timeout, DEFAULT_OUTPUT_LIMIT_BYTES) {
        Ok(out) if out.timed_out => HookResult {
            command: command.to_string(),
            success: false,
            output: format!("Hook timed out after {} seconds", timeout.as_secs()),
            exit_code: -1,
        },
        Ok(out) => HookResult {
            command: command.to_string(),
            success: out.success(),
            output: out.combined_text(),
            exit_code: out.exit_code(),
        },
        Err(err) => HookResult {
            command: command.to_string(),
            success: false,
            output: format!("{err:#}"),
            exit_code: -1,
        },
    }
}

/// Run `commands` in order. Returns `(all_passed, results)`.
///
/// With [`FailurePolicy::StopOnFirst`] the first failure ends the batch, so
/// later commands have no result.
pub fn run_hooks(
    workdir: &Path,
    commands: &[String],
    kind: HookKind,
    policy: FailurePolicy,
    timeout: Duration,
) -> (bool, Vec<HookResult>) {
    if commands.is_empty() {
        return (true, Vec::new());
    }
    info!(%kind, count = commands.len(), "running hooks");
    let mut all_passed = true;
    let mut results = Vec::with_capacity(commands.len());
    for command in commands {
        let result = run_hook(workdir, command, timeout);
        let failed = !result.success;
        if failed {
            warn!(%kind, command = %command, exit_code = result.exit_code, "hook failed");
            all_passed = false;
        } else {
            debug!(%kind, command = %command, "hook passed");
        }
        results.push(result);
        if failed && policy == FailurePolicy::StopOnFirst {
            break;
        }
    }
    (all_passed, results)
}
