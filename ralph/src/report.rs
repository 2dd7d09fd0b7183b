//! Operator-facing progress reporting for the run loop.
//!
//! The loop reports through [`RunReporter`]; the binary prints, tests record
//! or ignore.

use std::time::Duration;

use crate::agents::watchdog::WatchdogCallback;
use crate::core::items::Item;
use crate::core::phase::Phase;
use crate::error::RalphError;
use crate::io::hooks::{HookKind, HookResult};
use crate::io::run_state::Checkpoint;

/// Hooks ignore what they do not need.
pub trait RunReporter {
    fn reconciled(&mut self, _item_ids: &[u32]) {}
    fn item_started(&mut self, _item: &Item, _position: usize, _total: usize) {}
    fn phase_changed(&mut self, _item_id: Option<u32>, _phase: Phase) {}
    fn agent_line(&mut self, _line: &str) {}
    /// Called from the watchdog thread when the agent goes quiet.
    fn watchdog_alert(&self) -> Option<WatchdogCallback> {
        None
    }
    fn watchdog_timeout(&mut self, _err: &RalphError) {}
    fn warning(&mut self, _message: &str) {}
    fn hooks_finished(&mut self, _kind: HookKind, _results: &[HookResult]) {}
    fn checkpoint_created(&mut self, _item: &Item, _checkpoint: &Checkpoint) {}
    fn halted(&mut self, _item_id: u32, _reason: &RalphError) {}
}

/// Reports nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl RunReporter for NoopReporter {}

/// Plain-text console output.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter {
    /// Echo agent output lines.
    pub verbose: bool,
}

const HOOK_OUTPUT_LINES: usize = 10;

impl RunReporter for ConsoleReporter {
    fn reconciled(&mut self, item_ids: &[u32]) {
        println!("Recovered interrupted checkpoint(s) for item(s) {item_ids:?}");
    }

    fn item_started(&mut self, item: &Item, position: usize, total: usize) {
        println!();
        println!("[{position}/{total}] Item {}: {}", item.id, item.title);
        println!("    {} | priority {}", item.category, item.priority);
    }

    fn phase_changed(&mut self, _item_id: Option<u32>, phase: Phase) {
        if !phase.label().is_empty() && !phase.is_failed() {
            println!("  {}", phase.label());
        }
    }

    fn agent_line(&mut self, line: &str) {
        if self.verbose {
            println!("    | {line}");
        }
    }

    fn watchdog_alert(&self) -> Option<WatchdogCallback> {
        Some(Box::new(|silence: Duration| {
            eprintln!(
                "  ! agent silent for {}s (still running, see `ralph log -f`)",
                silence.as_secs()
            );
        }))
    }

    fn watchdog_timeout(&mut self, err: &RalphError) {
        eprintln!("  ! watchdog: {err}");
    }

    fn warning(&mut self, message: &str) {
        eprintln!("  ! {message}");
    }

    fn hooks_finished(&mut self, kind: HookKind, results: &[HookResult]) {
        for result in results {
            if result.success {
                println!("    ok   {kind}: {}", result.command);
                continue;
            }
            println!(
                "    FAIL {kind}: {} (exit code {})",
                result.command, result.exit_code
            );
            let lines: Vec<&str> = result.output.trim().lines().collect();
            for line in lines.iter().take(HOOK_OUTPUT_LINES) {
                println!("         {line}");
            }
            if lines.len() > HOOK_OUTPUT_LINES {
                println!("         ... ({} more lines)", lines.len() - HOOK_OUTPUT_LINES);
            }
        }
    }

    fn checkpoint_created(&mut self, _item: &Item, checkpoint: &Checkpoint) {
        let short: String = checkpoint.commit_sha.chars().take(8).collect();
        println!(
            "  Checkpoint {short} ({} file(s) changed)",
            checkpoint.files_changed.len()
        );
    }

    fn halted(&mut self, item_id: u32, reason: &RalphError) {
        eprintln!();
        eprintln!("Halted on item {item_id}: {reason}");
        match reason {
            RalphError::TestFailure { output } => {
                let tail: Vec<&str> = output.trim().lines().rev().take(20).collect();
                for line in tail.into_iter().rev() {
                    eprintln!("    {line}");
                }
            }
            RalphError::NoTestInfrastructure => {
                eprintln!("Add a test setup (package.json test script, Cargo.toml, or pytest) as an early item.");
            }
            _ => {}
        }
        eprintln!("Fix the problem, then run `ralph resume`.");
    }
}
