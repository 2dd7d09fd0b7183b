//! The per-item state machine that drives a run.
//!
//! Each item goes `Assigned -> Generating -> Staging -> Testing ->
//! PreCommitHooks -> Checkpointing -> PostItemHooks -> Idle`. The action label
//! for a phase is persisted before the phase does any work, and resume always
//! re-derives the next item from the item set plus the checkpoint list, so an
//! interrupted run never applies a checkpoint twice.

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::agents::executor::{AgentExecutor, AgentRequest};
use crate::agents::watchdog::WatchdogCallback;
use crate::core::items::{Item, ItemSet};
use crate::core::phase::{HaltKind, Phase};
use crate::core::prompt::PromptEngine;
use crate::core::reconcile::reconcile_items;
use crate::error::RalphError;
use crate::io::git::VersionControl;
use crate::io::hooks::{FailurePolicy, HookKind, run_hooks};
use crate::io::item_store::{load_item_set, write_item_set};
use crate::io::paths::RalphPaths;
use crate::io::run_state::{Checkpoint, RunState, load_run_state, write_run_state};
use crate::io::test_runner::TestRunner;
use crate::report::RunReporter;

/// Minimum spacing between run-state writes driven by agent output.
pub const OUTPUT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Settings that are not part of the persisted run state.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub hook_timeout: Duration,
    pub session_url: Option<String>,
}

/// How a loop invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every item passes.
    Complete { completed: usize, total: usize },
    /// A pipeline phase failed; fix the cause and resume.
    Halted { item_id: u32, reason: RalphError },
}

enum ItemResult {
    Checkpointed,
    Halted(HaltKind, RalphError),
}

/// Collaborators for one loop invocation.
pub struct RunLoop<'a, V, A, T, R> {
    pub paths: &'a RalphPaths,
    pub settings: &'a LoopSettings,
    pub vcs: &'a V,
    pub agent: &'a A,
    pub tests: &'a T,
    pub reporter: &'a mut R,
}

impl<V, A, T, R> RunLoop<'_, V, A, T, R>
where
    V: VersionControl,
    A: AgentExecutor,
    T: TestRunner,
    R: RunReporter,
{
    /// Process items until everything passes or a phase halts.
    ///
    /// Collaborator failures (git, file I/O) abort with `Err`; the persisted
    /// action label then shows where the run stopped.
    pub fn run(&mut self) -> Result<RunOutcome> {
        let mut state = load_run_state(&self.paths.state_path)?;
        let prd_path = self.paths.resolve(&state.prd_path);
        let mut set = load_item_set(&prd_path)?;

        let repaired = reconcile_items(&mut set, state.checkpoints.iter().map(|cp| cp.item_id));
        if !repaired.is_empty() {
            info!(?repaired, "re-applied checkpoints missing from the item set");
            write_item_set(&prd_path, &set)?;
            self.reporter.reconciled(&repaired);
        }

        let engine = PromptEngine::new();
        loop {
            self.transition(&mut state, None, Phase::Assigned)?;
            let Some(item) = set.select_item(state.current_item).cloned() else {
                state.current_item = None;
                state.clear_action();
                self.save(&state)?;
                self.reporter.phase_changed(None, Phase::Idle);
                info!(progress = %set.progress(), "all items complete");
                return Ok(RunOutcome::Complete {
                    completed: set.completed_count(),
                    total: set.total_count(),
                });
            };
            state.current_item = Some(item.id);
            self.save(&state)?;
            let position = set.completed_count() + 1;
            self.reporter.item_started(&item, position, set.total_count());

            match self.process_item(&mut state, &mut set, &item, &engine)? {
                ItemResult::Checkpointed => {
                    state.current_item = None;
                    state.clear_action();
                    self.save(&state)?;
                    self.reporter.phase_changed(Some(item.id), Phase::Idle);
                }
                ItemResult::Halted(kind, reason) => {
                    self.transition(&mut state, Some(item.id), Phase::Failed(kind))?;
                    warn!(item_id = item.id, %reason, "run halted");
                    self.reporter.halted(item.id, &reason);
                    return Ok(RunOutcome::Halted {
                        item_id: item.id,
                        reason,
                    });
                }
            }
        }
    }

    fn process_item(
        &mut self,
        state: &mut RunState,
        set: &mut ItemSet,
        item: &Item,
        engine: &PromptEngine,
    ) -> Result<ItemResult> {
        let prd_path = self.paths.resolve(&state.prd_path);

        self.transition(state, Some(item.id), Phase::Generating)?;
        state.reset_watchdog();
        self.save(state)?;
        let task = engine.render_item(set, item)?;
        self.append_log_header(item);
        let request = AgentRequest {
            workdir: self.paths.root.clone(),
            task,
            model: state.model.clone(),
            session_url: self.settings.session_url.clone(),
            watchdog_timeout_secs: state.watchdog_timeout,
            log_path: Some(self.paths.log_path.clone()),
        };
        let silent = Arc::new(AtomicBool::new(false));
        let callback = watchdog_callback(Arc::clone(&silent), self.reporter.watchdog_alert());

        let run = {
            let paths = self.paths;
            let reporter = &mut *self.reporter;
            let mut last_flush = Instant::now();
            let mut on_line = |line: &str| {
                state.record_output(Utc::now());
                reporter.agent_line(line);
                if last_flush.elapsed() >= OUTPUT_FLUSH_INTERVAL {
                    if silent.load(Ordering::SeqCst) {
                        state.mark_watchdog_triggered();
                    }
                    if let Err(err) = write_run_state(&paths.state_path, state) {
                        warn!(err = %format!("{err:#}"), "failed to flush run state");
                    }
                    last_flush = Instant::now();
                }
            };
            self.agent.run(&request, &mut on_line, Some(callback))
        };

        if run.watchdog.triggered {
            state.mark_watchdog_triggered();
            self.reporter.watchdog_timeout(&RalphError::WatchdogTimeout {
                silence: run.watchdog.silence,
            });
        }
        self.save(state)?;
        if !run.success() {
            debug!(exit_code = run.exit_code, "agent failed");
            return Ok(ItemResult::Halted(
                HaltKind::Agent,
                RalphError::AgentExecutionFailure {
                    exit_code: run.exit_code,
                },
            ));
        }

        self.transition(state, Some(item.id), Phase::Staging)?;
        let files_changed = self.vcs.stage_all().context("stage agent changes")?;
        if files_changed.is_empty() {
            self.reporter
                .warning(&format!("item {} produced no file changes", item.id));
        }

        self.transition(state, Some(item.id), Phase::Testing)?;
        if let Err(reason) = self.tests.run_tests(&self.paths.root) {
            return Ok(ItemResult::Halted(HaltKind::Tests, reason));
        }

        self.transition(state, Some(item.id), Phase::PreCommitHooks)?;
        let (passed, results) = run_hooks(
            &self.paths.root,
            &set.hooks.pre_commit,
            HookKind::PreCommit,
            FailurePolicy::StopOnFirst,
            self.settings.hook_timeout,
        );
        self.reporter.hooks_finished(HookKind::PreCommit, &results);
        if !passed {
            let reason = results
                .iter()
                .find(|result| !result.success)
                .map(|failed| RalphError::HookFailure {
                    command: failed.command.clone(),
                    exit_code: failed.exit_code,
                })
                .unwrap_or(RalphError::HookFailure {
                    command: String::new(),
                    exit_code: -1,
                });
            return Ok(ItemResult::Halted(HaltKind::Hooks, reason));
        }

        self.transition(state, Some(item.id), Phase::Checkpointing)?;
        let message = format!("[ralph] item-{}: {}", item.id, item.title);
        let body = format!(
            "Category: {}\nFiles changed: {}\nTests passed: true",
            item.category,
            files_changed.len()
        );
        let commit_sha = self.vcs.commit(&message, &body)?;
        let checkpoint = Checkpoint {
            item_id: item.id,
            commit_sha,
            timestamp: Utc::now(),
            files_changed,
            tests_passed: true,
            route: self.settings.session_url.clone().unwrap_or_default(),
        };
        state.add_checkpoint(checkpoint.clone());
        self.save(state)?;
        set.mark_complete(item.id);
        write_item_set(&prd_path, set)?;
        info!(item_id = item.id, sha = %checkpoint.commit_sha, "checkpoint created");
        self.reporter.checkpoint_created(item, &checkpoint);
        if state.auto_push
            && let Err(err) = self.vcs.push(&state.branch, true)
        {
            self.reporter.warning(&format!("push failed: {err:#}"));
        }

        self.transition(state, Some(item.id), Phase::PostItemHooks)?;
        let (_, results) = run_hooks(
            &self.paths.root,
            &set.hooks.post_item,
            HookKind::PostItem,
            FailurePolicy::ContinueOnFailure,
            self.settings.hook_timeout,
        );
        self.reporter.hooks_finished(HookKind::PostItem, &results);
        if let Some(failed) = results.iter().find(|result| !result.success) {
            self.reporter.warning(&format!(
                "post-item hook failed: {} (exit code {})",
                failed.command, failed.exit_code
            ));
        }

        Ok(ItemResult::Checkpointed)
    }

    /// Persist the phase label, then tell the reporter.
    fn transition(&mut self, state: &mut RunState, item_id: Option<u32>, phase: Phase) -> Result<()> {
        debug!(?item_id, phase = phase.name(), "phase transition");
        state.set_action(phase.label(), Utc::now());
        self.save(state)?;
        self.reporter.phase_changed(item_id, phase);
        Ok(())
    }

    fn save(&self, state: &RunState) -> Result<()> {
        write_run_state(&self.paths.state_path, state)
    }

    fn append_log_header(&self, item: &Item) {
        let header = format!(
            "\n=== Item {}: {} ({}) ===",
            item.id,
            item.title,
            Utc::now().to_rfc3339()
        );
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.paths.log_path)
            .and_then(|mut file| writeln!(file, "{header}"));
        if let Err(err) = result {
            warn!(%err, "failed to write agent log header");
        }
    }
}

fn watchdog_callback(silent: Arc<AtomicBool>, mut alert: Option<WatchdogCallback>) -> WatchdogCallback {
    Box::new(move |silence| {
        silent.store(true, Ordering::SeqCst);
        if let Some(alert) = alert.as_mut() {
            alert(silence);
        }
    })
}
