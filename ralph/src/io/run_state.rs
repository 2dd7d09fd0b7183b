//! Durable run bookkeeping (`.ralph/state.json`).
//!
//! The run state is the single source of truth for which items were
//! checkpointed and what the loop was doing when it last stopped. It is
//! rewritten atomically on every transition.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::progress::{estimate_remaining_secs, format_action_elapsed, format_elapsed, format_eta};
use crate::error::RalphError;
use crate::io::paths::{RUN_DIR, RalphPaths};

/// Durable link between a completed item and its commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Checkpoint {
    pub item_id: u32,
    pub commit_sha: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub files_changed: Vec<String>,
    pub tests_passed: bool,
    /// Session route the agent ran under, empty when none was configured.
    #[serde(default)]
    pub route: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunState {
    pub branch: String,
    pub prd_path: PathBuf,
    pub current_item: Option<u32>,
    /// Always equal to the item ids in `checkpoints`.
    pub completed_items: Vec<u32>,
    pub started_at: DateTime<Utc>,
    pub checkpoints: Vec<Checkpoint>,
    pub agent: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub auto_push: bool,
    #[serde(default)]
    pub pr_url: Option<String>,
    pub base_branch: String,
    #[serde(default)]
    pub current_action: String,
    #[serde(default)]
    pub action_started_at: Option<DateTime<Utc>>,
    /// Seconds; `<= 0` disables the watchdog.
    #[serde(default)]
    pub watchdog_timeout: i64,
    #[serde(default)]
    pub watchdog_triggered: bool,
    #[serde(default)]
    pub last_output_at: Option<DateTime<Utc>>,
}

/// Fields fixed when a run starts.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub branch: String,
    pub base_branch: String,
    pub prd_path: PathBuf,
    pub agent: String,
    pub model: Option<String>,
    pub auto_push: bool,
    pub watchdog_timeout: i64,
}

impl RunState {
    pub fn new(run: NewRun, now: DateTime<Utc>) -> Self {
        Self {
            branch: run.branch,
            prd_path: run.prd_path,
            current_item: None,
            completed_items: Vec::new(),
            started_at: now,
            checkpoints: Vec::new(),
            agent: run.agent,
            model: run.model,
            auto_push: run.auto_push,
            pr_url: None,
            base_branch: run.base_branch,
            current_action: String::new(),
            action_started_at: None,
            watchdog_timeout: run.watchdog_timeout,
            watchdog_triggered: false,
            last_output_at: None,
        }
    }

    /// Append a checkpoint and record its item as completed (once).
    pub fn add_checkpoint(&mut self, checkpoint: Checkpoint) {
        if !self.completed_items.contains(&checkpoint.item_id) {
            self.completed_items.push(checkpoint.item_id);
        }
        self.checkpoints.push(checkpoint);
    }

    /// Remove the checkpoint for `item_id`, returning it if there was one.
    pub fn remove_checkpoint(&mut self, item_id: u32) -> Option<Checkpoint> {
        let index = self
            .checkpoints
            .iter()
            .position(|cp| cp.item_id == item_id)?;
        let removed = self.checkpoints.remove(index);
        self.completed_items.retain(|id| *id != item_id);
        Some(removed)
    }

    pub fn checkpoint(&self, item_id: u32) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|cp| cp.item_id == item_id)
    }

    pub fn set_action(&mut self, label: &str, now: DateTime<Utc>) {
        self.current_action = label.to_string();
        self.action_started_at = Some(now);
    }

    pub fn clear_action(&mut self) {
        self.current_action.clear();
        self.action_started_at = None;
    }

    /// Start a fresh watchdog window for a new agent invocation.
    pub fn reset_watchdog(&mut self) {
        self.watchdog_triggered = false;
        self.last_output_at = None;
    }

    pub fn record_output(&mut self, now: DateTime<Utc>) {
        self.last_output_at = Some(now);
    }

    pub fn mark_watchdog_triggered(&mut self) {
        self.watchdog_triggered = true;
    }

    /// Seconds since the agent last produced output, if it has.
    pub fn silence(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_output_at
            .map(|at| (now - at).num_seconds().max(0))
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> String {
        format_elapsed((now - self.started_at).num_seconds())
    }

    /// Time spent in the current action, if one is set.
    pub fn action_elapsed(&self, now: DateTime<Utc>) -> Option<String> {
        if self.current_action.is_empty() {
            return None;
        }
        self.action_started_at
            .map(|at| format_action_elapsed((now - at).num_seconds()))
    }

    /// Projected time to finish, from the per-item pace so far.
    pub fn eta(&self, total_items: usize, now: DateTime<Utc>) -> Option<String> {
        if self.checkpoints.is_empty() {
            return None;
        }
        let completed = self.completed_items.len();
        let remaining = total_items.saturating_sub(completed);
        estimate_remaining_secs((now - self.started_at).num_seconds(), completed, remaining)
            .map(format_eta)
    }
}

pub fn run_state_exists(paths: &RalphPaths) -> bool {
    paths.state_path.exists()
}

/// Load run state; a missing file is [`RalphError::RunStateNotFound`].
pub fn load_run_state(path: &Path) -> Result<RunState> {
    debug!(path = %path.display(), "loading run state");
    if !path.exists() {
        return Err(RalphError::RunStateNotFound.into());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run state {}", path.display()))?;
    let state: RunState = serde_json::from_str(&contents)
        .with_context(|| format!("parse run state {}", path.display()))?;
    debug!(branch = %state.branch, checkpoints = state.checkpoints.len(), "run state loaded");
    Ok(state)
}

/// Atomically write run state to disk (temp file + rename).
pub fn write_run_state(path: &Path, state: &RunState) -> Result<()> {
    debug!(path = %path.display(), action = %state.current_action, "writing run state");
    let mut buf = serde_json::to_string_pretty(state)?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

/// Delete the run directory, ending the run.
pub fn clear_run(paths: &RalphPaths) -> Result<bool> {
    if !paths.run_dir.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(&paths.run_dir)
        .with_context(|| format!("remove {}", paths.run_dir.display()))?;
    Ok(true)
}

/// Make sure the run directory is ignored so it never lands in a checkpoint.
///
/// Returns true when `.gitignore` was modified.
pub fn ensure_gitignored(paths: &RalphPaths) -> Result<bool> {
    let entry = format!("{RUN_DIR}/");
    let path = &paths.gitignore_path;
    let existing = if path.exists() {
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?
    } else {
        String::new()
    };
    if existing.lines().any(|line| {
        let line = line.trim();
        line == entry || line == RUN_DIR || line == format!("/{entry}")
    }) {
        return Ok(false);
    }
    let mut out = existing;
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&entry);
    out.push('\n');
    fs::write(path, out).with_context(|| format!("write {}", path.display()))?;
    Ok(true)
}
