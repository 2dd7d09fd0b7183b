//! Undo checkpoints by revert commit or hard reset.
//!
//! Each undone checkpoint flips its item back to incomplete and drops the
//! checkpoint record, keeping `passes == true` exactly for checkpointed items.
//! The PRD is written once, after all git operations, from the copy loaded at
//! the start: git may rewrite a tracked PRD while reverting, and a dirty PRD
//! would make the next `git revert` refuse to run. It is written back even
//! when a git operation fails, so a failed undo leaves the PRD as it was.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::items::ItemSet;
use crate::error::RalphError;
use crate::io::git::VersionControl;
use crate::io::item_store::{load_item_set, write_item_set};
use crate::io::paths::RalphPaths;
use crate::io::run_state::{Checkpoint, RunState, load_run_state, write_run_state};

/// How a checkpoint is undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackMode {
    /// Add an inverse commit; history is preserved.
    Revert,
    /// `git reset --hard <sha>^`; the commit and everything after it is gone.
    Hard,
}

impl RollbackMode {
    pub fn from_hard(hard: bool) -> Self {
        if hard {
            RollbackMode::Hard
        } else {
            RollbackMode::Revert
        }
    }
}

/// Checkpoints that were undone, most recent first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub undone: Vec<Checkpoint>,
}

impl RollbackOutcome {
    pub fn item_ids(&self) -> Vec<u32> {
        self.undone.iter().map(|cp| cp.item_id).collect()
    }
}

/// Undo the most recent `count` checkpoints.
///
/// `count` is clamped to the number of checkpoints; with none, nothing changes.
#[instrument(skip_all, fields(count = count, mode = ?mode))]
pub fn rollback<V: VersionControl>(
    paths: &RalphPaths,
    vcs: &V,
    count: usize,
    mode: RollbackMode,
) -> Result<RollbackOutcome> {
    let mut state = load_run_state(&paths.state_path)?;
    let prd_path = paths.resolve(&state.prd_path);
    let mut set = load_item_set(&prd_path)?;

    let count = count.min(state.checkpoints.len());
    let targets: Vec<Checkpoint> = state.checkpoints.iter().rev().take(count).cloned().collect();
    if targets.is_empty() {
        return Ok(RollbackOutcome { undone: Vec::new() });
    }
    prepare_prd(vcs, &prd_path, mode)?;
    let mut undone = Vec::with_capacity(targets.len());
    let result = targets
        .into_iter()
        .try_for_each(|checkpoint| -> Result<()> {
            undo_checkpoint(vcs, &checkpoint, mode)?;
            state.remove_checkpoint(checkpoint.item_id);
            write_run_state(&paths.state_path, &state)?;
            set.mark_incomplete(checkpoint.item_id);
            undone.push(checkpoint);
            Ok(())
        });
    write_item_set(&prd_path, &set)?;
    result?;

    info!(undone = undone.len(), "rollback complete");
    Ok(RollbackOutcome { undone })
}

/// Undo the checkpoint of one item.
///
/// A missing item is [`RalphError::ItemNotFound`]; an item without a
/// checkpoint is [`RalphError::RollbackTargetMissing`] and leaves all state
/// untouched. A hard reset also discards every later checkpoint, so those are
/// undone too. With `set_current` the item becomes the run's current item and
/// is retried first on resume.
#[instrument(skip_all, fields(item_id = item_id, mode = ?mode, set_current = set_current))]
pub fn reset_item<V: VersionControl>(
    paths: &RalphPaths,
    vcs: &V,
    item_id: u32,
    mode: RollbackMode,
    set_current: bool,
) -> Result<RollbackOutcome> {
    let mut state = load_run_state(&paths.state_path)?;
    let prd_path = paths.resolve(&state.prd_path);
    let mut set = load_item_set(&prd_path)?;

    if set.item(item_id).is_none() {
        return Err(RalphError::ItemNotFound { item_id }.into());
    }
    let position = state
        .checkpoints
        .iter()
        .position(|cp| cp.item_id == item_id)
        .ok_or(RalphError::RollbackTargetMissing { item_id })?;
    let checkpoint = state.checkpoints[position].clone();

    prepare_prd(vcs, &prd_path, mode)?;
    if let Err(err) = undo_checkpoint(vcs, &checkpoint, mode) {
        write_item_set(&prd_path, &set)?;
        return Err(err);
    }
    let discarded = match mode {
        RollbackMode::Hard => state.checkpoints.split_off(position),
        RollbackMode::Revert => vec![state.checkpoints.remove(position)],
    };
    apply_undone(&mut state, &mut set, &discarded);
    if set_current {
        state.current_item = Some(item_id);
    }
    write_run_state(&paths.state_path, &state)?;
    write_item_set(&prd_path, &set)?;

    info!(undone = discarded.len(), "item reset");
    let mut undone = discarded;
    undone.reverse();
    Ok(RollbackOutcome { undone })
}

/// A tracked PRD is usually dirty (the last completion is not committed yet)
/// and would block `git revert`. The in-memory item set is written back
/// afterwards, so the working copy can be dropped.
fn prepare_prd<V: VersionControl>(vcs: &V, prd_path: &Path, mode: RollbackMode) -> Result<()> {
    if mode == RollbackMode::Revert {
        vcs.restore_file(prd_path)
            .with_context(|| format!("restore {}", prd_path.display()))?;
    }
    Ok(())
}

/// An item that changed no files has an empty checkpoint commit, which
/// `git revert` refuses; in revert mode it is skipped.
fn undo_checkpoint<V: VersionControl>(vcs: &V, checkpoint: &Checkpoint, mode: RollbackMode) -> Result<()> {
    let sha = &checkpoint.commit_sha;
    let item_id = checkpoint.item_id;
    match mode {
        RollbackMode::Revert => {
            if vcs.is_empty_commit(sha)? {
                info!(item_id, %sha, "checkpoint changed no files, skipping revert");
                return Ok(());
            }
            vcs.revert_commit(sha)
                .with_context(|| format!("revert checkpoint of item {item_id}"))
        }
        RollbackMode::Hard => vcs
            .reset_hard(&format!("{sha}^"))
            .with_context(|| format!("reset before checkpoint of item {item_id}")),
    }
}

fn apply_undone(state: &mut RunState, set: &mut ItemSet, undone: &[Checkpoint]) {
    for checkpoint in undone {
        state.completed_items.retain(|id| *id != checkpoint.item_id);
        set.mark_incomplete(checkpoint.item_id);
    }
}
