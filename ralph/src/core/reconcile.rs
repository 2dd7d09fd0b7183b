//! Repair the item/checkpoint relationship after an interrupted checkpoint.
//!
//! A checkpoint is recorded in run state before the item set is rewritten, so
//! a crash between the two writes leaves a checkpoint whose item still reads
//! `passes: false`. The commit already exists; the fix is to mark the item
//! complete, never to commit again.

use crate::core::items::ItemSet;

/// Mark every checkpointed item complete. Returns the ids that changed.
pub fn reconcile_items<I>(set: &mut ItemSet, checkpointed: I) -> Vec<u32>
where
    I: IntoIterator<Item = u32>,
{
    let mut repaired = Vec::new();
    for id in checkpointed {
        let pending = set.item(id).is_some_and(|item| !item.passes);
        if pending && set.mark_complete(id) {
            repaired.push(id);
        }
    }
    repaired
}
