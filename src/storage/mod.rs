//! Storage-attachment reconciler and `BlockData` state machine. Pure
//! functions over the entity structs; the facade supplies the cache
//! lookups and holds the attachment lock around the calls.

use std::collections::BTreeSet;

use crate::error::{DatastoreError, Result};
use crate::types::{BlockState, Id, StorageAttachment};

/// One allowed `BlockData` transition, or a rejection; anything not
/// listed here is not a valid move. `Available -> InUse` and
/// `InUse -> Available` are the direct moves the explicit attach/detach
/// and reconciler paths use; `Attaching`/`Detaching` are for a launcher
/// reporting progress through `update_block_device` instead.
pub fn transition(from: BlockState, to: BlockState) -> Result<BlockState> {
    use BlockState::*;
    match (from, to) {
        (Available, Attaching)
        | (Available, InUse)
        | (Attaching, InUse)
        | (Attaching, Available)
        | (InUse, Detaching)
        | (InUse, Available)
        | (Detaching, Available)
        | (Detaching, InUse) => Ok(to),
        _ => Err(DatastoreError::LifecycleFailure(format!(
            "invalid block state transition {:?} -> {:?}",
            from, to
        ))),
    }
}

/// Diff between an instance's current attachment set and a node-reported
/// volume list. `to_create` are volumes present in the report but not in
/// `current`; `to_remove` are attachment ids present in `current` but
/// whose volume is absent from the report.
pub struct ReconcileDiff {
    pub to_create: Vec<Id>,
    pub to_remove: Vec<Id>,
}

/// Computes the diff for one instance. `current` is this instance's
/// existing attachments (attachment id -> volume id); `reported` is the
/// node's volume list for this instance.
pub fn reconcile(current: &[(Id, Id)], reported: &[Id]) -> ReconcileDiff {
    let reported_set: BTreeSet<&Id> = reported.iter().collect();
    let current_volumes: BTreeSet<&Id> = current.iter().map(|(_, vol)| vol).collect();

    let to_create = reported
        .iter()
        .filter(|v| !current_volumes.contains(v))
        .cloned()
        .collect();

    let to_remove = current
        .iter()
        .filter(|(_, vol)| !reported_set.contains(vol))
        .map(|(attachment_id, _)| attachment_id.clone())
        .collect();

    ReconcileDiff { to_create, to_remove }
}

pub fn new_attachment(instance_id: Id, volume_id: Id, ephemeral: bool, boot: bool) -> StorageAttachment {
    StorageAttachment {
        id: crate::types::new_id(),
        instance_id,
        volume_id,
        ephemeral,
        boot,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_then_fail_rolls_back_to_available() {
        let state = transition(BlockState::Available, BlockState::Attaching).unwrap();
        assert_eq!(state, BlockState::Attaching);
        let rolled_back = transition(state, BlockState::Available).unwrap();
        assert_eq!(rolled_back, BlockState::Available);
    }

    #[test]
    fn detach_failure_restores_in_use() {
        let state = transition(BlockState::InUse, BlockState::Detaching).unwrap();
        let rolled_back = transition(state, BlockState::InUse).unwrap();
        assert_eq!(rolled_back, BlockState::InUse);
    }

    #[test]
    fn invalid_transition_rejected() {
        let err = transition(BlockState::Attaching, BlockState::Detaching);
        assert!(err.is_err());
    }

    #[test]
    fn direct_attach_and_detach_are_valid() {
        let in_use = transition(BlockState::Available, BlockState::InUse).unwrap();
        assert_eq!(in_use, BlockState::InUse);
        let available = transition(BlockState::InUse, BlockState::Available).unwrap();
        assert_eq!(available, BlockState::Available);
    }

    #[test]
    fn reconcile_creates_new_attachment_for_reported_volume() {
        let diff = reconcile(&[], &["v1".to_string()]);
        assert_eq!(diff.to_create, vec!["v1".to_string()]);
        assert!(diff.to_remove.is_empty());
    }

    #[test]
    fn reconcile_removes_attachment_for_unreported_volume() {
        let current = vec![("a1".to_string(), "v1".to_string())];
        let diff = reconcile(&current, &[]);
        assert!(diff.to_create.is_empty());
        assert_eq!(diff.to_remove, vec!["a1".to_string()]);
    }

    #[test]
    fn reconcile_twice_is_idempotent() {
        let current = vec![("a1".to_string(), "v1".to_string())];
        let diff = reconcile(&current, &["v1".to_string()]);
        assert!(diff.to_create.is_empty());
        assert!(diff.to_remove.is_empty());
    }
}
