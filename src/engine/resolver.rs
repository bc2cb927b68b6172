//! Latest-operation resolution.
//!
//! Many request types gate on "has operation type T already happened to this
//! labware". The winning operation per labware is the one that supersedes
//! all others: later `performed_ms` wins, ties broken by higher id. The
//! tie-break assumes operation ids correlate with insertion order, which
//! holds because ids issue from the store's single monotonic counter inside
//! the single-writer loop.

use hashbrown::HashMap;

use crate::core::store::EntityStore;
use crate::op::Operation;
use crate::types::LabwareId;

/// True when `a` supersedes `b`: `b` is absent, or `a` was performed later,
/// or they were performed at the same time and `a` has the higher id.
pub fn supersedes(a: &Operation, b: Option<&Operation>) -> bool {
    match b {
        None => true,
        Some(b) => {
            a.performed_ms > b.performed_ms || (a.performed_ms == b.performed_ms && a.id > b.id)
        }
    }
}

/// Retains, per requested labware, the candidate operation superseding all
/// others that touch it as a destination. Labware with no qualifying
/// candidate is returned in the second element rather than silently omitted.
pub fn latest_per_labware<'a>(
    candidates: &[&'a Operation],
    labware_ids: &[LabwareId],
) -> (HashMap<LabwareId, &'a Operation>, Vec<LabwareId>) {
    let mut latest: HashMap<LabwareId, &Operation> = HashMap::new();
    for &op in candidates {
        for lw in labware_ids {
            if op.actions.iter().any(|a| a.dest_labware == *lw)
                && supersedes(op, latest.get(lw).copied())
            {
                latest.insert(*lw, op);
            }
        }
    }
    let missing: Vec<LabwareId> = labware_ids
        .iter()
        .filter(|lw| !latest.contains_key(*lw))
        .copied()
        .collect();
    (latest, missing)
}

/// Resolves the latest operation of `op_type` for each labware, using the
/// store's destination index to gather candidates.
pub fn latest_of_type<'a>(
    store: &'a EntityStore,
    op_type: &str,
    labware_ids: &[LabwareId],
) -> (HashMap<LabwareId, &'a Operation>, Vec<LabwareId>) {
    let mut candidates: Vec<&Operation> = Vec::new();
    for lw in labware_ids {
        for op in store.operations_of_type_on(op_type, *lw) {
            if !candidates.iter().any(|c| c.id == op.id) {
                candidates.push(op);
            }
        }
    }
    latest_per_labware(&candidates, labware_ids)
}
