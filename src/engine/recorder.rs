//! Operation recording.
//!
//! Builds Operation+Action records for in-place and transfer steps. When the
//! operation type introduces a new bio state, destination samples are
//! derived: one new sample per distinct source sample per call, memoized so
//! several slots (or content lines) holding the same source collapse onto
//! one derived row. A source already in the target state is reused as-is.

use hashbrown::HashMap;

use crate::address::Address;
use crate::core::store::{EntityStore, StoreError};
use crate::labware::StateChange;
use crate::op::{Action, OperationType};
use crate::types::{CommentId, LabwareId, OperationId, SampleId};

/// One intended transfer edge, before destination samples are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedTransfer {
    /// Labware the material comes from.
    pub source_labware: LabwareId,
    /// Slot address within the source labware.
    pub source_address: Address,
    /// Sample being transferred.
    pub source_sample: SampleId,
    /// Labware the material goes to.
    pub dest_labware: LabwareId,
    /// Slot address within the destination labware.
    pub dest_address: Address,
}

/// Records an in-place operation: one action per (slot, sample) already in
/// each labware, source and destination identical. With a bio-state-changing
/// type, slot samples are replaced by their derived samples and each action
/// records the old→new edge.
pub fn record_in_place(
    store: &mut EntityStore,
    op_type: &OperationType,
    username: &str,
    labware_ids: &[LabwareId],
    performed_ms: Option<u64>,
    comment_ids: &[CommentId],
) -> Result<OperationId, StoreError> {
    let mut derived: HashMap<SampleId, SampleId> = HashMap::new();
    let mut actions = Vec::new();
    let mut replacements: Vec<(LabwareId, Address, SampleId, SampleId)> = Vec::new();

    for lw_id in labware_ids {
        let lw = store
            .labware(*lw_id)
            .ok_or(StoreError::MissingLabware(*lw_id))?;
        let contents: Vec<(Address, Vec<SampleId>)> = lw
            .filled_slots()
            .map(|slot| (slot.address, slot.sample_ids.clone()))
            .collect();
        for (address, sample_ids) in contents {
            for source in sample_ids {
                let dest = resolve_dest_sample(store, op_type, &mut derived, source)?;
                if dest != source {
                    replacements.push((*lw_id, address, source, dest));
                }
                actions.push(Action {
                    source_labware: *lw_id,
                    source_address: address,
                    source_sample: source,
                    dest_labware: *lw_id,
                    dest_address: address,
                    dest_sample: dest,
                });
            }
        }
    }

    let op_id = store.record_operation(
        &op_type.name,
        username,
        performed_ms,
        actions,
        comment_ids.to_vec(),
    )?;
    for (lw_id, address, old, new) in replacements {
        store.replace_sample_in_slot(lw_id, address, old, new)?;
    }
    apply_op_type_effects(store, op_type, labware_ids)?;
    Ok(op_id)
}

/// Records a transfer operation from an explicit plan, returning the
/// operation id and the resolved actions (destination samples included) for
/// the caller to populate destination slots from.
pub fn record_transfer(
    store: &mut EntityStore,
    op_type: &OperationType,
    username: &str,
    planned: &[PlannedTransfer],
    performed_ms: Option<u64>,
    comment_ids: &[CommentId],
) -> Result<(OperationId, Vec<Action>), StoreError> {
    let mut derived: HashMap<SampleId, SampleId> = HashMap::new();
    let mut actions = Vec::with_capacity(planned.len());
    for edge in planned {
        let dest_sample = resolve_dest_sample(store, op_type, &mut derived, edge.source_sample)?;
        actions.push(Action {
            source_labware: edge.source_labware,
            source_address: edge.source_address,
            source_sample: edge.source_sample,
            dest_labware: edge.dest_labware,
            dest_address: edge.dest_address,
            dest_sample,
        });
    }
    let op_id = store.record_operation(
        &op_type.name,
        username,
        performed_ms,
        actions.clone(),
        comment_ids.to_vec(),
    )?;
    Ok((op_id, actions))
}

/// Applies the operation type's source effects (discard, mark used, destroy,
/// release) once per distinct source labware.
pub fn apply_op_type_effects(
    store: &mut EntityStore,
    op_type: &OperationType,
    source_labware: &[LabwareId],
) -> Result<(), StoreError> {
    let mut distinct: Vec<LabwareId> = Vec::new();
    for id in source_labware {
        if !distinct.contains(id) {
            distinct.push(*id);
        }
    }
    for id in distinct {
        if op_type.flags.destroys {
            store.apply_state_change(id, StateChange::Destroy)?;
        }
        if op_type.flags.discards_source {
            store.apply_state_change(id, StateChange::Discard)?;
        }
        if op_type.flags.releases {
            store.apply_state_change(id, StateChange::Release)?;
        }
        if op_type.flags.marks_source_used {
            store.apply_state_change(id, StateChange::MarkUsed)?;
        }
    }
    Ok(())
}

fn resolve_dest_sample(
    store: &mut EntityStore,
    op_type: &OperationType,
    derived: &mut HashMap<SampleId, SampleId>,
    source: SampleId,
) -> Result<SampleId, StoreError> {
    let Some(target) = &op_type.new_bio_state else {
        return Ok(source);
    };
    let src = store
        .sample(source)
        .ok_or(StoreError::MissingSample(source))?;
    if &src.bio_state == target {
        return Ok(source);
    }
    if let Some(dest) = derived.get(&source) {
        return Ok(*dest);
    }
    let dest = store.create_derived_sample(source, target.clone())?;
    derived.insert(source, dest);
    Ok(dest)
}
