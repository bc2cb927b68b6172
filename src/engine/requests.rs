//! Shared validate-then-record request flows.
//!
//! Every flow has the same shape: run all relevant checks against one
//! [`Validation`], close it (raising the aggregated failure on any problem),
//! and only then mutate the store inside one transaction.

use hashbrown::HashSet;

use crate::address::Address;
use crate::core::store::{EntityStore, StoreError, now_ms};
use crate::op::Action;
use crate::sample::TissueDraft;
use crate::types::{CommentId, LabwareId, OperationId, SampleId};
use crate::validate::labware::{LabwareRules, bracket_list};
use crate::validate::pipeline::{OpAttribute, Validation};

use super::RequestError;
use super::recorder;

/// A generic in-place request (stain, destroy, release, ...): the named
/// operation type is recorded against each labware with its current
/// contents, and the type's source effects are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpRequest {
    /// Operation type to record; must be an in-place type.
    pub op_type: String,
    /// Responsible user.
    pub username: String,
    /// Labware to operate on.
    pub barcodes: Vec<String>,
    /// Works to link each operation to.
    pub work_numbers: Vec<String>,
    /// Comments to attach.
    pub comment_ids: Vec<CommentId>,
    /// Optional backdated timestamp.
    pub performed_ms: Option<u64>,
}

/// Validates and records an in-place request, one operation per labware.
pub fn record_op_request(
    store: &mut EntityStore,
    req: &OpRequest,
) -> Result<Vec<OperationId>, RequestError> {
    let mut v = Validation::new(store);
    let op_type = v.check_op_type(&req.op_type, &[OpAttribute::InPlace]);
    if req.barcodes.is_empty() {
        v.problem("No labware barcodes supplied");
    }
    let labware = v.check_labware(&req.barcodes, &LabwareRules::default());
    let works = v.check_work(&req.work_numbers);
    v.check_comments(&req.comment_ids);
    if let Some(performed) = req.performed_ms {
        v.check_timestamp(performed, now_ms(), &labware);
    }
    v.close()?;
    let Some(op_type) = op_type else {
        return Err(StoreError::UnknownOperationType(req.op_type.clone()).into());
    };

    let labware_ids: Vec<LabwareId> = labware.iter().map(|lw| lw.id).collect();
    store
        .transact(move |s| {
            let mut op_ids = Vec::with_capacity(labware_ids.len());
            for lw_id in &labware_ids {
                let op_id = recorder::record_in_place(
                    s,
                    &op_type,
                    &req.username,
                    std::slice::from_ref(lw_id),
                    req.performed_ms,
                    &req.comment_ids,
                )?;
                for work in &works {
                    s.link_work(op_id, &work.work_number)?;
                }
                op_ids.push(op_id);
            }
            Ok(op_ids)
        })
        .map_err(RequestError::Store)
}

/// One slot's worth of intake material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterContent {
    /// Destination slot address.
    pub address: Address,
    /// Donor the tissue was taken from.
    pub donor_name: String,
    /// Spatial location code within the donor organ.
    pub spatial_location: u32,
    /// Replicate number.
    pub replicate: u32,
    /// Fixative applied at collection.
    pub fixative: String,
    /// Storage medium.
    pub medium: String,
    /// External tissue identifier, if any.
    pub external_name: Option<String>,
    /// Bio state the original sample is created in.
    pub bio_state: String,
    /// Convert the slot into a block of the new sample.
    pub block: bool,
}

/// Intake of new material: creates tissue, original samples, and labware in
/// one request, recording the in-place registration operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Operation type to record; must be an in-place type.
    pub op_type: String,
    /// Responsible user.
    pub username: String,
    /// Labware type to create.
    pub labware_type: String,
    /// Externally supplied barcode (required for prebarcoded types).
    pub external_barcode: Option<String>,
    /// Per-slot intake material.
    pub contents: Vec<RegisterContent>,
    /// Works to link the operation to.
    pub work_numbers: Vec<String>,
    /// Optional backdated timestamp.
    pub performed_ms: Option<u64>,
}

/// Result of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterOutcome {
    /// Created labware id.
    pub labware_id: LabwareId,
    /// Created labware barcode.
    pub barcode: String,
    /// The recorded registration operation.
    pub operation_id: OperationId,
    /// Created sample ids, one per content line.
    pub sample_ids: Vec<SampleId>,
}

/// Validates and executes a registration request.
pub fn register(store: &mut EntityStore, req: &RegisterRequest) -> Result<RegisterOutcome, RequestError> {
    let mut v = Validation::new(store);
    let op_type = v.check_op_type(&req.op_type, &[OpAttribute::InPlace]);

    let labware_type = match store.labware_type(&req.labware_type) {
        Some(lt) => Some(lt.clone()),
        None => {
            v.problem(format!("Unknown labware type: {}", req.labware_type));
            None
        }
    };

    if req.contents.is_empty() {
        v.problem("No contents supplied");
    }

    if let Some(lt) = &labware_type {
        if lt.prebarcoded && req.external_barcode.is_none() {
            v.problem(format!("Labware type {} requires an external barcode", lt.name));
        }
        let mut seen = HashSet::new();
        let mut repeated = Vec::new();
        let mut invalid = Vec::new();
        for content in &req.contents {
            let address = content.address;
            if !seen.insert(address) && !repeated.contains(&address) {
                repeated.push(address);
            }
            if !lt.contains(address) && !invalid.contains(&address) {
                invalid.push(address);
            }
        }
        if !repeated.is_empty() {
            v.problem(format!("Repeated address: {}", bracket_list(&repeated)));
        }
        if !invalid.is_empty() {
            v.problem(format!(
                "Invalid address for labware type {}: {}",
                lt.name,
                bracket_list(&invalid)
            ));
        }
        if req.contents.iter().any(|c| c.block) && !lt.supports_blocks {
            v.problem(format!("Labware type {} does not support blocks", lt.name));
        }
    }

    if let Some(bc) = &req.external_barcode {
        if store.labware_by_barcode(bc).is_some() {
            v.problem(format!("Labware barcode already in use: {bc}"));
        }
    }

    let mut unknown_states = Vec::new();
    for content in &req.contents {
        if store.bio_state(&content.bio_state).is_none() && !unknown_states.contains(&content.bio_state) {
            unknown_states.push(content.bio_state.clone());
        }
    }
    if !unknown_states.is_empty() {
        v.problem(format!("Unknown bio state: {}", bracket_list(&unknown_states)));
    }

    let works = v.check_work(&req.work_numbers);
    if let Some(performed) = req.performed_ms {
        v.check_timestamp(performed, now_ms(), &[]);
    }
    v.close()?;
    let Some(op_type) = op_type else {
        return Err(StoreError::UnknownOperationType(req.op_type.clone()).into());
    };
    let Some(labware_type) = labware_type else {
        return Err(StoreError::UnknownLabwareType(req.labware_type.clone()).into());
    };

    store
        .transact(move |s| {
            let labware_id = if labware_type.prebarcoded {
                let bc = req
                    .external_barcode
                    .clone()
                    .ok_or_else(|| StoreError::UnknownLabwareType(labware_type.name.clone()))?;
                s.create_labware_with_barcode(&labware_type.name, &bc)?
            } else {
                s.create_labware(&labware_type.name, req.external_barcode.clone())?
            };

            let mut sample_ids = Vec::with_capacity(req.contents.len());
            for content in &req.contents {
                let tissue_id = s.create_tissue(TissueDraft {
                    donor_name: content.donor_name.clone(),
                    spatial_location: content.spatial_location,
                    replicate: content.replicate,
                    fixative: content.fixative.clone(),
                    medium: content.medium.clone(),
                    external_name: content.external_name.clone(),
                });
                let sample_id = s.create_sample(tissue_id, &content.bio_state, None)?;
                s.add_sample_to_slot(labware_id, content.address, sample_id)?;
                if content.block {
                    s.convert_slot_to_block(labware_id, content.address, sample_id)?;
                }
                sample_ids.push(sample_id);
            }

            let operation_id = recorder::record_in_place(
                s,
                &op_type,
                &req.username,
                &[labware_id],
                req.performed_ms,
                &[],
            )?;
            for work in &works {
                s.link_work(operation_id, &work.work_number)?;
            }

            let barcode = s
                .labware(labware_id)
                .map(|lw| lw.barcode.clone())
                .ok_or(StoreError::MissingLabware(labware_id))?;

            Ok(RegisterOutcome {
                labware_id,
                barcode,
                operation_id,
                sample_ids,
            })
        })
        .map_err(RequestError::Store)
}

/// Empties specific slots after recording a compensating operation: one
/// action per removed (slot, sample), source and destination identical, so
/// the clear is never silent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanOutRequest {
    /// Operation type to record; must be an in-place type.
    pub op_type: String,
    /// Responsible user.
    pub username: String,
    /// Labware holding the slots.
    pub barcode: String,
    /// Slots to empty.
    pub addresses: Vec<Address>,
    /// Works to link the operation to.
    pub work_numbers: Vec<String>,
    /// Comments to attach.
    pub comment_ids: Vec<CommentId>,
}

/// Validates and executes a clean-out request.
pub fn clean_out(store: &mut EntityStore, req: &CleanOutRequest) -> Result<OperationId, RequestError> {
    let mut v = Validation::new(store);
    let op_type = v.check_op_type(&req.op_type, &[OpAttribute::InPlace]);
    let labware = v.check_labware(
        std::slice::from_ref(&req.barcode),
        &LabwareRules::default(),
    );

    if req.addresses.is_empty() {
        v.problem("No addresses supplied");
    }
    if let Some(lw) = labware.first() {
        let mut invalid = Vec::new();
        let mut empty = Vec::new();
        for address in &req.addresses {
            match lw.slot(*address) {
                None => {
                    if !invalid.contains(address) {
                        invalid.push(*address);
                    }
                }
                Some(slot) if slot.is_empty() => {
                    if !empty.contains(address) {
                        empty.push(*address);
                    }
                }
                Some(_) => {}
            }
        }
        if !invalid.is_empty() {
            v.problem(format!("Invalid address: {}", bracket_list(&invalid)));
        }
        if !empty.is_empty() {
            v.problem(format!("Cannot clean out empty slot: {}", bracket_list(&empty)));
        }
    }
    let works = v.check_work(&req.work_numbers);
    v.check_comments(&req.comment_ids);
    v.close()?;
    let Some(op_type) = op_type else {
        return Err(StoreError::UnknownOperationType(req.op_type.clone()).into());
    };
    let Some(lw) = labware.first() else {
        return Err(StoreError::UnknownBarcode(req.barcode.clone()).into());
    };
    let labware_id = lw.id;

    store
        .transact(move |s| {
            // Compensating actions come from current contents, read inside
            // the transaction.
            let lw = s
                .labware(labware_id)
                .ok_or(StoreError::MissingLabware(labware_id))?;
            let mut actions = Vec::new();
            for address in &req.addresses {
                let slot = lw.slot(*address).ok_or(StoreError::InvalidAddress {
                    barcode: lw.barcode.clone(),
                    address: *address,
                })?;
                for sample in &slot.sample_ids {
                    actions.push(Action {
                        source_labware: labware_id,
                        source_address: *address,
                        source_sample: *sample,
                        dest_labware: labware_id,
                        dest_address: *address,
                        dest_sample: *sample,
                    });
                }
            }
            let op_id = s.record_operation(
                &op_type.name,
                &req.username,
                None,
                actions,
                req.comment_ids.clone(),
            )?;
            for address in &req.addresses {
                s.clean_out_slot(labware_id, *address)?;
            }
            for work in &works {
                s.link_work(op_id, &work.work_number)?;
            }
            Ok(op_id)
        })
        .map_err(RequestError::Store)
}
