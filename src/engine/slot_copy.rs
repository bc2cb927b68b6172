//! Slot-to-slot copy engine.
//!
//! Copies sample contents from arbitrary source slots into a new or existing
//! destination labware: validates every reference, derives destination
//! samples for bio-state-changing types (memoized per source sample across
//! the whole request), populates destination slots, records one action per
//! transferred sample, applies source discard/mark-used effects, and links
//! the supplied work. Validation failure aborts with zero writes; the
//! execution sequence runs inside one store transaction.

use hashbrown::{HashMap, HashSet};

use crate::address::Address;
use crate::core::store::{EntityStore, StoreError, now_ms};
use crate::labware::Labware;
use crate::sample::BioState;
use crate::types::{CommentId, LabwareId, OperationId, SampleId};
use crate::validate::labware::{LabwareRules, bracket_list};
use crate::validate::pipeline::{OpAttribute, Validation};

use super::RequestError;
use super::recorder::{self, PlannedTransfer};

/// One content instruction: source slot → destination address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCopyContent {
    /// Barcode of the source labware.
    pub source_barcode: String,
    /// Slot to copy from.
    pub source_address: Address,
    /// Slot to copy into on the destination.
    pub dest_address: Address,
}

/// Where the copied material goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotCopyDestination {
    /// Create new labware of this type.
    New {
        /// Labware type name.
        labware_type: String,
    },
    /// Reuse existing labware; targeted addresses must be free.
    Existing {
        /// Barcode of the destination labware.
        barcode: String,
    },
}

/// A full slot-copy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCopyRequest {
    /// Operation type to record; must be a transfer type.
    pub op_type: String,
    /// Responsible user.
    pub username: String,
    /// Destination labware resolution.
    pub destination: SlotCopyDestination,
    /// Content instructions.
    pub contents: Vec<SlotCopyContent>,
    /// Works to link the operation to.
    pub work_numbers: Vec<String>,
    /// Comments to attach.
    pub comment_ids: Vec<CommentId>,
    /// Optional backdated timestamp.
    pub performed_ms: Option<u64>,
}

/// Result of a successful slot copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotCopyOutcome {
    /// The recorded operation.
    pub operation_id: OperationId,
    /// Destination labware id.
    pub dest_labware_id: LabwareId,
    /// Destination labware barcode.
    pub dest_barcode: String,
    /// True when the destination labware was created by this request.
    pub created_labware: bool,
}

/// Validates and executes a slot-copy request.
pub fn perform(store: &mut EntityStore, req: &SlotCopyRequest) -> Result<SlotCopyOutcome, RequestError> {
    let mut v = Validation::new(store);

    let op_type = v.check_op_type(&req.op_type, &[OpAttribute::Transfer]);

    if req.contents.is_empty() {
        v.problem("No contents supplied");
    }

    let mut source_barcodes: Vec<String> = Vec::new();
    for content in &req.contents {
        if !source_barcodes.contains(&content.source_barcode) {
            source_barcodes.push(content.source_barcode.clone());
        }
    }
    let source_rules = LabwareRules {
        require_non_empty: false,
        ..LabwareRules::default()
    };
    let sources = v.check_labware(&source_barcodes, &source_rules);
    let sources_by_barcode: HashMap<&str, &Labware> =
        sources.iter().map(|lw| (lw.barcode.as_str(), lw)).collect();

    let mut bad_source_addresses = Vec::new();
    let mut empty_source_slots = Vec::new();
    for content in &req.contents {
        let Some(lw) = lookup_source(&sources_by_barcode, &content.source_barcode) else {
            continue;
        };
        match lw.slot(content.source_address) {
            None => {
                let label = format!("{}:{}", lw.barcode, content.source_address);
                if !bad_source_addresses.contains(&label) {
                    bad_source_addresses.push(label);
                }
            }
            Some(slot) if slot.is_empty() => {
                let label = format!("{}:{}", lw.barcode, content.source_address);
                if !empty_source_slots.contains(&label) {
                    empty_source_slots.push(label);
                }
            }
            Some(_) => {}
        }
    }
    if !bad_source_addresses.is_empty() {
        v.problem(format!(
            "Invalid source slot address: {}",
            bracket_list(&bad_source_addresses)
        ));
    }
    if !empty_source_slots.is_empty() {
        v.problem(format!(
            "Source slot is empty: {}",
            bracket_list(&empty_source_slots)
        ));
    }

    // Resolve the destination grid so destination addresses can be checked.
    let mut existing_dest: Option<Labware> = None;
    let dest_type = match &req.destination {
        SlotCopyDestination::New { labware_type } => match store.labware_type(labware_type) {
            Some(lt) if lt.prebarcoded => {
                v.problem(format!("Labware type {labware_type} expects prebarcoded labware"));
                None
            }
            Some(lt) => Some(lt.clone()),
            None => {
                v.problem(format!("Unknown labware type: {labware_type}"));
                None
            }
        },
        SlotCopyDestination::Existing { barcode } => match store.labware_by_barcode(barcode) {
            Some(lw) => {
                let refs = [lw];
                let dest_rules = LabwareRules {
                    require_non_empty: false,
                    ..LabwareRules::default()
                };
                for msg in crate::validate::labware::validate_labware(store, &dest_rules, &refs) {
                    v.problem(msg);
                }
                existing_dest = Some(lw.clone());
                Some(lw.labware_type.clone())
            }
            None => {
                v.problem(format!("Unknown labware barcode: [{barcode}]"));
                None
            }
        },
    };

    let mut seen_dest = HashSet::new();
    let mut repeated_dest = Vec::new();
    let mut invalid_dest = Vec::new();
    let mut occupied_dest = Vec::new();
    for content in &req.contents {
        let address = content.dest_address;
        if !seen_dest.insert(address) && !repeated_dest.contains(&address) {
            repeated_dest.push(address);
        }
        if let Some(lt) = &dest_type {
            if !lt.contains(address) {
                if !invalid_dest.contains(&address) {
                    invalid_dest.push(address);
                }
                continue;
            }
        }
        if let Some(dest) = &existing_dest {
            if dest.slot(address).is_some_and(|slot| !slot.is_empty())
                && !occupied_dest.contains(&address)
            {
                occupied_dest.push(address);
            }
        }
    }
    if !repeated_dest.is_empty() {
        v.problem(format!(
            "Repeated destination address: {}",
            bracket_list(&repeated_dest)
        ));
    }
    if !invalid_dest.is_empty() {
        v.problem(format!(
            "Invalid destination address: {}",
            bracket_list(&invalid_dest)
        ));
    }
    if !occupied_dest.is_empty() {
        v.problem(format!(
            "Destination slot already occupied: {}",
            bracket_list(&occupied_dest)
        ));
    }

    if let (Some(dest), Some(ot)) = (&existing_dest, &op_type) {
        if !dest.is_empty() {
            check_bio_state_conflict(store, &mut v, dest, ot.new_bio_state.as_ref(), req, &sources_by_barcode);
        }
    }

    let works = v.check_work(&req.work_numbers);
    v.check_comments(&req.comment_ids);
    if let Some(performed) = req.performed_ms {
        v.check_timestamp(performed, now_ms(), &sources);
    }

    v.close()?;
    let Some(op_type) = op_type else {
        return Err(StoreError::UnknownOperationType(req.op_type.clone()).into());
    };

    let source_ids: Vec<LabwareId> = sources.iter().map(|lw| lw.id).collect();
    let contents = req.contents.clone();
    let destination = req.destination.clone();

    store
        .transact(move |s| {
            let (dest_id, created) = match &destination {
                SlotCopyDestination::New { labware_type } => {
                    (s.create_labware(labware_type, None)?, true)
                }
                SlotCopyDestination::Existing { barcode } => {
                    let lw = s
                        .labware_by_barcode(barcode)
                        .ok_or_else(|| StoreError::UnknownBarcode(barcode.clone()))?;
                    (lw.id, false)
                }
            };

            // Re-read source contents inside the transaction rather than
            // trusting the validation-time snapshot.
            let mut planned = Vec::new();
            for content in &contents {
                let lw = s
                    .labware_by_barcode(&content.source_barcode)
                    .ok_or_else(|| StoreError::UnknownBarcode(content.source_barcode.clone()))?;
                let slot = lw
                    .slot(content.source_address)
                    .ok_or(StoreError::InvalidAddress {
                        barcode: lw.barcode.clone(),
                        address: content.source_address,
                    })?;
                for sample in slot.sample_ids.clone() {
                    planned.push(PlannedTransfer {
                        source_labware: lw.id,
                        source_address: content.source_address,
                        source_sample: sample,
                        dest_labware: dest_id,
                        dest_address: content.dest_address,
                    });
                }
            }

            let (op_id, actions) = recorder::record_transfer(
                s,
                &op_type,
                &req.username,
                &planned,
                req.performed_ms,
                &req.comment_ids,
            )?;

            for action in &actions {
                s.add_sample_to_slot(dest_id, action.dest_address, action.dest_sample)?;
            }

            recorder::apply_op_type_effects(s, &op_type, &source_ids)?;

            for work in &works {
                s.link_work(op_id, &work.work_number)?;
            }

            let dest_barcode = s
                .labware(dest_id)
                .map(|lw| lw.barcode.clone())
                .ok_or(StoreError::MissingLabware(dest_id))?;

            Ok(SlotCopyOutcome {
                operation_id: op_id,
                dest_labware_id: dest_id,
                dest_barcode,
                created_labware: created,
            })
        })
        .map_err(RequestError::Store)
}

fn lookup_source<'a>(
    sources: &'a HashMap<&str, &Labware>,
    barcode: &str,
) -> Option<&'a Labware> {
    sources.get(barcode).copied()
}

/// Flags an existing destination whose resident samples' bio state would
/// conflict with the material arriving in this request.
fn check_bio_state_conflict(
    store: &EntityStore,
    v: &mut Validation<'_>,
    dest: &Labware,
    new_bio_state: Option<&BioState>,
    req: &SlotCopyRequest,
    sources_by_barcode: &HashMap<&str, &Labware>,
) {
    let mut incoming: Vec<BioState> = Vec::new();
    match new_bio_state {
        Some(bs) => incoming.push(bs.clone()),
        None => {
            for content in &req.contents {
                let Some(lw) = sources_by_barcode.get(content.source_barcode.as_str()) else {
                    continue;
                };
                let Some(slot) = lw.slot(content.source_address) else {
                    continue;
                };
                for state in bio_states_of(store, &slot.sample_ids) {
                    if !incoming.contains(&state) {
                        incoming.push(state);
                    }
                }
            }
        }
    }
    let resident = bio_states_of(store, &dest.sample_ids());
    if resident.iter().any(|state| !incoming.contains(state)) {
        v.problem(format!(
            "Destination labware {} contains samples in a conflicting bio state",
            dest.barcode
        ));
    }
}

fn bio_states_of(store: &EntityStore, sample_ids: &[SampleId]) -> Vec<BioState> {
    let mut out = Vec::new();
    for id in sample_ids {
        if let Some(sample) = store.sample(*id) {
            if !out.contains(&sample.bio_state) {
                out.push(sample.bio_state.clone());
            }
        }
    }
    out
}
