use std::time::{SystemTime, UNIX_EPOCH};

use hashbrown::HashMap;

use crate::{
    address::Address,
    barcode,
    labware::{Labware, LabwareStateError, LabwareType, StateChange},
    op::{Action, Comment, LedgerEntry, Operation, OperationType, StoredEntry, Work},
    sample::{BioState, Sample, Tissue, TissueDraft},
    types::{BarcodeSeed, CommentId, EntrySeq, LabwareId, OperationId, SampleId, TissueId},
};

use super::indices::VecIndex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    MissingLabware(LabwareId),
    UnknownBarcode(String),
    BarcodeTaken(String),
    MissingTissue(TissueId),
    MissingSample(SampleId),
    MissingOperation(OperationId),
    UnknownLabwareType(String),
    UnknownOperationType(String),
    UnknownBioState(String),
    UnknownWork(String),
    UnknownComment(CommentId),
    InvalidAddress { barcode: String, address: Address },
    NotABlock { barcode: String, address: Address },
    BlocksUnsupported(String),
    State(LabwareStateError),
}

impl From<LabwareStateError> for StoreError {
    fn from(value: LabwareStateError) -> Self {
        Self::State(value)
    }
}

/// Authoritative in-memory entity store.
///
/// Every mutation appends a [`LedgerEntry`] to a pending journal, which the
/// runtime drains to a persistence sink after the owning transaction
/// commits. Reference data (labware types, operation types, bio states,
/// works, comments) is registered up front and treated as immutable
/// configuration; it is not journaled.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EntityStore {
    labware: HashMap<LabwareId, Labware>,
    by_barcode: HashMap<String, LabwareId>,
    tissues: HashMap<TissueId, Tissue>,
    samples: HashMap<SampleId, Sample>,
    operations: HashMap<OperationId, Operation>,
    op_order: Vec<OperationId>,
    ops_by_dest: VecIndex<LabwareId>,
    ops_by_work: VecIndex<String>,
    work_links: Vec<(OperationId, String)>,

    labware_types: HashMap<String, LabwareType>,
    op_types: HashMap<String, OperationType>,
    bio_states: HashMap<String, BioState>,
    works: HashMap<String, Work>,
    comments: HashMap<CommentId, Comment>,

    pending_entries: Vec<StoredEntry>,
    barcode_prefix: String,
    next_entry_seq: EntrySeq,
    next_labware_id: LabwareId,
    next_tissue_id: TissueId,
    next_sample_id: SampleId,
    next_operation_id: OperationId,
    next_barcode_seed: BarcodeSeed,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::with_barcode_prefix("LW-")
    }

    pub fn with_barcode_prefix(prefix: impl Into<String>) -> Self {
        Self {
            barcode_prefix: prefix.into(),
            next_entry_seq: 1,
            next_labware_id: 1,
            next_tissue_id: 1,
            next_sample_id: 1,
            next_operation_id: 1,
            next_barcode_seed: 1,
            ..Self::default()
        }
    }

    pub fn barcode_prefix(&self) -> &str {
        &self.barcode_prefix
    }

    // ---- reference data -------------------------------------------------

    pub fn add_labware_type(&mut self, lt: LabwareType) {
        self.labware_types.insert(lt.name.clone(), lt);
    }

    pub fn add_op_type(&mut self, ot: OperationType) {
        self.op_types.insert(ot.name.clone(), ot);
    }

    pub fn add_bio_state(&mut self, bs: BioState) {
        self.bio_states.insert(bs.as_str().to_string(), bs);
    }

    pub fn add_work(&mut self, work: Work) {
        self.works.insert(work.work_number.clone(), work);
    }

    pub fn add_comment(&mut self, comment: Comment) {
        self.comments.insert(comment.id, comment);
    }

    pub fn labware_type(&self, name: &str) -> Option<&LabwareType> {
        self.labware_types.get(name)
    }

    pub fn op_type(&self, name: &str) -> Option<&OperationType> {
        self.op_types.get(name)
    }

    pub fn bio_state(&self, name: &str) -> Option<&BioState> {
        self.bio_states.get(name)
    }

    pub fn work(&self, work_number: &str) -> Option<&Work> {
        self.works.get(work_number)
    }

    pub fn comment(&self, id: CommentId) -> Option<&Comment> {
        self.comments.get(&id)
    }

    // ---- queries --------------------------------------------------------

    pub fn labware(&self, id: LabwareId) -> Option<&Labware> {
        self.labware.get(&id)
    }

    /// Looks a labware up by internal or external barcode.
    pub fn labware_by_barcode(&self, bc: &str) -> Option<&Labware> {
        self.by_barcode.get(bc).and_then(|id| self.labware.get(id))
    }

    pub fn tissue(&self, id: TissueId) -> Option<&Tissue> {
        self.tissues.get(&id)
    }

    pub fn sample(&self, id: SampleId) -> Option<&Sample> {
        self.samples.get(&id)
    }

    pub fn operation(&self, id: OperationId) -> Option<&Operation> {
        self.operations.get(&id)
    }

    /// All operations in recording order.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.op_order.iter().filter_map(|id| self.operations.get(id))
    }

    /// Operations with `labware_id` as an action destination, in recording
    /// order.
    pub fn operations_on(&self, labware_id: LabwareId) -> Vec<&Operation> {
        self.ops_by_dest
            .get(&labware_id)
            .into_iter()
            .flat_map(|ids| ids.iter())
            .filter_map(|id| self.operations.get(id))
            .collect()
    }

    /// Operations of one type with `labware_id` as an action destination.
    pub fn operations_of_type_on(&self, op_type: &str, labware_id: LabwareId) -> Vec<&Operation> {
        self.operations_on(labware_id)
            .into_iter()
            .filter(|op| op.op_type == op_type)
            .collect()
    }

    pub fn operations_for_work(&self, work_number: &str) -> Vec<OperationId> {
        self.ops_by_work.get(work_number).cloned().unwrap_or_default()
    }

    pub fn works_for_operation(&self, operation_id: OperationId) -> Vec<&str> {
        self.work_links
            .iter()
            .filter(|(op, _)| *op == operation_id)
            .map(|(_, w)| w.as_str())
            .collect()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn labware_count(&self) -> usize {
        self.labware.len()
    }

    // ---- mutators -------------------------------------------------------

    pub fn create_tissue(&mut self, draft: TissueDraft) -> TissueId {
        let id = self.next_tissue_id;
        self.next_tissue_id += 1;
        let tissue = Tissue {
            id,
            donor_name: draft.donor_name,
            spatial_location: draft.spatial_location,
            replicate: draft.replicate,
            fixative: draft.fixative,
            medium: draft.medium,
            external_name: draft.external_name,
        };
        self.tissues.insert(id, tissue.clone());
        self.push_entry(LedgerEntry::TissueCreated { tissue });
        id
    }

    /// Creates a sample in a registered bio state.
    pub fn create_sample(
        &mut self,
        tissue_id: TissueId,
        bio_state: &str,
        section: Option<u32>,
    ) -> Result<SampleId, StoreError> {
        if !self.tissues.contains_key(&tissue_id) {
            return Err(StoreError::MissingTissue(tissue_id));
        }
        let bio_state = self
            .bio_states
            .get(bio_state)
            .cloned()
            .ok_or_else(|| StoreError::UnknownBioState(bio_state.to_string()))?;
        Ok(self.insert_sample(tissue_id, bio_state, section))
    }

    /// Creates a new sample carrying `source`'s tissue and section into a
    /// different bio state. The source sample persists unchanged.
    pub fn create_derived_sample(
        &mut self,
        source: SampleId,
        bio_state: BioState,
    ) -> Result<SampleId, StoreError> {
        let src = self
            .samples
            .get(&source)
            .ok_or(StoreError::MissingSample(source))?;
        if !self.bio_states.contains_key(bio_state.as_str()) {
            return Err(StoreError::UnknownBioState(bio_state.as_str().to_string()));
        }
        let (tissue_id, section) = (src.tissue_id, src.section);
        Ok(self.insert_sample(tissue_id, bio_state, section))
    }

    fn insert_sample(&mut self, tissue_id: TissueId, bio_state: BioState, section: Option<u32>) -> SampleId {
        let id = self.next_sample_id;
        self.next_sample_id += 1;
        let sample = Sample {
            id,
            tissue_id,
            bio_state,
            section,
        };
        self.samples.insert(id, sample.clone());
        self.push_entry(LedgerEntry::SamplesCreated {
            samples: vec![sample],
        });
        id
    }

    /// Creates labware of a registered type with a generated, checksummed
    /// barcode from the store's monotonic seed.
    pub fn create_labware(
        &mut self,
        type_name: &str,
        external_barcode: Option<String>,
    ) -> Result<LabwareId, StoreError> {
        let lt = self
            .labware_types
            .get(type_name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownLabwareType(type_name.to_string()))?;
        let seed = self.next_barcode_seed;
        let bc = barcode::generate(&self.barcode_prefix, seed);
        if self.by_barcode.contains_key(&bc) {
            return Err(StoreError::BarcodeTaken(bc));
        }
        if let Some(ext) = &external_barcode {
            if self.by_barcode.contains_key(ext) {
                return Err(StoreError::BarcodeTaken(ext.clone()));
            }
        }
        self.next_barcode_seed = seed.saturating_add(1);
        Ok(self.insert_labware(bc, external_barcode, lt))
    }

    /// Creates prebarcoded labware under a caller-supplied barcode.
    pub fn create_labware_with_barcode(
        &mut self,
        type_name: &str,
        bc: &str,
    ) -> Result<LabwareId, StoreError> {
        let lt = self
            .labware_types
            .get(type_name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownLabwareType(type_name.to_string()))?;
        if self.by_barcode.contains_key(bc) {
            return Err(StoreError::BarcodeTaken(bc.to_string()));
        }
        Ok(self.insert_labware(bc.to_string(), Some(bc.to_string()), lt))
    }

    fn insert_labware(
        &mut self,
        bc: String,
        external_barcode: Option<String>,
        lt: LabwareType,
    ) -> LabwareId {
        let id = self.next_labware_id;
        self.next_labware_id += 1;
        let lw = Labware::new(id, bc.clone(), external_barcode.clone(), lt);
        self.by_barcode.insert(bc, id);
        if let Some(ext) = external_barcode {
            self.by_barcode.entry(ext).or_insert(id);
        }
        self.labware.insert(id, lw.clone());
        self.push_entry(LedgerEntry::LabwareCreated { labware: lw });
        id
    }

    /// Appends a sample to a slot. Existing contents are never displaced.
    pub fn add_sample_to_slot(
        &mut self,
        labware_id: LabwareId,
        address: Address,
        sample_id: SampleId,
    ) -> Result<(), StoreError> {
        if !self.samples.contains_key(&sample_id) {
            return Err(StoreError::MissingSample(sample_id));
        }
        let lw = self
            .labware
            .get_mut(&labware_id)
            .ok_or(StoreError::MissingLabware(labware_id))?;
        let bc = lw.barcode.clone();
        let slot = lw
            .slot_mut(address)
            .ok_or(StoreError::InvalidAddress { barcode: bc, address })?;
        slot.add_sample(sample_id);
        let changed = slot.clone();
        self.push_entry(LedgerEntry::SlotsUpdated {
            labware_id,
            slots: vec![changed],
        });
        Ok(())
    }

    /// Replaces one sample with another in a slot, preserving position.
    /// Used by bio-state-changing in-place recording; the caller records the
    /// old→new action for audit.
    pub fn replace_sample_in_slot(
        &mut self,
        labware_id: LabwareId,
        address: Address,
        old: SampleId,
        new: SampleId,
    ) -> Result<(), StoreError> {
        if !self.samples.contains_key(&new) {
            return Err(StoreError::MissingSample(new));
        }
        let lw = self
            .labware
            .get_mut(&labware_id)
            .ok_or(StoreError::MissingLabware(labware_id))?;
        let bc = lw.barcode.clone();
        let slot = lw
            .slot_mut(address)
            .ok_or(StoreError::InvalidAddress { barcode: bc, address })?;
        let Some(pos) = slot.sample_ids.iter().position(|id| *id == old) else {
            return Err(StoreError::MissingSample(old));
        };
        slot.sample_ids[pos] = new;
        let changed = slot.clone();
        self.push_entry(LedgerEntry::SlotsUpdated {
            labware_id,
            slots: vec![changed],
        });
        Ok(())
    }

    /// Atomically empties a slot, returning the removed sample ids. The
    /// caller records compensating actions before invoking this; the ledger
    /// entry keeps the clear itself auditable.
    pub fn clean_out_slot(
        &mut self,
        labware_id: LabwareId,
        address: Address,
    ) -> Result<Vec<SampleId>, StoreError> {
        let lw = self
            .labware
            .get_mut(&labware_id)
            .ok_or(StoreError::MissingLabware(labware_id))?;
        let bc = lw.barcode.clone();
        let slot = lw
            .slot_mut(address)
            .ok_or(StoreError::InvalidAddress { barcode: bc, address })?;
        let removed = std::mem::take(&mut slot.sample_ids);
        let changed = slot.clone();
        self.push_entry(LedgerEntry::SlotsUpdated {
            labware_id,
            slots: vec![changed],
        });
        Ok(removed)
    }

    /// Converts a slot into a block of `sample_id`. The labware type must
    /// support blocks and the sample must be present in the slot.
    pub fn convert_slot_to_block(
        &mut self,
        labware_id: LabwareId,
        address: Address,
        sample_id: SampleId,
    ) -> Result<(), StoreError> {
        let lw = self
            .labware
            .get_mut(&labware_id)
            .ok_or(StoreError::MissingLabware(labware_id))?;
        if !lw.labware_type.supports_blocks {
            return Err(StoreError::BlocksUnsupported(lw.barcode.clone()));
        }
        let bc = lw.barcode.clone();
        let slot = lw
            .slot_mut(address)
            .ok_or(StoreError::InvalidAddress { barcode: bc, address })?;
        if !slot.sample_ids.contains(&sample_id) {
            return Err(StoreError::MissingSample(sample_id));
        }
        slot.make_block(sample_id);
        let changed = slot.clone();
        self.push_entry(LedgerEntry::SlotsUpdated {
            labware_id,
            slots: vec![changed],
        });
        Ok(())
    }

    /// Advances a block's section counter and returns the new section number.
    pub fn next_block_section(
        &mut self,
        labware_id: LabwareId,
        address: Address,
    ) -> Result<u32, StoreError> {
        let lw = self
            .labware
            .get_mut(&labware_id)
            .ok_or(StoreError::MissingLabware(labware_id))?;
        let bc = lw.barcode.clone();
        let slot = lw
            .slot_mut(address)
            .ok_or(StoreError::InvalidAddress {
                barcode: bc.clone(),
                address,
            })?;
        let Some(section) = slot.advance_block_section() else {
            return Err(StoreError::NotABlock { barcode: bc, address });
        };
        let changed = slot.clone();
        self.push_entry(LedgerEntry::SlotsUpdated {
            labware_id,
            slots: vec![changed],
        });
        Ok(section)
    }

    /// Applies a lifecycle transition, journaling only real flag changes.
    pub fn apply_state_change(
        &mut self,
        labware_id: LabwareId,
        change: StateChange,
    ) -> Result<(), StoreError> {
        let lw = self
            .labware
            .get_mut(&labware_id)
            .ok_or(StoreError::MissingLabware(labware_id))?;
        let before = lw.flags;
        lw.apply_state(change)?;
        let flags = lw.flags;
        if flags != before {
            self.push_entry(LedgerEntry::FlagsSet { labware_id, flags });
        }
        Ok(())
    }

    /// Records an operation with its full action list. `performed_ms`
    /// defaults to the current time; validated backdating is the caller's
    /// concern.
    pub fn record_operation(
        &mut self,
        op_type: &str,
        username: &str,
        performed_ms: Option<u64>,
        actions: Vec<Action>,
        comment_ids: Vec<CommentId>,
    ) -> Result<OperationId, StoreError> {
        if !self.op_types.contains_key(op_type) {
            return Err(StoreError::UnknownOperationType(op_type.to_string()));
        }
        for cid in &comment_ids {
            if !self.comments.contains_key(cid) {
                return Err(StoreError::UnknownComment(*cid));
            }
        }
        for action in &actions {
            if !self.labware.contains_key(&action.dest_labware) {
                return Err(StoreError::MissingLabware(action.dest_labware));
            }
        }
        let id = self.next_operation_id;
        self.next_operation_id += 1;
        let operation = Operation {
            id,
            op_type: op_type.to_string(),
            username: username.to_string(),
            performed_ms: performed_ms.unwrap_or_else(now_ms),
            actions,
            comment_ids,
        };
        self.index_operation(&operation);
        self.operations.insert(id, operation.clone());
        self.op_order.push(id);
        self.push_entry(LedgerEntry::OperationRecorded { operation });
        Ok(id)
    }

    /// Links an operation to a work.
    pub fn link_work(
        &mut self,
        operation_id: OperationId,
        work_number: &str,
    ) -> Result<(), StoreError> {
        if !self.operations.contains_key(&operation_id) {
            return Err(StoreError::MissingOperation(operation_id));
        }
        if !self.works.contains_key(work_number) {
            return Err(StoreError::UnknownWork(work_number.to_string()));
        }
        self.work_links.push((operation_id, work_number.to_string()));
        self.ops_by_work
            .entry(work_number.to_string())
            .or_default()
            .push(operation_id);
        self.push_entry(LedgerEntry::WorkLinked {
            operation_id,
            work_number: work_number.to_string(),
        });
        Ok(())
    }

    // ---- transaction boundary -------------------------------------------

    /// Runs `f` with commit-or-rollback semantics: on `Err` the store is
    /// restored to its state at entry, pending ledger entries included.
    pub fn transact<T, E>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, E>) -> Result<T, E> {
        let checkpoint = self.clone();
        match f(self) {
            Ok(value) => Ok(value),
            Err(err) => {
                *self = checkpoint;
                Err(err)
            }
        }
    }

    // ---- journal / replay -----------------------------------------------

    pub fn drain_pending_entries(&mut self) -> Vec<StoredEntry> {
        std::mem::take(&mut self.pending_entries)
    }

    pub fn latest_entry_seq(&self) -> EntrySeq {
        self.next_entry_seq.saturating_sub(1)
    }

    /// Applies an entry loaded from the ledger, bumping id counters past any
    /// identifiers it carries.
    pub fn apply_replayed_entry(&mut self, stored: StoredEntry) -> Result<(), StoreError> {
        let seq = stored.seq;
        match stored.entry {
            LedgerEntry::TissueCreated { tissue } => {
                self.next_tissue_id = self.next_tissue_id.max(tissue.id.saturating_add(1));
                self.tissues.insert(tissue.id, tissue);
            }
            LedgerEntry::SamplesCreated { samples } => {
                for sample in samples {
                    self.next_sample_id = self.next_sample_id.max(sample.id.saturating_add(1));
                    self.samples.insert(sample.id, sample);
                }
            }
            LedgerEntry::LabwareCreated { labware } => {
                self.next_labware_id = self.next_labware_id.max(labware.id.saturating_add(1));
                if let Ok(seed) = barcode::verify(&self.barcode_prefix, &labware.barcode) {
                    self.next_barcode_seed = self.next_barcode_seed.max(seed.saturating_add(1));
                }
                self.by_barcode.insert(labware.barcode.clone(), labware.id);
                if let Some(ext) = &labware.external_barcode {
                    self.by_barcode.entry(ext.clone()).or_insert(labware.id);
                }
                self.labware.insert(labware.id, labware);
            }
            LedgerEntry::SlotsUpdated { labware_id, slots } => {
                let lw = self
                    .labware
                    .get_mut(&labware_id)
                    .ok_or(StoreError::MissingLabware(labware_id))?;
                let bc = lw.barcode.clone();
                for slot in slots {
                    let address = slot.address;
                    let target = lw.slot_mut(address).ok_or(StoreError::InvalidAddress {
                        barcode: bc.clone(),
                        address,
                    })?;
                    *target = slot;
                }
            }
            LedgerEntry::FlagsSet { labware_id, flags } => {
                let lw = self
                    .labware
                    .get_mut(&labware_id)
                    .ok_or(StoreError::MissingLabware(labware_id))?;
                lw.flags = flags;
            }
            LedgerEntry::OperationRecorded { operation } => {
                self.next_operation_id = self.next_operation_id.max(operation.id.saturating_add(1));
                self.index_operation(&operation);
                self.op_order.push(operation.id);
                self.operations.insert(operation.id, operation);
            }
            LedgerEntry::WorkLinked {
                operation_id,
                work_number,
            } => {
                self.work_links.push((operation_id, work_number.clone()));
                self.ops_by_work
                    .entry(work_number)
                    .or_default()
                    .push(operation_id);
            }
        }
        self.next_entry_seq = self.next_entry_seq.max(seq.saturating_add(1));
        Ok(())
    }

    fn index_operation(&mut self, operation: &Operation) {
        let mut dests: Vec<LabwareId> = Vec::new();
        for action in &operation.actions {
            if !dests.contains(&action.dest_labware) {
                dests.push(action.dest_labware);
            }
        }
        for dest in dests {
            self.ops_by_dest.entry(dest).or_default().push(operation.id);
        }
    }

    fn push_entry(&mut self, entry: LedgerEntry) {
        let seq = self.next_entry_seq;
        self.next_entry_seq += 1;
        self.pending_entries.push(StoredEntry {
            seq,
            ts_ms: now_ms(),
            entry,
        });
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
