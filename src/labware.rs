//! Labware, slots, and lifecycle state transitions.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::types::{LabwareId, SampleId};

/// Grid dimensions and physical properties shared by all labware of a type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabwareType {
    /// Type name, unique among registered types.
    pub name: String,
    /// Number of grid rows.
    pub num_rows: u32,
    /// Number of grid columns.
    pub num_columns: u32,
    /// True when labware of this type arrives already barcoded.
    pub prebarcoded: bool,
    /// True when slots may be converted to blocks.
    pub supports_blocks: bool,
}

impl LabwareType {
    /// Iterates the type's valid addresses in row-major order.
    pub fn addresses(&self) -> impl Iterator<Item = Address> {
        Address::grid(self.num_rows, self.num_columns)
    }

    /// True when `address` lies on this type's grid.
    pub fn contains(&self, address: Address) -> bool {
        (1..=self.num_rows).contains(&address.row) && (1..=self.num_columns).contains(&address.column)
    }

    /// Row-major slot index for `address`, if on the grid.
    pub fn slot_index(&self, address: Address) -> Option<usize> {
        if !self.contains(address) {
            return None;
        }
        Some(((address.row - 1) * self.num_columns + (address.column - 1)) as usize)
    }

    /// Total number of slots on the grid.
    pub fn slot_count(&self) -> usize {
        (self.num_rows * self.num_columns) as usize
    }
}

/// Lifecycle flags on a labware.
///
/// Each flag is a one-way transition, cleared only by
/// [`StateChange::Reactivate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LabwareFlags {
    /// Physically thrown away.
    pub discarded: bool,
    /// Released to the requesting team.
    pub released: bool,
    /// Destroyed with cause.
    pub destroyed: bool,
    /// Consumed as a source by a marking operation.
    pub used: bool,
}

impl LabwareFlags {
    /// True when any flag disqualifying the labware as a source is set.
    pub fn retired(&self) -> bool {
        self.discarded || self.released || self.destroyed
    }
}

/// Requested lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    /// Set the destroyed flag.
    Destroy,
    /// Set the discarded flag.
    Discard,
    /// Set the released flag.
    Release,
    /// Set the used flag (idempotent).
    MarkUsed,
    /// Clear all flags on retired labware.
    Reactivate,
}

/// Rejected lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabwareStateError {
    /// Destroy requested on destroyed labware.
    AlreadyDestroyed(String),
    /// Discard requested on discarded labware.
    AlreadyDiscarded(String),
    /// Release requested on released labware.
    AlreadyReleased(String),
    /// Reactivate requested on labware with no retired flag set.
    NotRetired(String),
}

/// One addressable position in a labware, holding zero or more samples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Position of this slot on the grid.
    pub address: Address,
    /// Samples present, in insertion order.
    pub sample_ids: Vec<SampleId>,
    /// Sample this slot is a block of, if converted.
    pub block_sample_id: Option<SampleId>,
    /// Highest section number cut from the block so far.
    pub block_highest_section: Option<u32>,
}

impl Slot {
    fn new(address: Address) -> Self {
        Self {
            address,
            sample_ids: Vec::new(),
            block_sample_id: None,
            block_highest_section: None,
        }
    }

    /// True when the slot holds no samples.
    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }

    /// True when the slot has been converted to a block.
    pub fn is_block(&self) -> bool {
        self.block_sample_id.is_some()
    }

    /// Appends a sample. Existing samples are never displaced; re-adding a
    /// present sample is a no-op.
    pub fn add_sample(&mut self, id: SampleId) {
        if !self.sample_ids.contains(&id) {
            self.sample_ids.push(id);
        }
    }

    /// Converts this slot into a block of `sample`.
    pub fn make_block(&mut self, sample: SampleId) {
        self.block_sample_id = Some(sample);
        self.block_highest_section = Some(self.block_highest_section.unwrap_or(0));
    }

    /// Advances and returns the next section number, or `None` when the slot
    /// is not a block.
    pub fn advance_block_section(&mut self) -> Option<u32> {
        let next = self.block_highest_section?.saturating_add(1);
        self.block_highest_section = Some(next);
        Some(next)
    }
}

/// A physical container with a fixed grid of slots.
///
/// The slot set is created with the labware, exactly matches the type's
/// valid addresses, and never changes shape afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labware {
    /// Stable labware identifier.
    pub id: LabwareId,
    /// Internally unique checksummed barcode.
    pub barcode: String,
    /// Externally supplied barcode, if any.
    pub external_barcode: Option<String>,
    /// The type defining this labware's grid and properties.
    pub labware_type: LabwareType,
    slots: Vec<Slot>,
    /// Lifecycle flags.
    pub flags: LabwareFlags,
}

impl Labware {
    /// Creates a labware with one empty slot per valid address of its type.
    pub fn new(
        id: LabwareId,
        barcode: String,
        external_barcode: Option<String>,
        labware_type: LabwareType,
    ) -> Self {
        let slots = labware_type.addresses().map(Slot::new).collect();
        Self {
            id,
            barcode,
            external_barcode,
            labware_type,
            slots,
            flags: LabwareFlags::default(),
        }
    }

    /// All slots in row-major order.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// The slot at `address`, if on the grid.
    pub fn slot(&self, address: Address) -> Option<&Slot> {
        self.labware_type.slot_index(address).map(|i| &self.slots[i])
    }

    /// Mutable slot at `address`, if on the grid.
    pub fn slot_mut(&mut self, address: Address) -> Option<&mut Slot> {
        self.labware_type
            .slot_index(address)
            .map(|i| &mut self.slots[i])
    }

    /// Slots currently holding at least one sample.
    pub fn filled_slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| !s.is_empty())
    }

    /// True when no slot holds a sample.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Slot::is_empty)
    }

    /// Distinct sample ids across all slots, in slot order.
    pub fn sample_ids(&self) -> Vec<SampleId> {
        let mut out = Vec::new();
        for slot in &self.slots {
            for id in &slot.sample_ids {
                if !out.contains(id) {
                    out.push(*id);
                }
            }
        }
        out
    }

    /// Applies a lifecycle transition. This is the single place transition
    /// rules are enforced.
    pub fn apply_state(&mut self, change: StateChange) -> Result<(), LabwareStateError> {
        match change {
            StateChange::Destroy => {
                if self.flags.destroyed {
                    return Err(LabwareStateError::AlreadyDestroyed(self.barcode.clone()));
                }
                self.flags.destroyed = true;
            }
            StateChange::Discard => {
                if self.flags.discarded {
                    return Err(LabwareStateError::AlreadyDiscarded(self.barcode.clone()));
                }
                self.flags.discarded = true;
            }
            StateChange::Release => {
                if self.flags.released {
                    return Err(LabwareStateError::AlreadyReleased(self.barcode.clone()));
                }
                self.flags.released = true;
            }
            StateChange::MarkUsed => {
                self.flags.used = true;
            }
            StateChange::Reactivate => {
                if !self.flags.retired() && !self.flags.used {
                    return Err(LabwareStateError::NotRetired(self.barcode.clone()));
                }
                self.flags = LabwareFlags::default();
            }
        }
        Ok(())
    }
}
