//! Operation model, reference data, and ledger-entry wrappers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::labware::{Labware, LabwareFlags, Slot};
use crate::sample::{BioState, Sample, Tissue};
use crate::types::{CommentId, EntrySeq, LabwareId, OperationId, SampleId};

/// Version number for serialized [`StoredEntryEnvelope`] payloads.
pub const ENTRY_FORMAT_VERSION: u16 = 1;

/// Capability flags governing how an operation type is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpTypeFlags {
    /// Actions stay within the source labware (source = destination).
    pub in_place: bool,
    /// Source labware is discarded after a successful operation.
    pub discards_source: bool,
    /// Source labware is marked used after a successful operation.
    pub marks_source_used: bool,
    /// Source labware is destroyed after a successful operation.
    pub destroys: bool,
    /// Source labware is released after a successful operation.
    pub releases: bool,
    /// Operation applies a stain.
    pub stains: bool,
    /// Operation uses probe panels.
    pub uses_probes: bool,
}

/// A named, flag-bearing operation definition; read-only reference data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationType {
    /// Unique operation type name.
    pub name: String,
    /// Capability flags.
    pub flags: OpTypeFlags,
    /// Bio state destination samples are derived into, if the type changes
    /// bio state.
    pub new_bio_state: Option<BioState>,
}

impl OperationType {
    /// True when the type moves material between labware.
    pub fn transfers(&self) -> bool {
        !self.flags.in_place
    }
}

/// One source→destination slot/sample edge within an operation.
///
/// Across all operations, actions form the directed lineage graph from
/// original tissue samples to every derived sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Labware the material came from.
    pub source_labware: LabwareId,
    /// Slot address within the source labware.
    pub source_address: Address,
    /// Sample the material came from.
    pub source_sample: SampleId,
    /// Labware the material went to.
    pub dest_labware: LabwareId,
    /// Slot address within the destination labware.
    pub dest_address: Address,
    /// Sample recorded at the destination (derived when the operation type
    /// changes bio state).
    pub dest_sample: SampleId,
}

/// An immutable, timestamped record of one processing step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Stable operation identifier.
    pub id: OperationId,
    /// Name of the operation type performed.
    pub op_type: String,
    /// Responsible user.
    pub username: String,
    /// When the step was performed, in milliseconds since epoch.
    pub performed_ms: u64,
    /// Ordered action list.
    pub actions: Vec<Action>,
    /// Comments attached at recording time.
    pub comment_ids: Vec<CommentId>,
}

/// Status of a work tracking code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkStatus {
    /// Created but not yet started.
    Unstarted,
    /// In progress.
    Active,
    /// Temporarily on hold.
    Paused,
    /// Finished.
    Completed,
    /// Abandoned after failure.
    Failed,
    /// Withdrawn by the requester.
    Withdrawn,
}

impl WorkStatus {
    /// True when operations may still be linked to the work.
    pub fn usable(&self) -> bool {
        matches!(self, WorkStatus::Unstarted | WorkStatus::Active)
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkStatus::Unstarted => "unstarted",
            WorkStatus::Active => "active",
            WorkStatus::Paused => "paused",
            WorkStatus::Completed => "completed",
            WorkStatus::Failed => "failed",
            WorkStatus::Withdrawn => "withdrawn",
        };
        f.write_str(name)
    }
}

/// A funding/tracking code operations are linked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Work {
    /// Unique work number.
    pub work_number: String,
    /// Current status.
    pub status: WorkStatus,
}

/// Canned comment reference data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Stable comment identifier.
    pub id: CommentId,
    /// Grouping category.
    pub category: String,
    /// Comment text.
    pub text: String,
    /// False when the comment has been retired from use.
    pub enabled: bool,
}

/// One journaled store mutation, appended to the ledger and replayed on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEntry {
    /// A tissue was registered at intake.
    TissueCreated {
        /// Created tissue.
        tissue: Tissue,
    },
    /// Samples were created (at intake or by bio-state derivation).
    SamplesCreated {
        /// Created samples.
        samples: Vec<Sample>,
    },
    /// A labware was created with its full empty grid.
    LabwareCreated {
        /// Created labware.
        labware: Labware,
    },
    /// Slot contents changed on an existing labware.
    SlotsUpdated {
        /// Labware the slots belong to.
        labware_id: LabwareId,
        /// Full new state of each changed slot.
        slots: Vec<Slot>,
    },
    /// Lifecycle flags changed on an existing labware.
    FlagsSet {
        /// Labware the flags belong to.
        labware_id: LabwareId,
        /// Full new flag state.
        flags: LabwareFlags,
    },
    /// An operation and its actions were recorded.
    OperationRecorded {
        /// Recorded operation.
        operation: Operation,
    },
    /// An operation was linked to a work.
    WorkLinked {
        /// Linked operation.
        operation_id: OperationId,
        /// Linked work number.
        work_number: String,
    },
}

/// Ledger row metadata plus entry payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Monotonic entry sequence.
    pub seq: EntrySeq,
    /// Entry timestamp in milliseconds.
    pub ts_ms: u64,
    /// Entry body.
    pub entry: LedgerEntry,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntryEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped entry.
    pub stored: StoredEntry,
}

impl StoredEntryEnvelope {
    /// Constructs an envelope using [`ENTRY_FORMAT_VERSION`].
    pub fn new(stored: StoredEntry) -> Self {
        Self {
            format_version: ENTRY_FORMAT_VERSION,
            stored,
        }
    }
}
