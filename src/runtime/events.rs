//! Runtime event stream payloads.

use crate::types::{EntrySeq, LabwareId, OperationId};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    /// New labware was created.
    LabwareRegistered {
        /// Created labware id.
        labware_id: LabwareId,
        /// Created labware barcode.
        barcode: String,
    },
    /// An operation was recorded.
    OperationRecorded {
        /// Recorded operation id.
        operation_id: OperationId,
    },
    /// Persistence has reached at least this ledger sequence.
    DurableUpTo {
        /// Highest sequence known durable.
        entry_seq: EntrySeq,
    },
}
