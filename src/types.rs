//! Shared identifier aliases.

/// Monotonic labware identifier.
pub type LabwareId = u64;
/// Monotonic tissue identifier.
pub type TissueId = u64;
/// Monotonic sample identifier.
pub type SampleId = u64;
/// Monotonic operation identifier.
pub type OperationId = u64;
/// Comment reference-data identifier.
pub type CommentId = u32;
/// Monotonic ledger entry sequence number.
pub type EntrySeq = u64;
/// Numeric seed a labware barcode is derived from.
pub type BarcodeSeed = u64;
