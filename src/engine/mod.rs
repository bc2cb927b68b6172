//! Operation recording, latest-operation resolution, and the composite
//! request flows built on them.

/// Operation recording and bio-state derivation.
pub mod recorder;
/// Shared validate-then-record request flows.
pub mod requests;
/// Latest-operation ("supersedes") resolution.
pub mod resolver;
/// Slot-to-slot copy engine.
pub mod slot_copy;

use crate::core::store::StoreError;
use crate::validate::pipeline::ValidationFailure;

/// Failure of a request flow: either the aggregated validation failure, or
/// an infrastructure fault that rolled the transaction back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The collected problem set was non-empty; nothing was written.
    Validation(ValidationFailure),
    /// Store-level fault; the transaction rolled back.
    Store(StoreError),
}

impl From<ValidationFailure> for RequestError {
    fn from(value: ValidationFailure) -> Self {
        Self::Validation(value)
    }
}

impl From<StoreError> for RequestError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}
