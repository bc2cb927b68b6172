//! Request validation: reusable labware rules and the per-request
//! problem-accumulation pipeline.

/// Reusable labware rule pass.
pub mod labware;
/// Per-request problem accumulator and aggregated failure.
pub mod pipeline;
