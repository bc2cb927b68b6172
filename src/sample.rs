//! Tissue lineage and immutable sample records.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{SampleId, TissueId};

/// Processing-stage label carried by samples.
///
/// A bio state never changes on an existing sample; a state change always
/// creates a new [`Sample`] row referencing the same tissue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BioState(String);

impl BioState {
    /// Constructs a bio state by name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The bio state's name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Donor material a sample lineage descends from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tissue {
    /// Stable tissue identifier.
    pub id: TissueId,
    /// Donor the tissue was taken from.
    pub donor_name: String,
    /// Spatial location code within the donor organ.
    pub spatial_location: u32,
    /// Replicate number for repeated sampling of one location.
    pub replicate: u32,
    /// Fixative applied at collection.
    pub fixative: String,
    /// Storage medium.
    pub medium: String,
    /// Identifier assigned by the submitting institution, if any.
    pub external_name: Option<String>,
}

/// Intake payload used to create a new [`Tissue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TissueDraft {
    /// Donor the tissue was taken from.
    pub donor_name: String,
    /// Spatial location code within the donor organ.
    pub spatial_location: u32,
    /// Replicate number for repeated sampling of one location.
    pub replicate: u32,
    /// Fixative applied at collection.
    pub fixative: String,
    /// Storage medium.
    pub medium: String,
    /// Identifier assigned by the submitting institution, if any.
    pub external_name: Option<String>,
}

/// One immutable unit of biological material.
///
/// Samples are never mutated after creation; superseded rows persist for
/// lineage and audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Stable sample identifier.
    pub id: SampleId,
    /// Tissue this sample descends from.
    pub tissue_id: TissueId,
    /// Current processing stage.
    pub bio_state: BioState,
    /// Physical section number when cut from a block.
    pub section: Option<u32>,
}
