//! Reusable pass/fail rule engine over a set of already-loaded labware.
//!
//! Every enabled rule runs regardless of earlier failures and all messages
//! come back together, so an operator sees the complete problem set in one
//! round trip.

use std::fmt;

use hashbrown::HashSet;

use crate::core::store::EntityStore;
use crate::labware::Labware;
use crate::sample::BioState;
use crate::types::SampleId;

/// Which rules run, configured per call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabwareRules {
    /// Flag labware appearing more than once in the requested set.
    pub unique_required: bool,
    /// Flag labware with no occupied slots.
    pub require_non_empty: bool,
    /// Flag destroyed/discarded/released labware (source usage).
    pub check_source_state: bool,
    /// Flag labware holding more than one distinct sample, or one sample
    /// spread over several slots.
    pub require_single_sample: bool,
    /// Flag labware whose samples are not all in this bio state.
    pub expected_bio_state: Option<BioState>,
}

impl Default for LabwareRules {
    fn default() -> Self {
        Self {
            unique_required: true,
            require_non_empty: true,
            check_source_state: true,
            require_single_sample: false,
            expected_bio_state: None,
        }
    }
}

/// Runs the configured rules, returning every problem found.
///
/// The input set is reported on, never filtered: repeated labware stays in
/// the caller's list.
pub fn validate_labware(
    store: &EntityStore,
    rules: &LabwareRules,
    labware: &[&Labware],
) -> Vec<String> {
    let mut problems = Vec::new();

    if rules.unique_required {
        let mut seen = HashSet::new();
        let mut repeated = Vec::new();
        for lw in labware {
            if !seen.insert(lw.id) && !repeated.contains(&lw.barcode) {
                repeated.push(lw.barcode.clone());
            }
        }
        if !repeated.is_empty() {
            problems.push(format!(
                "Labware is repeated in the request: {}",
                bracket_list(&repeated)
            ));
        }
    }

    // Per-labware rules run once per distinct labware.
    let mut checked = HashSet::new();
    let mut empty = Vec::new();
    let mut destroyed = Vec::new();
    let mut discarded = Vec::new();
    let mut released = Vec::new();
    let mut multi_sample = Vec::new();
    let mut multi_slot = Vec::new();
    let mut wrong_state = Vec::new();

    for lw in labware {
        if !checked.insert(lw.id) {
            continue;
        }
        if rules.require_non_empty && lw.is_empty() {
            empty.push(lw.barcode.clone());
        }
        if rules.check_source_state {
            if lw.flags.destroyed {
                destroyed.push(lw.barcode.clone());
            }
            if lw.flags.discarded {
                discarded.push(lw.barcode.clone());
            }
            if lw.flags.released {
                released.push(lw.barcode.clone());
            }
        }
        if rules.require_single_sample {
            let samples = lw.sample_ids();
            if samples.len() > 1 {
                multi_sample.push(lw.barcode.clone());
            } else if samples.len() == 1 {
                let occupied = lw.filled_slots().count();
                if occupied > 1 {
                    multi_slot.push(lw.barcode.clone());
                }
            }
        }
        if let Some(expected) = &rules.expected_bio_state {
            if !all_in_bio_state(store, &lw.sample_ids(), expected) {
                wrong_state.push(lw.barcode.clone());
            }
        }
    }

    if !empty.is_empty() {
        problems.push(format!("Labware contains no samples: {}", bracket_list(&empty)));
    }
    if !destroyed.is_empty() {
        problems.push(format!("Labware is destroyed: {}", bracket_list(&destroyed)));
    }
    if !discarded.is_empty() {
        problems.push(format!("Labware is discarded: {}", bracket_list(&discarded)));
    }
    if !released.is_empty() {
        problems.push(format!("Labware is released: {}", bracket_list(&released)));
    }
    if !multi_sample.is_empty() {
        problems.push(format!(
            "Labware contains multiple samples: {}",
            bracket_list(&multi_sample)
        ));
    }
    if !multi_slot.is_empty() {
        problems.push(format!(
            "Sample is split across multiple slots: {}",
            bracket_list(&multi_slot)
        ));
    }
    if let Some(expected) = &rules.expected_bio_state {
        if !wrong_state.is_empty() {
            problems.push(format!(
                "Labware contains samples not in bio state {expected}: {}",
                bracket_list(&wrong_state)
            ));
        }
    }

    problems
}

fn all_in_bio_state(store: &EntityStore, sample_ids: &[SampleId], expected: &BioState) -> bool {
    sample_ids
        .iter()
        .filter_map(|id| store.sample(*id))
        .all(|s| &s.bio_state == expected)
}

/// Formats items as `[a, b, c]` for problem messages.
pub(crate) fn bracket_list<T: fmt::Display>(items: &[T]) -> String {
    let joined = items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{joined}]")
}
