//! Per-request problem accumulation.
//!
//! Every request handler builds one [`Validation`], runs every relevant
//! check (each appends problems, none throws), then calls [`Validation::close`]
//! once: the request proceeds to recording only on an empty problem set.
//! Partial validation never causes partial writes.

use hashbrown::HashMap;

use crate::core::store::EntityStore;
use crate::engine::resolver;
use crate::labware::Labware;
use crate::op::{Comment, Operation, OperationType, Work};
use crate::types::{CommentId, LabwareId, OperationId};

use super::labware::{LabwareRules, bracket_list, validate_labware};

/// The single aggregated failure a request raises: the ordered,
/// de-duplicated list of every problem found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    /// Human-readable problem descriptions.
    pub problems: Vec<String>,
}

/// Flag requirements a request can place on its operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpAttribute {
    /// Must be an in-place type.
    InPlace,
    /// Must be a transfer type.
    Transfer,
    /// Must discard its sources.
    DiscardsSource,
    /// Must mark its sources used.
    MarksSourceUsed,
    /// Must destroy its sources.
    Destroys,
    /// Must release its sources.
    Releases,
    /// Must apply a stain.
    Stains,
    /// Must use probe panels.
    UsesProbes,
    /// Must introduce a new bio state.
    SetsBioState,
}

impl OpAttribute {
    fn holds(self, ot: &OperationType) -> bool {
        match self {
            OpAttribute::InPlace => ot.flags.in_place,
            OpAttribute::Transfer => ot.transfers(),
            OpAttribute::DiscardsSource => ot.flags.discards_source,
            OpAttribute::MarksSourceUsed => ot.flags.marks_source_used,
            OpAttribute::Destroys => ot.flags.destroys,
            OpAttribute::Releases => ot.flags.releases,
            OpAttribute::Stains => ot.flags.stains,
            OpAttribute::UsesProbes => ot.flags.uses_probes,
            OpAttribute::SetsBioState => ot.new_bio_state.is_some(),
        }
    }
}

/// Stateful per-request problem collector over a borrowed store.
pub struct Validation<'a> {
    store: &'a EntityStore,
    problems: Vec<String>,
}

impl<'a> Validation<'a> {
    /// Starts a fresh collection for one request.
    pub fn new(store: &'a EntityStore) -> Self {
        Self {
            store,
            problems: Vec::new(),
        }
    }

    /// Appends a problem, keeping first-seen order and dropping duplicates.
    pub fn problem(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        if !self.problems.contains(&msg) {
            self.problems.push(msg);
        }
    }

    /// True when any problem has been collected so far.
    pub fn has_problems(&self) -> bool {
        !self.problems.is_empty()
    }

    /// Loads an operation type by name, requiring `required` attributes.
    /// Missing type or missing attribute appends a problem; never throws.
    pub fn check_op_type(&mut self, name: &str, required: &[OpAttribute]) -> Option<OperationType> {
        let Some(ot) = self.store.op_type(name) else {
            self.problem(format!("Unknown operation type: {name}"));
            return None;
        };
        let ot = ot.clone();
        if required.iter().any(|attr| !attr.holds(&ot)) {
            self.problem(format!("Operation type {name} cannot be used in this request"));
            return None;
        }
        Some(ot)
    }

    /// Loads labware by barcode and runs the configured rules. Unknown
    /// barcodes become one combined problem; found labware is returned in
    /// request order, repeats included.
    pub fn check_labware(&mut self, barcodes: &[String], rules: &LabwareRules) -> Vec<Labware> {
        let mut found = Vec::new();
        let mut unknown = Vec::new();
        for bc in barcodes {
            match self.store.labware_by_barcode(bc) {
                Some(lw) => found.push(lw.clone()),
                None => {
                    if !unknown.contains(bc) {
                        unknown.push(bc.clone());
                    }
                }
            }
        }
        if !unknown.is_empty() {
            self.problem(format!("Unknown labware barcode: {}", bracket_list(&unknown)));
        }
        let refs: Vec<&Labware> = found.iter().collect();
        for msg in validate_labware(self.store, rules, &refs) {
            self.problem(msg);
        }
        found
    }

    /// Loads works by number, requiring each to be usable.
    pub fn check_work(&mut self, work_numbers: &[String]) -> Vec<Work> {
        let mut found = Vec::new();
        let mut unknown = Vec::new();
        for wn in work_numbers {
            match self.store.work(wn) {
                Some(work) => {
                    if !work.status.usable() {
                        self.problem(format!(
                            "Work {wn} cannot be used because it is {}",
                            work.status
                        ));
                    }
                    found.push(work.clone());
                }
                None => {
                    if !unknown.contains(wn) {
                        unknown.push(wn.clone());
                    }
                }
            }
        }
        if !unknown.is_empty() {
            self.problem(format!("Unknown work number: {}", bracket_list(&unknown)));
        }
        found
    }

    /// Loads comments by id, flagging unknown ids and disabled comments.
    pub fn check_comments(&mut self, ids: &[CommentId]) -> Vec<Comment> {
        let mut found = Vec::new();
        let mut unknown = Vec::new();
        let mut disabled = Vec::new();
        for id in ids {
            match self.store.comment(*id) {
                Some(comment) => {
                    if !comment.enabled && !disabled.contains(id) {
                        disabled.push(*id);
                    }
                    found.push(comment.clone());
                }
                None => {
                    if !unknown.contains(id) {
                        unknown.push(*id);
                    }
                }
            }
        }
        if !unknown.is_empty() {
            self.problem(format!("Unknown comment id: {}", bracket_list(&unknown)));
        }
        if !disabled.is_empty() {
            self.problem(format!("Comment is disabled: {}", bracket_list(&disabled)));
        }
        found
    }

    /// Flags a requested timestamp in the future, or before the latest
    /// operation already recorded on any of `labware`.
    pub fn check_timestamp(&mut self, performed_ms: u64, now_ms: u64, labware: &[Labware]) {
        if performed_ms > now_ms {
            self.problem("The specified time is in the future");
        }
        for lw in labware {
            let prior = self
                .store
                .operations_on(lw.id)
                .into_iter()
                .fold(None::<&Operation>, |best, op| {
                    if resolver::supersedes(op, best) { Some(op) } else { best }
                });
            if let Some(prior) = prior {
                if performed_ms < prior.performed_ms {
                    self.problem(format!(
                        "The specified time is before the previous operation on labware {}",
                        lw.barcode
                    ));
                }
            }
        }
    }

    /// Resolves the latest operation of `op_type` per labware; labware with
    /// no qualifying prior operation becomes one combined problem.
    pub fn check_prior_operations(
        &mut self,
        op_type: &str,
        labware: &[Labware],
    ) -> HashMap<LabwareId, OperationId> {
        let ids: Vec<LabwareId> = labware.iter().map(|lw| lw.id).collect();
        let (latest, missing) = resolver::latest_of_type(self.store, op_type, &ids);
        if !missing.is_empty() {
            let barcodes: Vec<String> = labware
                .iter()
                .filter(|lw| missing.contains(&lw.id))
                .map(|lw| lw.barcode.clone())
                .collect();
            self.problem(format!(
                "No previous {op_type} operation on labware: {}",
                bracket_list(&barcodes)
            ));
        }
        latest.into_iter().map(|(lw, op)| (lw, op.id)).collect()
    }

    /// Closes the pipeline: `Err` with the full problem list when anything
    /// was collected, `Ok` otherwise.
    pub fn close(self) -> Result<(), ValidationFailure> {
        if self.problems.is_empty() {
            Ok(())
        } else {
            Err(ValidationFailure {
                problems: self.problems,
            })
        }
    }
}
