use std::time::{SystemTime, UNIX_EPOCH};

use labledger::{
    address::Address,
    core::store::EntityStore,
    engine::{
        RequestError,
        requests::{self, OpRequest, RegisterContent, RegisterRequest},
        slot_copy::{self, SlotCopyContent, SlotCopyDestination, SlotCopyRequest},
    },
    labware::LabwareType,
    op::{Comment, OpTypeFlags, OperationType, Work, WorkStatus},
    sample::BioState,
    validate::{
        labware::{LabwareRules, validate_labware},
        pipeline::Validation,
    },
};

fn seeded_store() -> EntityStore {
    let mut store = EntityStore::new();
    store.add_labware_type(LabwareType {
        name: "Slide".to_string(),
        num_rows: 1,
        num_columns: 3,
        prebarcoded: false,
        supports_blocks: false,
    });
    store.add_bio_state(BioState::new("Original sample"));
    store.add_bio_state(BioState::new("Probes"));
    store.add_op_type(OperationType {
        name: "Register".to_string(),
        flags: OpTypeFlags {
            in_place: true,
            ..OpTypeFlags::default()
        },
        new_bio_state: None,
    });
    store.add_op_type(OperationType {
        name: "Stain".to_string(),
        flags: OpTypeFlags {
            in_place: true,
            stains: true,
            ..OpTypeFlags::default()
        },
        new_bio_state: None,
    });
    store.add_work(Work {
        work_number: "SGP1".to_string(),
        status: WorkStatus::Active,
    });
    store.add_work(Work {
        work_number: "SGP2".to_string(),
        status: WorkStatus::Completed,
    });
    store.add_comment(Comment {
        id: 1,
        category: "section".to_string(),
        text: "Poor quality".to_string(),
        enabled: true,
    });
    store.add_comment(Comment {
        id: 2,
        category: "section".to_string(),
        text: "Retired remark".to_string(),
        enabled: false,
    });
    store
}

fn content(address: Address, donor: &str) -> RegisterContent {
    RegisterContent {
        address,
        donor_name: donor.to_string(),
        spatial_location: 1,
        replicate: 1,
        fixative: "None".to_string(),
        medium: "OCT".to_string(),
        external_name: None,
        bio_state: "Original sample".to_string(),
        block: false,
    }
}

fn register_slide(store: &mut EntityStore, donor: &str) -> requests::RegisterOutcome {
    requests::register(
        store,
        &RegisterRequest {
            op_type: "Register".to_string(),
            username: "user1".to_string(),
            labware_type: "Slide".to_string(),
            external_barcode: None,
            contents: vec![content(Address::new(1, 1), donor)],
            work_numbers: vec![],
            performed_ms: None,
        },
    )
    .expect("register")
}

fn problems(err: RequestError) -> Vec<String> {
    match err {
        RequestError::Validation(failure) => failure.problems,
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[test]
fn every_failure_is_reported_together_and_nothing_is_written() {
    let mut store = seeded_store();
    let empty_id = store.create_labware("Slide", None).expect("labware");
    let empty_bc = store.labware(empty_id).expect("labware").barcode.clone();
    store.drain_pending_entries();

    let ops_before = store.operation_count();
    let samples_before = store.sample_count();

    let err = requests::record_op_request(
        &mut store,
        &OpRequest {
            op_type: "Bogus".to_string(),
            username: "user1".to_string(),
            barcodes: vec![empty_bc.clone()],
            work_numbers: vec!["NOPE".to_string()],
            comment_ids: vec![],
            performed_ms: None,
        },
    )
    .expect_err("validation failure");

    let problems = problems(err);
    assert_eq!(
        problems,
        vec![
            "Unknown operation type: Bogus".to_string(),
            format!("Labware contains no samples: [{empty_bc}]"),
            "Unknown work number: [NOPE]".to_string(),
        ]
    );
    assert_eq!(store.operation_count(), ops_before);
    assert_eq!(store.sample_count(), samples_before);
    assert!(store.drain_pending_entries().is_empty());
}

#[test]
fn repeated_labware_yields_one_problem_and_is_not_filtered() {
    let mut store = seeded_store();
    let outcome = register_slide(&mut store, "D1");
    let bc = outcome.barcode;

    let mut v = Validation::new(&store);
    let loaded = v.check_labware(
        &[bc.clone(), bc.clone()],
        &LabwareRules::default(),
    );
    assert_eq!(loaded.len(), 2);
    let failure = v.close().expect_err("repeated labware");
    assert_eq!(
        failure.problems,
        vec![format!("Labware is repeated in the request: [{bc}]")]
    );
}

#[test]
fn multi_sample_and_multi_slot_are_distinct_problems() {
    let mut store = seeded_store();
    let two_samples = requests::register(
        &mut store,
        &RegisterRequest {
            op_type: "Register".to_string(),
            username: "user1".to_string(),
            labware_type: "Slide".to_string(),
            external_barcode: None,
            contents: vec![content(Address::new(1, 1), "D1"), content(Address::new(1, 2), "D2")],
            work_numbers: vec![],
            performed_ms: None,
        },
    )
    .expect("register");

    let split = register_slide(&mut store, "D3");
    store
        .add_sample_to_slot(split.labware_id, Address::new(1, 2), split.sample_ids[0])
        .expect("spread sample");

    let rules = LabwareRules {
        require_single_sample: true,
        ..LabwareRules::default()
    };
    let multi = store.labware(two_samples.labware_id).expect("labware");
    let spread = store.labware(split.labware_id).expect("labware");
    let found = validate_labware(&store, &rules, &[multi, spread]);
    assert_eq!(
        found,
        vec![
            format!("Labware contains multiple samples: [{}]", multi.barcode),
            format!("Sample is split across multiple slots: [{}]", spread.barcode),
        ]
    );
}

#[test]
fn lifecycle_and_bio_state_rules_report_by_category() {
    let mut store = seeded_store();
    let destroyed = register_slide(&mut store, "D1");
    let released = register_slide(&mut store, "D2");
    store
        .apply_state_change(destroyed.labware_id, labledger::labware::StateChange::Destroy)
        .expect("destroy");
    store
        .apply_state_change(released.labware_id, labledger::labware::StateChange::Release)
        .expect("release");

    let rules = LabwareRules {
        expected_bio_state: Some(BioState::new("Probes")),
        ..LabwareRules::default()
    };
    let a = store.labware(destroyed.labware_id).expect("labware");
    let b = store.labware(released.labware_id).expect("labware");
    let found = validate_labware(&store, &rules, &[a, b]);
    assert_eq!(
        found,
        vec![
            format!("Labware is destroyed: [{}]", a.barcode),
            format!("Labware is released: [{}]", b.barcode),
            format!(
                "Labware contains samples not in bio state Probes: [{}, {}]",
                a.barcode, b.barcode
            ),
        ]
    );
}

#[test]
fn unusable_work_and_comment_problems() {
    let mut store = seeded_store();
    register_slide(&mut store, "D1");

    let mut v = Validation::new(&store);
    let works = v.check_work(&["SGP1".to_string(), "SGP2".to_string()]);
    assert_eq!(works.len(), 2);
    let comments = v.check_comments(&[1, 2, 99]);
    assert_eq!(comments.len(), 2);
    let failure = v.close().expect_err("problems");
    assert_eq!(
        failure.problems,
        vec![
            "Work SGP2 cannot be used because it is completed".to_string(),
            "Unknown comment id: [99]".to_string(),
            "Comment is disabled: [2]".to_string(),
        ]
    );
}

#[test]
fn timestamps_cannot_be_future_or_precede_prior_operations() {
    let mut store = seeded_store();
    let outcome = register_slide(&mut store, "D1");

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_millis() as u64;

    let err = requests::record_op_request(
        &mut store,
        &OpRequest {
            op_type: "Stain".to_string(),
            username: "user1".to_string(),
            barcodes: vec![outcome.barcode.clone()],
            work_numbers: vec![],
            comment_ids: vec![],
            performed_ms: Some(now + 3_600_000),
        },
    )
    .expect_err("future timestamp");
    assert_eq!(
        problems(err),
        vec!["The specified time is in the future".to_string()]
    );

    let err = requests::record_op_request(
        &mut store,
        &OpRequest {
            op_type: "Stain".to_string(),
            username: "user1".to_string(),
            barcodes: vec![outcome.barcode.clone()],
            work_numbers: vec![],
            comment_ids: vec![],
            performed_ms: Some(1),
        },
    )
    .expect_err("backdated before registration");
    assert_eq!(
        problems(err),
        vec![format!(
            "The specified time is before the previous operation on labware {}",
            outcome.barcode
        )]
    );
}

#[test]
fn problems_are_deduplicated_in_first_seen_order() {
    let store = seeded_store();
    let mut v = Validation::new(&store);
    v.problem("first");
    v.problem("second");
    v.problem("first");
    let failure = v.close().expect_err("problems");
    assert_eq!(failure.problems, vec!["first".to_string(), "second".to_string()]);
}

#[test]
fn slot_copy_rejects_in_place_operation_types() {
    let mut store = seeded_store();
    let outcome = register_slide(&mut store, "D1");

    let err = slot_copy::perform(
        &mut store,
        &SlotCopyRequest {
            op_type: "Stain".to_string(),
            username: "user1".to_string(),
            destination: SlotCopyDestination::New {
                labware_type: "Slide".to_string(),
            },
            contents: vec![SlotCopyContent {
                source_barcode: outcome.barcode.clone(),
                source_address: Address::new(1, 1),
                dest_address: Address::new(1, 1),
            }],
            work_numbers: vec![],
            comment_ids: vec![],
            performed_ms: None,
        },
    )
    .expect_err("in-place type rejected");
    assert_eq!(
        problems(err),
        vec!["Operation type Stain cannot be used in this request".to_string()]
    );
}
