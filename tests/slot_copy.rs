use labledger::{
    address::Address,
    core::store::EntityStore,
    engine::{
        RequestError,
        requests::{self, RegisterContent, RegisterRequest},
        slot_copy::{self, SlotCopyContent, SlotCopyDestination, SlotCopyRequest},
    },
    labware::LabwareType,
    op::{OpTypeFlags, OperationType, Work, WorkStatus},
    sample::BioState,
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
        name: "Transfer".to_string(),
        flags: OpTypeFlags::default(),
        new_bio_state: None,
    });
    store.add_op_type(OperationType {
        name: "Probe transfer".to_string(),
        flags: OpTypeFlags {
            discards_source: true,
            marks_source_used: true,
            uses_probes: true,
            ..OpTypeFlags::default()
        },
        new_bio_state: Some(BioState::new("Probes")),
    });
    store.add_work(Work {
        work_number: "SGP1".to_string(),
        status: WorkStatus::Active,
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

fn register(store: &mut EntityStore, contents: Vec<RegisterContent>) -> requests::RegisterOutcome {
    requests::register(
        store,
        &RegisterRequest {
            op_type: "Register".to_string(),
            username: "user1".to_string(),
            labware_type: "Slide".to_string(),
            external_barcode: None,
            contents,
            work_numbers: vec![],
            performed_ms: None,
        },
    )
    .expect("register")
}

fn copy_request(source: &str, contents: Vec<(Address, Address)>, op_type: &str) -> SlotCopyRequest {
    SlotCopyRequest {
        op_type: op_type.to_string(),
        username: "user1".to_string(),
        destination: SlotCopyDestination::New {
            labware_type: "Slide".to_string(),
        },
        contents: contents
            .into_iter()
            .map(|(src, dest)| SlotCopyContent {
                source_barcode: source.to_string(),
                source_address: src,
                dest_address: dest,
            })
            .collect(),
        work_numbers: vec![],
        comment_ids: vec![],
        performed_ms: None,
    }
}

#[test]
fn one_source_sample_derives_exactly_one_destination_sample() {
    let mut store = seeded_store();
    let source = register(&mut store, vec![content(Address::new(1, 1), "D1")]);
    let samples_before = store.sample_count();

    let outcome = slot_copy::perform(
        &mut store,
        &copy_request(
            &source.barcode,
            vec![
                (Address::new(1, 1), Address::new(1, 1)),
                (Address::new(1, 1), Address::new(1, 2)),
            ],
            "Probe transfer",
        ),
    )
    .expect("slot copy");

    assert_eq!(store.sample_count(), samples_before + 1);

    let op = store.operation(outcome.operation_id).expect("operation");
    assert_eq!(op.actions.len(), 2);
    assert_eq!(op.actions[0].dest_sample, op.actions[1].dest_sample);
    let derived = store.sample(op.actions[0].dest_sample).expect("derived");
    assert_eq!(derived.bio_state, BioState::new("Probes"));

    let dest = store.labware(outcome.dest_labware_id).expect("dest");
    let a1 = dest.slot(Address::new(1, 1)).expect("slot");
    let a2 = dest.slot(Address::new(1, 2)).expect("slot");
    assert_eq!(a1.sample_ids, vec![derived.id]);
    assert_eq!(a2.sample_ids, vec![derived.id]);
}

#[test]
fn discard_and_mark_used_apply_to_sources_only() {
    let mut store = seeded_store();
    let source = register(&mut store, vec![content(Address::new(1, 1), "D1")]);
    let bystander = register(&mut store, vec![content(Address::new(1, 1), "D2")]);

    slot_copy::perform(
        &mut store,
        &copy_request(
            &source.barcode,
            vec![(Address::new(1, 1), Address::new(1, 1))],
            "Probe transfer",
        ),
    )
    .expect("slot copy");

    let src = store.labware(source.labware_id).expect("source");
    assert!(src.flags.discarded);
    assert!(src.flags.used);

    let other = store.labware(bystander.labware_id).expect("bystander");
    assert!(!other.flags.discarded);
    assert!(!other.flags.used);
}

#[test]
fn plain_transfer_reuses_source_samples_without_derivation() {
    let mut store = seeded_store();
    let source = register(&mut store, vec![content(Address::new(1, 1), "D1")]);
    let samples_before = store.sample_count();

    let outcome = slot_copy::perform(
        &mut store,
        &copy_request(
            &source.barcode,
            vec![(Address::new(1, 1), Address::new(1, 3))],
            "Transfer",
        ),
    )
    .expect("slot copy");

    assert_eq!(store.sample_count(), samples_before);
    let op = store.operation(outcome.operation_id).expect("operation");
    assert_eq!(op.actions[0].source_sample, op.actions[0].dest_sample);
    assert_eq!(op.actions[0].source_sample, source.sample_ids[0]);

    let src = store.labware(source.labware_id).expect("source");
    assert!(!src.flags.discarded);
}

#[test]
fn multi_sample_source_slot_yields_one_action_per_sample() {
    let mut store = seeded_store();
    let source = register(&mut store, vec![content(Address::new(1, 1), "D1")]);
    let tissue = store.create_tissue(labledger::sample::TissueDraft {
        donor_name: "D2".to_string(),
        spatial_location: 1,
        replicate: 1,
        fixative: "None".to_string(),
        medium: "OCT".to_string(),
        external_name: None,
    });
    let extra = store
        .create_sample(tissue, "Original sample", None)
        .expect("sample");
    store
        .add_sample_to_slot(source.labware_id, Address::new(1, 1), extra)
        .expect("add");

    let outcome = slot_copy::perform(
        &mut store,
        &copy_request(
            &source.barcode,
            vec![(Address::new(1, 1), Address::new(1, 1))],
            "Transfer",
        ),
    )
    .expect("slot copy");

    let op = store.operation(outcome.operation_id).expect("operation");
    assert_eq!(op.actions.len(), 2);
    let dest = store.labware(outcome.dest_labware_id).expect("dest");
    assert_eq!(
        dest.slot(Address::new(1, 1)).expect("slot").sample_ids,
        vec![source.sample_ids[0], extra]
    );
}

#[test]
fn occupied_destination_slot_aborts_with_no_writes() {
    let mut store = seeded_store();
    let source = register(&mut store, vec![content(Address::new(1, 1), "D1")]);
    let dest = register(&mut store, vec![content(Address::new(1, 1), "D2")]);
    store.drain_pending_entries();
    let ops_before = store.operation_count();

    let err = slot_copy::perform(
        &mut store,
        &SlotCopyRequest {
            op_type: "Transfer".to_string(),
            username: "user1".to_string(),
            destination: SlotCopyDestination::Existing {
                barcode: dest.barcode.clone(),
            },
            contents: vec![SlotCopyContent {
                source_barcode: source.barcode.clone(),
                source_address: Address::new(1, 1),
                dest_address: Address::new(1, 1),
            }],
            work_numbers: vec![],
            comment_ids: vec![],
            performed_ms: None,
        },
    )
    .expect_err("occupied destination");

    match err {
        RequestError::Validation(failure) => {
            assert_eq!(
                failure.problems,
                vec!["Destination slot already occupied: [A1]".to_string()]
            );
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
    assert_eq!(store.operation_count(), ops_before);
    assert!(store.drain_pending_entries().is_empty());
}

#[test]
fn existing_destination_with_free_slot_is_populated() {
    let mut store = seeded_store();
    let source = register(&mut store, vec![content(Address::new(1, 1), "D1")]);
    let dest = register(&mut store, vec![content(Address::new(1, 1), "D2")]);

    let outcome = slot_copy::perform(
        &mut store,
        &SlotCopyRequest {
            op_type: "Transfer".to_string(),
            username: "user1".to_string(),
            destination: SlotCopyDestination::Existing {
                barcode: dest.barcode.clone(),
            },
            contents: vec![SlotCopyContent {
                source_barcode: source.barcode.clone(),
                source_address: Address::new(1, 1),
                dest_address: Address::new(1, 2),
            }],
            work_numbers: vec![],
            comment_ids: vec![],
            performed_ms: None,
        },
    )
    .expect("slot copy");

    assert!(!outcome.created_labware);
    assert_eq!(outcome.dest_labware_id, dest.labware_id);
    let lw = store.labware(dest.labware_id).expect("dest");
    assert_eq!(
        lw.slot(Address::new(1, 2)).expect("slot").sample_ids,
        vec![source.sample_ids[0]]
    );
}

#[test]
fn conflicting_destination_bio_state_is_rejected() {
    let mut store = seeded_store();
    let source = register(&mut store, vec![content(Address::new(1, 1), "D1")]);
    let dest = register(&mut store, vec![content(Address::new(1, 1), "D2")]);

    // A probe transfer brings Probes material; the destination's resident
    // samples are still in "Original sample".
    let err = slot_copy::perform(
        &mut store,
        &SlotCopyRequest {
            op_type: "Probe transfer".to_string(),
            username: "user1".to_string(),
            destination: SlotCopyDestination::Existing {
                barcode: dest.barcode.clone(),
            },
            contents: vec![SlotCopyContent {
                source_barcode: source.barcode.clone(),
                source_address: Address::new(1, 1),
                dest_address: Address::new(1, 2),
            }],
            work_numbers: vec![],
            comment_ids: vec![],
            performed_ms: None,
        },
    )
    .expect_err("bio state conflict");

    match err {
        RequestError::Validation(failure) => {
            assert_eq!(
                failure.problems,
                vec![format!(
                    "Destination labware {} contains samples in a conflicting bio state",
                    dest.barcode
                )]
            );
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[test]
fn new_destination_gets_generated_barcode_and_work_is_linked() {
    let mut store = seeded_store();
    let source = register(&mut store, vec![content(Address::new(1, 1), "D1")]);

    let mut req = copy_request(
        &source.barcode,
        vec![(Address::new(1, 1), Address::new(1, 1))],
        "Transfer",
    );
    req.work_numbers = vec!["SGP1".to_string()];
    let outcome = slot_copy::perform(&mut store, &req).expect("slot copy");

    assert!(outcome.created_labware);
    assert!(
        labledger::barcode::verify("LW-", &outcome.dest_barcode).is_ok(),
        "generated barcode re-verifies"
    );
    assert_eq!(
        store.works_for_operation(outcome.operation_id),
        vec!["SGP1"]
    );
    assert_eq!(
        store.operations_for_work("SGP1"),
        vec![outcome.operation_id]
    );
}

#[test]
fn source_already_in_target_bio_state_is_reused() {
    let mut store = seeded_store();
    let source = register(&mut store, vec![content(Address::new(1, 1), "D1")]);

    let first = slot_copy::perform(
        &mut store,
        &copy_request(
            &source.barcode,
            vec![(Address::new(1, 1), Address::new(1, 1))],
            "Probe transfer",
        ),
    )
    .expect("first copy");
    let dest1 = store
        .labware(first.dest_labware_id)
        .expect("dest")
        .barcode
        .clone();
    let samples_before = store.sample_count();

    // The first destination now holds Probes material; copying it onward
    // with the same probe transfer must not derive again.
    let second = slot_copy::perform(
        &mut store,
        &copy_request(
            &dest1,
            vec![(Address::new(1, 1), Address::new(1, 1))],
            "Probe transfer",
        ),
    )
    .expect("second copy");

    assert_eq!(store.sample_count(), samples_before);
    let op = store.operation(second.operation_id).expect("operation");
    assert_eq!(op.actions[0].source_sample, op.actions[0].dest_sample);
}
