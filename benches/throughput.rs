use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use labledger::{
    address::Address,
    core::store::EntityStore,
    engine::{
        requests::{self, RegisterContent, RegisterRequest},
        slot_copy::{self, SlotCopyContent, SlotCopyDestination, SlotCopyRequest},
    },
    labware::LabwareType,
    op::{OpTypeFlags, OperationType},
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
    store.add_labware_type(LabwareType {
        name: "Plate96".to_string(),
        num_rows: 8,
        num_columns: 12,
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
    store.add_op_type(OperationType {
        name: "Probe transfer".to_string(),
        flags: OpTypeFlags {
            uses_probes: true,
            ..OpTypeFlags::default()
        },
        new_bio_state: Some(BioState::new("Probes")),
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

fn register_plate(store: &mut EntityStore, donor: &str) -> requests::RegisterOutcome {
    let contents = Address::grid(8, 12)
        .map(|address| content(address, donor))
        .collect();
    requests::register(
        store,
        &RegisterRequest {
            op_type: "Register".to_string(),
            username: "bench".to_string(),
            labware_type: "Plate96".to_string(),
            external_barcode: None,
            contents,
            work_numbers: vec![],
            performed_ms: None,
        },
    )
    .expect("register")
}

fn bench_register(c: &mut Criterion) {
    c.bench_function("register_500_slides", |b| {
        b.iter(|| {
            let mut store = seeded_store();
            for i in 0..500u32 {
                let _ = requests::register(
                    &mut store,
                    &RegisterRequest {
                        op_type: "Register".to_string(),
                        username: "bench".to_string(),
                        labware_type: "Slide".to_string(),
                        external_barcode: None,
                        contents: vec![content(Address::new(1, 1), &format!("D{i}"))],
                        work_numbers: vec![],
                        performed_ms: None,
                    },
                )
                .expect("register");
            }
        });
    });
}

fn bench_in_place_ops(c: &mut Criterion) {
    c.bench_function("stain_full_plate_100x", |b| {
        b.iter(|| {
            let mut store = seeded_store();
            let outcome = register_plate(&mut store, "D1");
            for _ in 0..100u32 {
                let _ = requests::record_op_request(
                    &mut store,
                    &requests::OpRequest {
                        op_type: "Stain".to_string(),
                        username: "bench".to_string(),
                        barcodes: vec![outcome.barcode.clone()],
                        work_numbers: vec![],
                        comment_ids: vec![],
                        performed_ms: None,
                    },
                )
                .expect("stain");
            }
        });
    });
}

fn bench_slot_copy(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_copy_full_plate");
    for n in [8usize, 48usize, 96usize] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let mut store = seeded_store();
                let outcome = register_plate(&mut store, "D1");
                let contents = Address::grid(8, 12)
                    .take(n)
                    .map(|address| SlotCopyContent {
                        source_barcode: outcome.barcode.clone(),
                        source_address: address,
                        dest_address: address,
                    })
                    .collect();
                let _ = slot_copy::perform(
                    &mut store,
                    &SlotCopyRequest {
                        op_type: "Probe transfer".to_string(),
                        username: "bench".to_string(),
                        destination: SlotCopyDestination::New {
                            labware_type: "Plate96".to_string(),
                        },
                        contents,
                        work_numbers: vec![],
                        comment_ids: vec![],
                        performed_ms: None,
                    },
                )
                .expect("slot copy");
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_register, bench_in_place_ops, bench_slot_copy);
criterion_main!(benches);
