//! Laboratory labware tracking with an append-only operation ledger.
//!
//! Labware (plates, slides, tubes) carries samples in grid-addressed slots;
//! every processing step is recorded as an immutable Operation whose Actions
//! form the lineage graph from original tissue to every derived sample.
//! Requests validate everything up front, collecting the complete problem
//! set, and only mutate the store once that set is empty. Every mutation is
//! journaled as a ledger entry, replayable from the SQLite sink.
//!
//! # Examples
//!
//! In-memory usage with [`core::store::EntityStore`]:
//! ```
//! use labledger::{
//!     address::Address,
//!     core::store::EntityStore,
//!     engine::requests::{self, OpRequest, RegisterContent, RegisterRequest},
//!     labware::LabwareType,
//!     op::{OpTypeFlags, OperationType},
//!     sample::BioState,
//! };
//!
//! let mut store = EntityStore::new();
//! store.add_labware_type(LabwareType {
//!     name: "Slide".to_string(),
//!     num_rows: 1,
//!     num_columns: 3,
//!     prebarcoded: false,
//!     supports_blocks: false,
//! });
//! store.add_bio_state(BioState::new("Original sample"));
//! store.add_op_type(OperationType {
//!     name: "Register".to_string(),
//!     flags: OpTypeFlags { in_place: true, ..OpTypeFlags::default() },
//!     new_bio_state: None,
//! });
//! store.add_op_type(OperationType {
//!     name: "Stain".to_string(),
//!     flags: OpTypeFlags { in_place: true, stains: true, ..OpTypeFlags::default() },
//!     new_bio_state: None,
//! });
//!
//! let outcome = requests::register(&mut store, &RegisterRequest {
//!     op_type: "Register".to_string(),
//!     username: "user1".to_string(),
//!     labware_type: "Slide".to_string(),
//!     external_barcode: None,
//!     contents: vec![RegisterContent {
//!         address: Address::new(1, 1),
//!         donor_name: "DONOR1".to_string(),
//!         spatial_location: 1,
//!         replicate: 1,
//!         fixative: "None".to_string(),
//!         medium: "OCT".to_string(),
//!         external_name: None,
//!         bio_state: "Original sample".to_string(),
//!         block: false,
//!     }],
//!     work_numbers: vec![],
//!     performed_ms: None,
//! }).expect("register");
//! assert_eq!(outcome.barcode, "LW-0001F");
//!
//! let ops = requests::record_op_request(&mut store, &OpRequest {
//!     op_type: "Stain".to_string(),
//!     username: "user1".to_string(),
//!     barcodes: vec![outcome.barcode.clone()],
//!     work_numbers: vec![],
//!     comment_ids: vec![],
//!     performed_ms: None,
//! }).expect("stain");
//! assert_eq!(ops.len(), 1);
//! ```
//!
//! Runtime usage with SQLite sink:
//! ```no_run
//! use labledger::{
//!     core::store::EntityStore,
//!     persist::sqlite::SqliteLedgerSink,
//!     runtime::handle::{RuntimeConfig, spawn_ledger},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = EntityStore::new();
//! let sink = SqliteLedgerSink::open("ledger.db").expect("open sqlite");
//! let handle = spawn_ledger(store, Some(Box::new(sink)), RuntimeConfig::default());
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```

/// Grid addresses for labware slots.
pub mod address;
/// Checksummed barcode generation and verification.
pub mod barcode;
/// In-memory authoritative store and index helpers.
pub mod core;
/// Operation recording, resolution, and request flows.
pub mod engine;
/// Labware, slots, and lifecycle state.
pub mod labware;
/// Operation model, reference data, and ledger entries.
pub mod op;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Tissue lineage and sample records.
pub mod sample;
/// Shared identifier aliases.
pub mod types;
/// Labware rules and the request validation pipeline.
pub mod validate;
