use std::sync::Arc;

use tokio::{
    sync::{Mutex, broadcast, mpsc, oneshot},
    time::{Duration, Instant},
};

use crate::{
    core::store::{EntityStore, StoreError},
    engine::{
        RequestError, requests,
        resolver,
        slot_copy::{self, SlotCopyOutcome, SlotCopyRequest},
    },
    labware::Labware,
    op::{Operation, StoredEntry},
    persist::{LedgerSink, PersistError},
    types::{EntrySeq, OperationId},
    validate::pipeline::ValidationFailure,
};

use super::events::LedgerEvent;

#[derive(Debug)]
pub enum RuntimeError {
    Store(StoreError),
    Validation(ValidationFailure),
    Persist(PersistError),
    ChannelClosed,
}

impl From<StoreError> for RuntimeError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<ValidationFailure> for RuntimeError {
    fn from(value: ValidationFailure) -> Self {
        Self::Validation(value)
    }
}

impl From<PersistError> for RuntimeError {
    fn from(value: PersistError) -> Self {
        Self::Persist(value)
    }
}

impl From<RequestError> for RuntimeError {
    fn from(value: RequestError) -> Self {
        match value {
            RequestError::Validation(failure) => Self::Validation(failure),
            RequestError::Store(err) => Self::Store(err),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub flush_on_record: bool,
    pub batch_max_entries: usize,
    pub batch_max_latency_ms: u64,
    pub persist_queue_bound: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_on_record: true,
            batch_max_entries: 64,
            batch_max_latency_ms: 75,
            persist_queue_bound: 64,
        }
    }
}

pub struct LedgerHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<LedgerEvent>,
}

impl Clone for LedgerHandle {
    fn clone(&self) -> Self {
        Self {
            cmd_tx: self.cmd_tx.clone(),
            events_tx: self.events_tx.clone(),
        }
    }
}

enum Command {
    Register {
        req: requests::RegisterRequest,
        resp: oneshot::Sender<Result<requests::RegisterOutcome, RuntimeError>>,
    },
    RecordOps {
        req: requests::OpRequest,
        resp: oneshot::Sender<Result<Vec<OperationId>, RuntimeError>>,
    },
    SlotCopy {
        req: SlotCopyRequest,
        resp: oneshot::Sender<Result<SlotCopyOutcome, RuntimeError>>,
    },
    CleanOut {
        req: requests::CleanOutRequest,
        resp: oneshot::Sender<Result<OperationId, RuntimeError>>,
    },
    GetLabware {
        barcode: String,
        resp: oneshot::Sender<Option<Labware>>,
    },
    GetOperation {
        id: OperationId,
        resp: oneshot::Sender<Option<Operation>>,
    },
    LatestOperation {
        op_type: String,
        barcode: String,
        resp: oneshot::Sender<Result<Option<Operation>, RuntimeError>>,
    },
    Flush {
        resp: oneshot::Sender<Result<EntrySeq, RuntimeError>>,
    },
    Shutdown {
        resp: oneshot::Sender<Result<(), RuntimeError>>,
    },
}

enum PersistMsg {
    Entries(Vec<StoredEntry>),
    Flush {
        resp: oneshot::Sender<Result<EntrySeq, PersistError>>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Spawns the single-writer ledger loop, which owns the store. Each command
/// runs one full validate-then-record transaction; pending ledger entries
/// drain to the persistence worker after the transaction commits.
pub fn spawn_ledger(
    store: EntityStore,
    sink: Option<Box<dyn LedgerSink>>,
    config: RuntimeConfig,
) -> LedgerHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(256);
    let (events_tx, _) = broadcast::channel::<LedgerEvent>(1024);

    let (persist_tx_opt, mut durable_rx) = if let Some(sink) = sink {
        let (persist_tx, persist_rx) = mpsc::channel::<PersistMsg>(config.persist_queue_bound);
        let (durable_tx, durable_rx) = mpsc::unbounded_channel::<Result<EntrySeq, PersistError>>();
        spawn_persistence_worker(sink, persist_rx, durable_tx, config.clone());
        (Some(persist_tx), Some(durable_rx))
    } else {
        (None, None)
    };

    let events_tx_loop = events_tx.clone();

    tokio::spawn(async move {
        let mut store = store;

        loop {
            if let Some(rx) = durable_rx.as_mut() {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        let Some(cmd) = cmd else { break; };
                        let done = handle_command(cmd, &mut store, &events_tx_loop, persist_tx_opt.as_ref()).await;
                        if done {
                            break;
                        }
                    }
                    durable = rx.recv() => {
                        if let Some(Ok(entry_seq)) = durable {
                            let _ = events_tx_loop.send(LedgerEvent::DurableUpTo { entry_seq });
                        }
                    }
                }
            } else {
                let Some(cmd) = cmd_rx.recv().await else { break; };
                let done = handle_command(cmd, &mut store, &events_tx_loop, persist_tx_opt.as_ref()).await;
                if done {
                    break;
                }
            }
        }
    });

    LedgerHandle { cmd_tx, events_tx }
}

impl LedgerHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events_tx.subscribe()
    }

    pub async fn register(
        &self,
        req: requests::RegisterRequest,
    ) -> Result<requests::RegisterOutcome, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Register { req, resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    pub async fn record_ops(
        &self,
        req: requests::OpRequest,
    ) -> Result<Vec<OperationId>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::RecordOps { req, resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    pub async fn slot_copy(&self, req: SlotCopyRequest) -> Result<SlotCopyOutcome, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SlotCopy { req, resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    pub async fn clean_out(
        &self,
        req: requests::CleanOutRequest,
    ) -> Result<OperationId, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::CleanOut { req, resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    pub async fn labware(&self, barcode: impl Into<String>) -> Result<Option<Labware>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::GetLabware {
                barcode: barcode.into(),
                resp: tx,
            })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    pub async fn operation(&self, id: OperationId) -> Result<Option<Operation>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::GetOperation { id, resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)
    }

    /// Read-only resolver: the latest operation of `op_type` recorded on the
    /// labware, usable outside the write path.
    pub async fn latest_operation(
        &self,
        op_type: impl Into<String>,
        barcode: impl Into<String>,
    ) -> Result<Option<Operation>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::LatestOperation {
                op_type: op_type.into(),
                barcode: barcode.into(),
                resp: tx,
            })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    pub async fn flush(&self) -> Result<EntrySeq, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Flush { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Shutdown { resp: tx })
            .await
            .map_err(|_| RuntimeError::ChannelClosed)?;
        rx.await.map_err(|_| RuntimeError::ChannelClosed)?
    }
}

async fn handle_command(
    cmd: Command,
    store: &mut EntityStore,
    events_tx: &broadcast::Sender<LedgerEvent>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
) -> bool {
    match cmd {
        Command::Register { req, resp } => {
            let res = requests::register(store, &req)
                .map_err(RuntimeError::from)
                .and_then(|outcome| {
                    finish_request(store, events_tx, persist_tx)?;
                    let _ = events_tx.send(LedgerEvent::LabwareRegistered {
                        labware_id: outcome.labware_id,
                        barcode: outcome.barcode.clone(),
                    });
                    let _ = events_tx.send(LedgerEvent::OperationRecorded {
                        operation_id: outcome.operation_id,
                    });
                    Ok(outcome)
                });
            let _ = resp.send(res);
        }
        Command::RecordOps { req, resp } => {
            let res = requests::record_op_request(store, &req)
                .map_err(RuntimeError::from)
                .and_then(|op_ids| {
                    finish_request(store, events_tx, persist_tx)?;
                    for operation_id in &op_ids {
                        let _ = events_tx.send(LedgerEvent::OperationRecorded {
                            operation_id: *operation_id,
                        });
                    }
                    Ok(op_ids)
                });
            let _ = resp.send(res);
        }
        Command::SlotCopy { req, resp } => {
            let res = slot_copy::perform(store, &req)
                .map_err(RuntimeError::from)
                .and_then(|outcome| {
                    finish_request(store, events_tx, persist_tx)?;
                    if outcome.created_labware {
                        let _ = events_tx.send(LedgerEvent::LabwareRegistered {
                            labware_id: outcome.dest_labware_id,
                            barcode: outcome.dest_barcode.clone(),
                        });
                    }
                    let _ = events_tx.send(LedgerEvent::OperationRecorded {
                        operation_id: outcome.operation_id,
                    });
                    Ok(outcome)
                });
            let _ = resp.send(res);
        }
        Command::CleanOut { req, resp } => {
            let res = requests::clean_out(store, &req)
                .map_err(RuntimeError::from)
                .and_then(|operation_id| {
                    finish_request(store, events_tx, persist_tx)?;
                    let _ = events_tx.send(LedgerEvent::OperationRecorded { operation_id });
                    Ok(operation_id)
                });
            let _ = resp.send(res);
        }
        Command::GetLabware { barcode, resp } => {
            let _ = resp.send(store.labware_by_barcode(&barcode).cloned());
        }
        Command::GetOperation { id, resp } => {
            let _ = resp.send(store.operation(id).cloned());
        }
        Command::LatestOperation {
            op_type,
            barcode,
            resp,
        } => {
            let res = match store.labware_by_barcode(&barcode) {
                Some(lw) => {
                    let (latest, _missing) = resolver::latest_of_type(store, &op_type, &[lw.id]);
                    Ok(latest.values().next().map(|op| (*op).clone()))
                }
                None => Err(RuntimeError::Store(StoreError::UnknownBarcode(barcode))),
            };
            let _ = resp.send(res);
        }
        Command::Flush { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (flush_tx, flush_rx) = oneshot::channel();
                if tx.send(PersistMsg::Flush { resp: flush_tx }).await.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    flush_rx
                        .await
                        .map_err(|_| RuntimeError::ChannelClosed)
                        .and_then(|r| r.map_err(RuntimeError::from))
                }
            } else {
                Ok(store.latest_entry_seq())
            };
            let _ = resp.send(out);
        }
        Command::Shutdown { resp } => {
            let out = if let Some(tx) = persist_tx {
                let (done_tx, done_rx) = oneshot::channel();
                if tx.send(PersistMsg::Shutdown { resp: done_tx }).await.is_err() {
                    Err(RuntimeError::ChannelClosed)
                } else {
                    match done_rx.await {
                        Ok(()) => Ok(()),
                        Err(_) => Err(RuntimeError::ChannelClosed),
                    }
                }
            } else {
                Ok(())
            };
            let _ = resp.send(out);
            return true;
        }
    }

    false
}

/// Drains the committed transaction's ledger entries to the persistence
/// worker, or reports immediate durability when running without a sink.
fn finish_request(
    store: &mut EntityStore,
    events_tx: &broadcast::Sender<LedgerEvent>,
    persist_tx: Option<&mpsc::Sender<PersistMsg>>,
) -> Result<(), RuntimeError> {
    let entries = store.drain_pending_entries();
    if let Some(tx) = persist_tx {
        if !entries.is_empty() {
            tx.try_send(PersistMsg::Entries(entries)).map_err(|err| {
                RuntimeError::Persist(PersistError::Message(format!("persist queue error: {err}")))
            })?;
        }
    } else {
        let _ = events_tx.send(LedgerEvent::DurableUpTo {
            entry_seq: store.latest_entry_seq(),
        });
    }
    Ok(())
}

fn spawn_persistence_worker(
    sink: Box<dyn LedgerSink>,
    mut rx: mpsc::Receiver<PersistMsg>,
    durable_tx: mpsc::UnboundedSender<Result<EntrySeq, PersistError>>,
    config: RuntimeConfig,
) {
    let sink = Arc::new(Mutex::new(sink));
    tokio::spawn(async move {
        let mut buf = Vec::<StoredEntry>::new();
        let mut deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
        let mut last_durable: EntrySeq = 0;

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else {
                        let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                        break;
                    };

                    match msg {
                        PersistMsg::Entries(entries) => {
                            buf.extend(entries);
                            if buf.len() >= config.batch_max_entries || config.flush_on_record {
                                let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                                deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                            }
                        }
                        PersistMsg::Flush { resp } => {
                            let result = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(result.map(|_| last_durable));
                            deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                        }
                        PersistMsg::Shutdown { resp } => {
                            let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, true).await;
                            let _ = resp.send(());
                            break;
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline), if !buf.is_empty() => {
                    let _ = flush_buf(&sink, &mut buf, &mut last_durable, &durable_tx, false).await;
                    deadline = Instant::now() + Duration::from_millis(config.batch_max_latency_ms);
                }
            }
        }
    });
}

async fn flush_buf(
    sink: &Arc<Mutex<Box<dyn LedgerSink>>>,
    buf: &mut Vec<StoredEntry>,
    last_durable: &mut EntrySeq,
    durable_tx: &mpsc::UnboundedSender<Result<EntrySeq, PersistError>>,
    call_flush: bool,
) -> Result<(), PersistError> {
    if buf.is_empty() {
        if call_flush {
            let sink_ref = Arc::clone(sink);
            tokio::task::spawn_blocking(move || {
                let mut sink = sink_ref.blocking_lock();
                sink.flush()
            })
            .await
            .map_err(|e| PersistError::Message(format!("join error: {e}")))??;
        }
        return Ok(());
    }

    let entries = std::mem::take(buf);
    let sink_ref = Arc::clone(sink);
    let append_res: Result<EntrySeq, PersistError> = tokio::task::spawn_blocking(move || {
        let mut sink = sink_ref.blocking_lock();
        let seq = sink.append_entries(&entries)?;
        if call_flush {
            sink.flush()?;
        }
        Ok(seq)
    })
    .await
    .map_err(|e| PersistError::Message(format!("join error: {e}")))?;

    match append_res {
        Ok(seq) => {
            *last_durable = (*last_durable).max(seq);
            let _ = durable_tx.send(Ok(*last_durable));
            Ok(())
        }
        Err(err) => {
            let _ = durable_tx.send(Err(PersistError::Message(format!("append failed: {err:?}"))));
            Err(err)
        }
    }
}
