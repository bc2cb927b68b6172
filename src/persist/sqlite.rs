//! SQLite-backed append-only ledger sink.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

use crate::{
    core::store::EntityStore,
    op::{ENTRY_FORMAT_VERSION, LedgerEntry, StoredEntry, StoredEntryEnvelope},
    types::EntrySeq,
};

use super::{LedgerSink, PersistResult};

/// SQLite implementation of [`crate::persist::LedgerSink`].
pub struct SqliteLedgerSink {
    conn: Connection,
}

impl SqliteLedgerSink {
    /// Opens or creates a SQLite-backed sink at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite sink.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Replays the ledger into `store`, which must already hold the same
    /// reference data (labware types, operation types, bio states, works,
    /// comments) the entries were recorded under. Entries strictly after the
    /// store's latest applied sequence are applied in order.
    pub fn load_into(&self, store: &mut EntityStore) -> PersistResult<()> {
        let entries = self.load_entries_after(store.latest_entry_seq())?;
        for entry in entries {
            store.apply_replayed_entry(entry)?;
        }
        Ok(())
    }

    /// Loads entries strictly after `seq`.
    pub fn load_entries_after(&self, seq: EntrySeq) -> PersistResult<Vec<StoredEntry>> {
        let mut stmt = self
            .conn
            .prepare("SELECT seq, ts_ms, payload FROM entries WHERE seq > ?1 ORDER BY seq ASC")?;

        let rows = stmt.query_map(params![seq as i64], |row| {
            let seq: i64 = row.get(0)?;
            let ts_ms: i64 = row.get(1)?;
            let payload: Vec<u8> = row.get(2)?;
            let mut entry = decode_entry_payload(&payload).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    payload.len(),
                    rusqlite::types::Type::Blob,
                    Box::new(std::io::Error::other(err)),
                )
            })?;
            entry.seq = seq as EntrySeq;
            entry.ts_ms = ts_ms as u64;
            Ok(entry)
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Returns the latest sequence persisted in the entries table.
    pub fn latest_seq(&self) -> PersistResult<EntrySeq> {
        let seq: Option<i64> = self
            .conn
            .query_row("SELECT MAX(seq) FROM entries", [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(seq.unwrap_or(0) as EntrySeq)
    }
}

impl LedgerSink for SqliteLedgerSink {
    fn append_entries(&mut self, entries: &[StoredEntry]) -> PersistResult<EntrySeq> {
        if entries.is_empty() {
            return self.latest_seq();
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO entries(seq, ts_ms, kind, payload) VALUES (?1, ?2, ?3, ?4)")?;
            for stored in entries {
                let payload = serde_json::to_vec(&StoredEntryEnvelope::new(stored.clone()))?;
                stmt.execute(params![
                    stored.seq as i64,
                    stored.ts_ms as i64,
                    entry_kind(&stored.entry),
                    payload,
                ])?;
            }
        }
        tx.commit()?;

        Ok(entries.last().map(|e| e.seq).unwrap_or(0))
    }

    fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }
}

fn entry_kind(entry: &LedgerEntry) -> i64 {
    match entry {
        LedgerEntry::TissueCreated { .. } => 1,
        LedgerEntry::SamplesCreated { .. } => 2,
        LedgerEntry::LabwareCreated { .. } => 3,
        LedgerEntry::SlotsUpdated { .. } => 4,
        LedgerEntry::FlagsSet { .. } => 5,
        LedgerEntry::OperationRecorded { .. } => 6,
        LedgerEntry::WorkLinked { .. } => 7,
    }
}

fn decode_entry_payload(payload: &[u8]) -> Result<StoredEntry, String> {
    let envelope: StoredEntryEnvelope = serde_json::from_slice(payload)
        .map_err(|e| format!("entry payload decode failed: {e}"))?;
    if envelope.format_version != ENTRY_FORMAT_VERSION {
        return Err(format!(
            "unsupported entry format version: {}",
            envelope.format_version
        ));
    }
    Ok(envelope.stored)
}
