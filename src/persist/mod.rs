pub mod sqlite;

use crate::{op::StoredEntry, types::EntrySeq};

#[derive(Debug)]
pub enum PersistError {
    Sqlite(rusqlite::Error),
    Serde(serde_json::Error),
    Message(String),
}

impl From<rusqlite::Error> for PersistError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<serde_json::Error> for PersistError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

impl From<crate::core::store::StoreError> for PersistError {
    fn from(value: crate::core::store::StoreError) -> Self {
        Self::Message(format!("store error: {value:?}"))
    }
}

pub type PersistResult<T> = Result<T, PersistError>;

/// Append-only ledger sink. Entries are the audit trail and are never
/// deleted or rewritten.
pub trait LedgerSink: Send {
    fn append_entries(&mut self, entries: &[StoredEntry]) -> PersistResult<EntrySeq>;
    fn flush(&mut self) -> PersistResult<()> {
        Ok(())
    }
}
