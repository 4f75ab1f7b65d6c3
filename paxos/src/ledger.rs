use std::path::Path;

use rocksdb::{WriteBatch, DB};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Failure talking to the durable store. Any ledger failure must abort
/// the surrounding promise/accept instead of acknowledging unpersisted
/// state.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The underlying storage failed.
    #[error("ledger storage: {0}")]
    Storage(#[from] rocksdb::Error),
    /// A record could not be encoded or decoded.
    #[error("ledger codec: {0}")]
    Codec(#[from] bincode::Error),
}

/// Crash-recoverable record store backing acceptors, learners and the
/// proposer's round counter. One database per directory; records are
/// written before the owning role replies, and reloaded on restart.
pub struct Ledger {
    db: DB,
}

impl Ledger {
    /// Open (or create) the ledger at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        Ok(Self {
            db: DB::open_default(path)?,
        })
    }

    /// Read and decode the record at `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, LedgerError> {
        match self.db.get(key)? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// Encode and durably write a single record.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<(), LedgerError> {
        Ok(self.db.put(key, bincode::serialize(value)?)?)
    }

    /// Atomically write a batch of records.
    pub fn write(&self, batch: Batch) -> Result<(), LedgerError> {
        Ok(self.db.write(batch.0)?)
    }
}

/// A multi-record write applied atomically.
#[derive(Default)]
pub struct Batch(WriteBatch);

impl Batch {
    /// Queue one record.
    pub fn put<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), LedgerError> {
        self.0.put(key, bincode::serialize(value)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger");
        {
            let ledger = Ledger::open(&path).unwrap();
            ledger.put("k", &42u64).unwrap();
        }
        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.get::<u64>("k").unwrap(), Some(42));
        assert_eq!(ledger.get::<u64>("missing").unwrap(), None);
    }

    #[test]
    fn batch_lands_as_one_write() {
        let dir = TempDir::new().unwrap();
        let ledger = Ledger::open(dir.path().join("ledger")).unwrap();
        let mut batch = Batch::default();
        batch.put("a", &1u32).unwrap();
        batch.put("b", &2u32).unwrap();
        ledger.write(batch).unwrap();
        assert_eq!(ledger.get::<u32>("a").unwrap(), Some(1));
        assert_eq!(ledger.get::<u32>("b").unwrap(), Some(2));
    }
}
