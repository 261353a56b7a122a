//! Sled-backed engine.
//!
//! One sled tree holds both key namespaces so a single `apply_batch` can
//! cover record writes and the checkpoint record together. Unconditional
//! batches go through `sled::Batch`; conditional ones run as a sled
//! transaction that aborts when a precondition no longer holds.

use std::path::Path;

use sled::transaction::{abort, TransactionError};
use tracing::debug;

use super::{Batch, BatchOp, EngineError, KeyValueEngine};
use crate::config::StoreConfig;

/// Durable engine on top of a sled database.
#[derive(Debug, Clone)]
pub struct SledEngine {
    db: sled::Db,
    flush_on_commit: bool,
}

impl SledEngine {
    /// Open or create a database at `path` with default settings.
    pub fn open(path: &Path) -> Result<Self, EngineError> {
        Self::from_config(&StoreConfig::with_db_path(path))
    }

    /// Open the database described by `config`.
    pub fn from_config(config: &StoreConfig) -> Result<Self, EngineError> {
        let db = sled::Config::new()
            .path(&config.db_path)
            .cache_capacity(config.cache_capacity_bytes)
            .mode(sled::Mode::HighThroughput)
            .open()?;
        debug!("opened sled database at {}", config.db_path.display());

        Ok(Self {
            db,
            flush_on_commit: config.flush_on_commit,
        })
    }

    /// A database that is removed when dropped.
    pub fn temporary() -> Result<Self, EngineError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            db,
            flush_on_commit: false,
        })
    }
}

impl SledEngine {
    fn apply_conditional(&self, batch: &Batch) -> Result<(), EngineError> {
        let result = self.db.transaction(|tx| {
            for (key, expected) in batch.expected() {
                let current = tx.get(key.as_slice())?;
                if current.as_deref() != expected.as_deref() {
                    return abort(());
                }
            }
            for op in batch.ops() {
                match op {
                    BatchOp::Put { key, value } => {
                        tx.insert(key.as_slice(), value.as_slice())?;
                    }
                    BatchOp::Delete { key } => {
                        tx.remove(key.as_slice())?;
                    }
                }
            }
            Ok(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(())) => Err(EngineError::Conflict),
            Err(TransactionError::Storage(e)) => Err(EngineError::Sled(e)),
        }
    }
}

impl KeyValueEngine for SledEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        self.db.remove(key)?;
        Ok(())
    }

    fn apply_batch(&self, batch: Batch) -> Result<(), EngineError> {
        if batch.is_conditional() {
            self.apply_conditional(&batch)?;
        } else {
            let mut sled_batch = sled::Batch::default();
            for op in batch.into_ops() {
                match op {
                    BatchOp::Put { key, value } => sled_batch.insert(key, value),
                    BatchOp::Delete { key } => sled_batch.remove(key),
                }
            }
            self.db.apply_batch(sled_batch)?;
        }

        if self.flush_on_commit {
            self.db.flush()?;
        }
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, EngineError> {
        self.db
            .scan_prefix(prefix)
            .map(|entry| -> Result<_, EngineError> {
                let (k, v) = entry?;
                Ok((k.to_vec(), v.to_vec()))
            })
            .collect()
    }

    fn flush(&self) -> Result<(), EngineError> {
        self.db.flush()?;
        Ok(())
    }
}
