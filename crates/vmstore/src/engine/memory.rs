//! In-memory engine for tests and scratch stores.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{Batch, BatchOp, EngineError, KeyValueEngine};

/// A `BTreeMap` behind a mutex.
///
/// Batches are checked and applied under a single lock acquisition, which makes them
/// atomic with respect to every other call. [`MemoryEngine::fail_next_batches`]
/// makes the next batches fail before touching the map, for exercising abort
/// paths.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    map: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
    fail_batches: AtomicUsize,
    batches_applied: AtomicUsize,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls to `apply_batch` fail without effect.
    pub fn fail_next_batches(&self, n: usize) {
        self.fail_batches.store(n, Ordering::SeqCst);
    }

    /// Number of batches successfully applied so far.
    pub fn batches_applied(&self) -> usize {
        self.batches_applied.load(Ordering::SeqCst)
    }

    /// Copy of the whole keyspace.
    pub fn snapshot(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>> {
        // a panic while holding the lock cannot leave a half-applied batch
        self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueEngine for MemoryEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        Ok(self.lock().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        self.lock().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        self.lock().remove(key);
        Ok(())
    }

    fn apply_batch(&self, batch: Batch) -> Result<(), EngineError> {
        let pending = self.fail_batches.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_batches.store(pending - 1, Ordering::SeqCst);
            return Err(EngineError::Injected(format!(
                "batch of {} ops rejected",
                batch.len()
            )));
        }

        let mut map = self.lock();
        for (key, expected) in batch.expected() {
            if map.get(key) != expected.as_ref() {
                return Err(EngineError::Conflict);
            }
        }
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    map.remove(&key);
                }
            }
        }
        self.batches_applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, EngineError> {
        Ok(self
            .lock()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}
