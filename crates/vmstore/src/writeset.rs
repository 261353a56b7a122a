//! Per-operation write overlay.
//!
//! Every public mutation runs against a `WriteSet`: reads fall through to the
//! engine unless the key was already written in this operation, and nothing
//! reaches the engine until `commit`, which submits one batch. Dropping the
//! set discards everything.
//!
//! The first engine read of each key is remembered, and the batch is made
//! conditional on those keys being unchanged. A concurrent writer that
//! committed in between turns the commit into [`EngineError::Conflict`].

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use crate::engine::{Batch, EngineError, KeyValueEngine};

pub(crate) struct WriteSet<'a, E: ?Sized> {
    engine: &'a E,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    observed: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a, E: KeyValueEngine + ?Sized> WriteSet<'a, E> {
    pub(crate) fn new(engine: &'a E) -> Self {
        Self {
            engine,
            pending: BTreeMap::new(),
            observed: BTreeMap::new(),
        }
    }

    pub(crate) fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        if let Some(staged) = self.pending.get(key) {
            return Ok(staged.clone());
        }
        match self.observed.entry(key.to_vec()) {
            Entry::Occupied(seen) => Ok(seen.get().clone()),
            Entry::Vacant(slot) => Ok(slot.insert(self.engine.get(key)?).clone()),
        }
    }

    pub(crate) fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending.insert(key, Some(value));
    }

    pub(crate) fn delete(&mut self, key: Vec<u8>) {
        self.pending.insert(key, None);
    }

    /// Submit everything as one batch. Returns the number of keys touched.
    pub(crate) fn commit(self) -> Result<usize, EngineError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let touched = self.pending.len();
        let mut batch = Batch::new();
        for (key, seen) in self.observed {
            batch.expect(key, seen);
        }
        for (key, staged) in self.pending {
            match staged {
                Some(value) => batch.put(key, value),
                None => batch.delete(key),
            }
        }
        self.engine.apply_batch(batch)?;
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;

    #[test]
    fn test_reads_see_own_writes() {
        let engine = MemoryEngine::new();
        engine.put(b"a", b"old").unwrap();

        let mut ws = WriteSet::new(&engine);
        ws.put(b"a".to_vec(), b"new".to_vec());
        ws.delete(b"b".to_vec());
        assert_eq!(ws.get(b"a").unwrap(), Some(b"new".to_vec()));
        assert_eq!(ws.get(b"b").unwrap(), None);

        // nothing visible until commit
        assert_eq!(engine.get(b"a").unwrap(), Some(b"old".to_vec()));
        assert_eq!(ws.commit().unwrap(), 2);
        assert_eq!(engine.get(b"a").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn test_drop_discards() {
        let engine = MemoryEngine::new();
        {
            let mut ws = WriteSet::new(&engine);
            ws.put(b"a".to_vec(), b"1".to_vec());
            assert_eq!(ws.get(b"a").unwrap(), Some(b"1".to_vec()));
        }
        assert!(engine.is_empty());
        assert_eq!(engine.batches_applied(), 0);
    }

    #[test]
    fn test_commit_fails_if_a_read_went_stale() {
        let engine = MemoryEngine::new();
        engine.put(b"count", b"1").unwrap();

        let mut ws = WriteSet::new(&engine);
        assert_eq!(ws.get(b"count").unwrap(), Some(b"1".to_vec()));
        ws.put(b"count".to_vec(), b"2".to_vec());

        engine.put(b"count", b"7").unwrap();
        assert!(matches!(ws.commit(), Err(EngineError::Conflict)));
        assert_eq!(engine.get(b"count").unwrap(), Some(b"7".to_vec()));
    }

    #[test]
    fn test_repeated_reads_see_first_observation() {
        let engine = MemoryEngine::new();
        let mut ws = WriteSet::new(&engine);
        assert_eq!(ws.get(b"k").unwrap(), None);

        engine.put(b"k", b"late").unwrap();
        assert_eq!(ws.get(b"k").unwrap(), None);
        ws.put(b"other".to_vec(), b"x".to_vec());
        assert!(matches!(ws.commit(), Err(EngineError::Conflict)));
    }

    #[test]
    fn test_empty_commit_skips_engine() {
        let engine = MemoryEngine::new();
        assert_eq!(WriteSet::new(&engine).commit().unwrap(), 0);
        assert_eq!(engine.batches_applied(), 0);
    }
}
