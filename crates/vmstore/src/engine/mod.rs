//! Key-value engine abstraction.
//!
//! The object store only needs point reads, one atomic multi-key write that
//! can be made conditional on what it read, and a prefix scan for tooling. Anything that can provide those can back it:
//! [`MemoryEngine`] for tests, [`SledEngine`] on disk.

mod memory;
mod sled_engine;

use std::sync::Arc;

use thiserror::Error;

pub use memory::MemoryEngine;
pub use sled_engine::SledEngine;

/// Errors surfaced by an engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("sled: {0}")]
    Sled(#[from] sled::Error),

    #[error("injected fault: {0}")]
    Injected(String),

    /// A key a conditional batch depends on changed before it was applied.
    #[error("write conflict")]
    Conflict,
}

/// One write in a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// A set of writes applied all-or-nothing.
///
/// [`Batch::expect`] adds preconditions: the batch is only applied if every
/// expected key still holds the given value (`None` for absent), and fails
/// with [`EngineError::Conflict`] otherwise.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
    expected: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete { key: key.into() });
    }

    pub fn expect(&mut self, key: impl Into<Vec<u8>>, value: Option<Vec<u8>>) {
        self.expected.push((key.into(), value));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_conditional(&self) -> bool {
        !self.expected.is_empty()
    }

    pub fn expected(&self) -> &[(Vec<u8>, Option<Vec<u8>>)] {
        &self.expected
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Trait for key-value backends.
///
/// `apply_batch` must be atomic: after a crash or an error either every op
/// in the batch is visible or none is. The precondition check must be part
/// of the same atomic step. Everything the store mutates goes through it.
pub trait KeyValueEngine: Send + Sync {
    /// Read a key. `Ok(None)` if absent.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError>;

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError>;

    fn delete(&self, key: &[u8]) -> Result<(), EngineError>;

    /// Check `batch`'s preconditions and apply every op, atomically.
    fn apply_batch(&self, batch: Batch) -> Result<(), EngineError>;

    /// All pairs whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, EngineError>;

    /// Make prior writes durable. No-op for volatile engines.
    fn flush(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

impl<E: KeyValueEngine + ?Sized> KeyValueEngine for Arc<E> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        (**self).get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<(), EngineError> {
        (**self).delete(key)
    }

    fn apply_batch(&self, batch: Batch) -> Result<(), EngineError> {
        (**self).apply_batch(batch)
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, EngineError> {
        (**self).scan_prefix(prefix)
    }

    fn flush(&self) -> Result<(), EngineError> {
        (**self).flush()
    }
}
