//! Error taxonomy for store operations.
//!
//! None of these are retried internally; only an engine write conflict is,
//! and it never surfaces here. Every variant aborts the operation that
//! raised it with no partial effect, because nothing is written until the
//! operation's batch commits.

use thiserror::Error;

use crate::codec::{CodecError, RecordTag};
use crate::engine::EngineError;
use crate::hash::ContentHash;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The engine failed a read or rejected a batch.
    #[error("storage fault: {0}")]
    StorageFault(#[from] EngineError),

    /// No record under this hash, or no checkpoint under this name.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored record could not be decoded for its declared tag, does not
    /// hash to its key, or carries a reference count of zero.
    #[error("corrupt record {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    /// Decrement of a record that is absent or already at zero. This is an
    /// accounting bug upstream, never clamped.
    #[error("reference count underflow on {0}")]
    RefcountUnderflow(ContentHash),

    #[error("reference count overflow on {0}")]
    RefcountOverflow(ContentHash),

    /// An unresolved marker reached a write path.
    #[error("refusing to store unresolved value {0}")]
    UnresolvedValue(ContentHash),

    /// A reference being saved is neither stored nor present in the pool.
    #[error("{0} is not in the store or the object pool")]
    NotInPool(ContentHash),

    #[error("{hash} is a {found}, expected a {expected}")]
    TypeMismatch {
        hash: ContentHash,
        expected: RecordTag,
        found: RecordTag,
    },

    #[error("store is in read-only mode")]
    ReadOnly,

    #[error("codec: {0}")]
    Codec(#[from] CodecError),
}

impl StoreError {
    pub(crate) fn corrupt(key: impl ToString, reason: impl ToString) -> Self {
        StoreError::CorruptRecord {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// True for errors that point at a bug or damaged data rather than a
    /// bad request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::CorruptRecord { .. } | StoreError::RefcountUnderflow(_)
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
