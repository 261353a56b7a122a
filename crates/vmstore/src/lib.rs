//! Content-addressed, reference-counted persistence for VM checkpoints.
//!
//! Machine state is a DAG of tuples and code points. Every node is stored
//! once, keyed by the BLAKE3 hash of its canonical encoding, with a count of
//! the references held on it by parents and named checkpoints. Deleting
//! drops one reference and cascades into children when a count reaches zero.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use vmstore::{ObjectPool, ObjectStore, SledEngine, StoreConfig, Value};
//!
//! // Open the database named by VMSTORE_DB_PATH (default ~/.vmstore/db)
//! let config = StoreConfig::from_env().unwrap();
//! let store = ObjectStore::new(SledEngine::from_config(&config).unwrap());
//!
//! // Build values in a pool, then save them
//! let mut pool = ObjectPool::new();
//! let pair = pool.tuple(vec![Value::int(5u64), Value::int(7u64)]).unwrap();
//! let saved = store.save_value(&pair, &pool).unwrap();
//! println!("stored {} (count {})", saved.hash, saved.reference_count);
//!
//! // Fetch into a fresh pool
//! let mut fresh = ObjectPool::new();
//! let got = store.get_tuple(&saved.hash, &mut fresh).unwrap();
//! assert_eq!(got.tuple.arity(), 2);
//!
//! // Drop the reference again
//! store.delete_tuple(&saved.hash).unwrap();
//! ```
//!
//! # Configuration
//!
//! Environment variables:
//! - `VMSTORE_DB_PATH`: Path of the sled database (default: `~/.vmstore/db`)
//! - `VMSTORE_READONLY`: Set to "true" for read-only mode
//!
//! # Atomicity
//!
//! Every public mutation stages its writes and submits them as one engine
//! batch. A failure at any point, including a rejected batch, leaves the
//! store exactly as it was.
//!
//! The batch only applies if nothing the mutation read has changed since.
//! Otherwise the mutation is rerun, so stores sharing one engine across
//! threads never lose a count update.

pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod gc;
pub mod hash;
pub mod pool;
pub mod record;
pub mod store;
pub mod value;
pub mod verify;

mod writeset;

// Re-exports for convenience
pub use checkpoint::{CheckpointRecord, Component, MachineState, MachineStateRoots, StateResult};
pub use codec::{CodecError, RecordTag};
pub use config::StoreConfig;
pub use engine::{EngineError, KeyValueEngine, MemoryEngine, SledEngine};
pub use error::{StoreError, StoreResult};
pub use gc::DeleteResult;
pub use hash::{ContentHash, HashError};
pub use pool::ObjectPool;
pub use record::StoredRecord;
pub use store::{CodePointResult, ObjectStore, SaveResult, TupleResult, ValueResult};
pub use value::{ChildKind, CodePoint, CodePointRef, Tuple, TupleRef, Unresolved, Value, U256};
pub use verify::{Finding, StoreStats, VerifyReport};
