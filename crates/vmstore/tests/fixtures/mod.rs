//! Shared setup for store integration tests.

#![allow(dead_code)]

use vmstore::record::{object_key, StoredRecord};
use vmstore::{
    ContentHash, KeyValueEngine, MachineState, MemoryEngine, ObjectPool, ObjectStore, Tuple,
    Value,
};

pub struct TestFixture {
    pub store: ObjectStore<MemoryEngine>,
    pub pool: ObjectPool,
}

impl TestFixture {
    pub fn new() -> Self {
        Self {
            store: ObjectStore::new(MemoryEngine::new()),
            pool: ObjectPool::new(),
        }
    }

    pub fn pair(&mut self, a: u64, b: u64) -> Value {
        self.pool
            .tuple(vec![Value::int(a), Value::int(b)])
            .expect("two slots fit")
    }

    pub fn state(&mut self, data_stack: Tuple, seed: u64) -> MachineState {
        machine_state(&mut self.pool, data_stack, seed)
    }

    /// Entries in the object namespace only.
    pub fn objects(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.store
            .engine()
            .snapshot()
            .into_iter()
            .filter(|(key, _)| key.starts_with(vmstore::record::OBJECT_PREFIX))
            .collect()
    }
}

/// A small but complete machine: a shared inbox message, a four-step
/// program, and the given data stack.
pub fn machine_state(pool: &mut ObjectPool, data_stack: Tuple, seed: u64) -> MachineState {
    let message = pool
        .tuple(vec![Value::int(seed), Value::int(seed * 2 + 1)])
        .expect("two slots fit");
    let pc = pool
        .code_chain((0..4u8).map(|op| (op, Some(Value::int(seed + u64::from(op))))))
        .expect("non-empty program");

    MachineState {
        static_val: pool
            .tuple(vec![Value::int(0xfeedu64), message.clone()])
            .expect("two slots fit"),
        register_val: Value::int(seed),
        data_stack,
        aux_stack: Tuple::empty(),
        inbox: Tuple::new(vec![message]).expect("one slot fits"),
        inbox_count: Value::int(1u64),
        pending_inbox: Tuple::empty(),
        pending_count: Value::int(0u64),
        pc: pool
            .get_code_point(&pc.hash)
            .expect("interned by code_chain")
            .clone(),
        status: 0,
        block_reason: Vec::new(),
        balance_tracker: seed.to_be_bytes().to_vec(),
    }
}

/// Overwrite the stored count of `hash`, bypassing the store.
pub fn force_count<E: KeyValueEngine>(store: &ObjectStore<E>, hash: &ContentHash, count: u32) {
    let key = object_key(hash);
    let bytes = store.engine().get(&key).unwrap().expect("record exists");
    let mut record = StoredRecord::from_bytes(hash, &bytes).unwrap();
    record.reference_count = count;
    store.engine().put(&key, &record.to_bytes().unwrap()).unwrap();
}
