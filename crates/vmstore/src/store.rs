//! ObjectStore: content-addressed, reference-counted records over a
//! [`KeyValueEngine`].
//!
//! Save is post-order: children are written (or have their count bumped)
//! before the parent that names them, so a committed record never points at
//! a missing hash. A dedup hit only bumps the hit record; its children are
//! already owned by it. Get is pre-order: the record is read, then embedded
//! references are faulted in and interned into the caller's [`ObjectPool`].
//! Both walk the graph off an explicit stack. A data stack is a tuple nested
//! as deep as it is long, and a program is one long code chain.
//!
//! Each public call runs in one [`WriteSet`] and commits as one batch. If
//! another writer changed a record the call read, the batch is rejected and
//! the call runs again from the start.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{self, RecordBody, RecordTag};
use crate::engine::{EngineError, KeyValueEngine};
use crate::error::{StoreError, StoreResult};
use crate::hash::ContentHash;
use crate::pool::ObjectPool;
use crate::record::{object_key, StoredRecord};
use crate::value::{ChildKind, CodePoint, Tuple, Value};
use crate::writeset::WriteSet;

/// Outcome of a save: where the record lives and its count afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResult {
    pub hash: ContentHash,
    pub reference_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueResult {
    pub reference_count: u32,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleResult {
    pub reference_count: u32,
    pub tuple: Tuple,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePointResult {
    pub reference_count: u32,
    pub code_point: CodePoint,
}

/// Content-addressed record store.
#[derive(Debug)]
pub struct ObjectStore<E> {
    engine: E,
    read_only: bool,
}

impl<E: KeyValueEngine> ObjectStore<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            read_only: false,
        }
    }

    /// A store that rejects every mutation with [`StoreError::ReadOnly`].
    pub fn read_only(engine: E) -> Self {
        Self {
            engine,
            read_only: true,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Make every committed batch durable.
    pub fn flush(&self) -> StoreResult<()> {
        Ok(self.engine.flush()?)
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Run `op` against a fresh write set and commit it, retrying from
    /// scratch on [`EngineError::Conflict`].
    pub(crate) fn atomically<T>(
        &self,
        mut op: impl FnMut(&mut WriteSet<'_, E>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let mut attempt = 1u32;
        loop {
            let mut ws = WriteSet::new(&self.engine);
            let out = op(&mut ws)?;
            match ws.commit() {
                Ok(touched) => {
                    if touched > 0 {
                        debug!("committed batch touching {} keys", touched);
                    }
                    return Ok(out);
                }
                Err(EngineError::Conflict) => {
                    debug!("write conflict on attempt {}, retrying", attempt);
                    attempt = attempt.saturating_add(1);
                    std::thread::yield_now();
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Save a value, returning its hash and reference count.
    ///
    /// Integers become standalone records. References are expanded through
    /// `pool` unless the store already holds them.
    pub fn save_value(&self, value: &Value, pool: &ObjectPool) -> StoreResult<SaveResult> {
        self.atomically(|ws| self.save_value_in(ws, value, pool))
    }

    pub fn save_tuple(&self, tuple: &Tuple, pool: &ObjectPool) -> StoreResult<SaveResult> {
        self.atomically(|ws| self.save_tuple_in(ws, tuple, pool))
    }

    pub fn save_code_point(&self, cp: &CodePoint, pool: &ObjectPool) -> StoreResult<SaveResult> {
        self.atomically(|ws| self.save_code_point_in(ws, cp, pool))
    }

    pub(crate) fn save_value_in(
        &self,
        ws: &mut WriteSet<'_, E>,
        value: &Value,
        pool: &ObjectPool,
    ) -> StoreResult<SaveResult> {
        match value {
            Value::Int(n) => {
                let hash = value.hash();
                if let Some(saved) = self.increment_in(ws, &hash)? {
                    return Ok(saved);
                }
                self.insert_in(ws, hash, RecordTag::Int, n.as_be_bytes().to_vec())
            }
            Value::Tuple(r) => {
                if let Some(saved) = self.increment_in(ws, &r.hash)? {
                    return Ok(saved);
                }
                let tuple = pool.get_tuple(&r.hash).ok_or(StoreError::NotInPool(r.hash))?;
                self.write_absent_in(ws, Node::Tuple(tuple), pool)
            }
            Value::CodePoint(r) => {
                if let Some(saved) = self.increment_in(ws, &r.hash)? {
                    return Ok(saved);
                }
                let cp = pool
                    .get_code_point(&r.hash)
                    .ok_or(StoreError::NotInPool(r.hash))?;
                self.write_absent_in(ws, Node::CodePoint(cp), pool)
            }
            Value::Unresolved(u) => Err(StoreError::UnresolvedValue(u.hash)),
        }
    }

    pub(crate) fn save_tuple_in(
        &self,
        ws: &mut WriteSet<'_, E>,
        tuple: &Tuple,
        pool: &ObjectPool,
    ) -> StoreResult<SaveResult> {
        if let Some(saved) = self.increment_in(ws, &tuple.hash())? {
            return Ok(saved);
        }
        self.write_absent_in(ws, Node::Tuple(tuple), pool)
    }

    pub(crate) fn save_code_point_in(
        &self,
        ws: &mut WriteSet<'_, E>,
        cp: &CodePoint,
        pool: &ObjectPool,
    ) -> StoreResult<SaveResult> {
        if let Some(saved) = self.increment_in(ws, &cp.hash())? {
            return Ok(saved);
        }
        self.write_absent_in(ws, Node::CodePoint(cp), pool)
    }

    /// Write `root`, known to be absent, together with every descendant
    /// that is also absent.
    ///
    /// Each frame on `stack` is a record waiting for its remaining children.
    /// A child that is already stored only has its count bumped; an absent
    /// one gets its own frame. A record is inserted once its last child is
    /// done.
    fn write_absent_in<'p>(
        &self,
        ws: &mut WriteSet<'_, E>,
        root: Node<'p>,
        pool: &'p ObjectPool,
    ) -> StoreResult<SaveResult> {
        let mut stack = vec![Frame::new(root)];
        let mut saved = None;

        while let Some(top) = stack.last_mut() {
            if let Some(child) = top.children.pop() {
                if let Some(node) = self.open_child_in(ws, child, pool)? {
                    stack.push(Frame::new(node));
                }
                continue;
            }
            let node = top.node;
            stack.pop();
            saved = Some(self.insert_in(ws, node.hash(), node.tag(), node.payload())?);
        }
        // the root frame is always the last one inserted
        saved.ok_or_else(|| StoreError::NotInPool(root.hash()))
    }

    /// Bump a stored child, or hand back the pool entry to write.
    fn open_child_in<'p>(
        &self,
        ws: &mut WriteSet<'_, E>,
        child: Child<'p>,
        pool: &'p ObjectPool,
    ) -> StoreResult<Option<Node<'p>>> {
        let (hash, tag) = match child {
            Child::Slot(Value::Unresolved(u)) => return Err(StoreError::UnresolvedValue(u.hash)),
            Child::Slot(Value::Tuple(r)) => (r.hash, RecordTag::Tuple),
            Child::Slot(Value::CodePoint(r)) => (r.hash, RecordTag::CodePoint),
            // inline, never a child record
            Child::Slot(Value::Int(_)) => return Ok(None),
            Child::Next(hash) => (hash, RecordTag::CodePoint),
        };
        if self.increment_in(ws, &hash)?.is_some() {
            return Ok(None);
        }
        let node = match tag {
            RecordTag::Tuple => pool.get_tuple(&hash).map(Node::Tuple),
            _ => pool.get_code_point(&hash).map(Node::CodePoint),
        };
        node.map(Some).ok_or(StoreError::NotInPool(hash))
    }

    fn increment_in(
        &self,
        ws: &mut WriteSet<'_, E>,
        hash: &ContentHash,
    ) -> StoreResult<Option<SaveResult>> {
        let Some(mut record) = self.read_record_in(ws, hash)? else {
            return Ok(None);
        };
        if record.reference_count == 0 {
            return Err(StoreError::corrupt(hash, "stored with reference count 0"));
        }
        record.reference_count = record
            .reference_count
            .checked_add(1)
            .ok_or(StoreError::RefcountOverflow(*hash))?;
        ws.put(object_key(hash), record.to_bytes()?);
        debug!("dedup hit {} -> {}", hash.short(), record.reference_count);

        Ok(Some(SaveResult {
            hash: *hash,
            reference_count: record.reference_count,
        }))
    }

    fn insert_in(
        &self,
        ws: &mut WriteSet<'_, E>,
        hash: ContentHash,
        tag: RecordTag,
        payload: Vec<u8>,
    ) -> StoreResult<SaveResult> {
        let record = StoredRecord::new(tag, payload);
        ws.put(object_key(&hash), record.to_bytes()?);
        debug!("stored {} {}", tag, hash.short());

        Ok(SaveResult {
            hash,
            reference_count: record.reference_count,
        })
    }

    pub(crate) fn read_record_in(
        &self,
        ws: &mut WriteSet<'_, E>,
        hash: &ContentHash,
    ) -> StoreResult<Option<StoredRecord>> {
        match ws.get(&object_key(hash))? {
            Some(bytes) => Ok(Some(StoredRecord::from_bytes(hash, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Read a committed record. Absent is `NotFound`; a zero count is
    /// corruption.
    pub(crate) fn load_record(&self, hash: &ContentHash) -> StoreResult<StoredRecord> {
        let bytes = self
            .engine
            .get(&object_key(hash))?
            .ok_or_else(|| StoreError::NotFound(hash.to_string()))?;
        let record = StoredRecord::from_bytes(hash, &bytes)?;
        if record.reference_count == 0 {
            return Err(StoreError::corrupt(hash, "stored with reference count 0"));
        }
        Ok(record)
    }

    /// Like [`Self::load_record`], for a hash named by a parent record: a
    /// missing child means the graph is damaged, not that the caller asked
    /// for something absent.
    fn load_child(&self, hash: &ContentHash) -> StoreResult<StoredRecord> {
        self.load_record(hash).map_err(|e| match e {
            StoreError::NotFound(_) => StoreError::corrupt(hash, "dangling child reference"),
            other => other,
        })
    }

    /// Fetch a value and everything below it.
    pub fn get_value(&self, hash: &ContentHash, pool: &mut ObjectPool) -> StoreResult<ValueResult> {
        let record = self.load_record(hash)?;
        let mut pending = Vec::new();
        let value = match record.body(hash)? {
            RecordBody::Int(n) => Value::Int(n),
            RecordBody::Tuple(t) => Value::Tuple(resolve_tuple(t, pool, &mut pending)?.to_ref()),
            RecordBody::CodePoint(cp) => {
                Value::CodePoint(resolve_code_point(cp, pool, &mut pending).to_ref())
            }
        };
        self.resolve_children(hash, pending, pool)?;
        Ok(ValueResult {
            reference_count: record.reference_count,
            value,
        })
    }

    /// Fetch a tuple and everything below it.
    pub fn get_tuple(&self, hash: &ContentHash, pool: &mut ObjectPool) -> StoreResult<TupleResult> {
        let record = self.load_record(hash)?;
        let tuple = match record.body(hash)? {
            RecordBody::Tuple(t) => t,
            other => return Err(mismatch(hash, RecordTag::Tuple, &other)),
        };
        let mut pending = Vec::new();
        let tuple = resolve_tuple(tuple, pool, &mut pending)?;
        self.resolve_children(hash, pending, pool)?;
        Ok(TupleResult {
            reference_count: record.reference_count,
            tuple,
        })
    }

    /// Fetch a code point and the rest of its chain.
    pub fn get_code_point(
        &self,
        hash: &ContentHash,
        pool: &mut ObjectPool,
    ) -> StoreResult<CodePointResult> {
        let record = self.load_record(hash)?;
        let cp = match record.body(hash)? {
            RecordBody::CodePoint(cp) => cp,
            other => return Err(mismatch(hash, RecordTag::CodePoint, &other)),
        };
        let mut pending = Vec::new();
        let code_point = resolve_code_point(cp, pool, &mut pending);
        self.resolve_children(hash, pending, pool)?;
        Ok(CodePointResult {
            reference_count: record.reference_count,
            code_point,
        })
    }

    /// Fetch only the top level of a tuple. Embedded references come back as
    /// [`Value::Unresolved`]; use [`Self::resolve`] to fault them in.
    pub fn get_tuple_shallow(&self, hash: &ContentHash) -> StoreResult<TupleResult> {
        let record = self.load_record(hash)?;
        match record.body(hash)? {
            RecordBody::Tuple(tuple) => Ok(TupleResult {
                reference_count: record.reference_count,
                tuple,
            }),
            other => Err(mismatch(hash, RecordTag::Tuple, &other)),
        }
    }

    /// Fault in one unresolved value, one level deep. Anything else is
    /// returned unchanged.
    pub fn resolve(&self, value: &Value, pool: &mut ObjectPool) -> StoreResult<Value> {
        let Value::Unresolved(u) = value else {
            return Ok(value.clone());
        };
        let record = self.load_record(&u.hash)?;
        match (u.kind, record.body(&u.hash)?) {
            (ChildKind::Tuple { .. }, RecordBody::Tuple(t)) => Ok(Value::Tuple(pool.intern_tuple(t))),
            (ChildKind::CodePoint { .. }, RecordBody::CodePoint(cp)) => {
                Ok(Value::CodePoint(pool.intern_code_point(cp)))
            }
            (kind, other) => Err(mismatch(&u.hash, kind.tag(), &other)),
        }
    }

    pub fn contains(&self, hash: &ContentHash) -> StoreResult<bool> {
        Ok(self.engine.get(&object_key(hash))?.is_some())
    }

    /// Current count of a record, `None` if absent.
    pub fn reference_count(&self, hash: &ContentHash) -> StoreResult<Option<u32>> {
        match self.engine.get(&object_key(hash))? {
            Some(bytes) => Ok(Some(StoredRecord::from_bytes(hash, &bytes)?.reference_count)),
            None => Ok(None),
        }
    }

    /// Fetch and intern everything below a root whose own children are in
    /// `pending`. Each record is fetched once per call.
    fn resolve_children(
        &self,
        root: &ContentHash,
        mut pending: Vec<(ContentHash, RecordTag)>,
        pool: &mut ObjectPool,
    ) -> StoreResult<()> {
        let mut seen = HashSet::from([*root]);
        while let Some((hash, tag)) = pending.pop() {
            // shared subtrees
            if !seen.insert(hash) {
                continue;
            }
            let record = self.load_child(&hash)?;
            match (tag, record.body(&hash)?) {
                (RecordTag::Tuple, RecordBody::Tuple(t)) => {
                    resolve_tuple(t, pool, &mut pending)?;
                }
                (RecordTag::CodePoint, RecordBody::CodePoint(cp)) => {
                    resolve_code_point(cp, pool, &mut pending);
                }
                (tag, other) => return Err(mismatch(&hash, tag, &other)),
            }
        }
        Ok(())
    }
}

/// A record being written by [`ObjectStore::write_absent_in`].
#[derive(Clone, Copy)]
enum Node<'p> {
    Tuple(&'p Tuple),
    CodePoint(&'p CodePoint),
}

impl<'p> Node<'p> {
    fn hash(&self) -> ContentHash {
        match self {
            Node::Tuple(t) => t.hash(),
            Node::CodePoint(cp) => cp.hash(),
        }
    }

    fn tag(&self) -> RecordTag {
        match self {
            Node::Tuple(_) => RecordTag::Tuple,
            Node::CodePoint(_) => RecordTag::CodePoint,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Node::Tuple(t) => codec::encode_tuple(t.slots()),
            Node::CodePoint(cp) => {
                codec::encode_code_point(cp.op(), cp.immediate(), cp.next().as_ref())
            }
        }
    }

    /// Child references in save order. Inline integers are not children.
    fn children(&self) -> Vec<Child<'p>> {
        match *self {
            Node::Tuple(t) => t
                .slots()
                .iter()
                .filter(|slot| slot.as_int().is_none())
                .map(Child::Slot)
                .collect(),
            Node::CodePoint(cp) => cp
                .immediate()
                .filter(|imm| imm.as_int().is_none())
                .map(Child::Slot)
                .into_iter()
                .chain(cp.next().map(Child::Next))
                .collect(),
        }
    }
}

#[derive(Clone, Copy)]
enum Child<'p> {
    Slot(&'p Value),
    Next(ContentHash),
}

struct Frame<'p> {
    node: Node<'p>,
    /// Remaining children, last to be visited first.
    children: Vec<Child<'p>>,
}

impl<'p> Frame<'p> {
    fn new(node: Node<'p>) -> Self {
        let mut children = node.children();
        children.reverse();
        Self { node, children }
    }
}

/// Swap a decoded tuple's unresolved markers for references, intern it, and
/// queue its children.
fn resolve_tuple(
    tuple: Tuple,
    pool: &mut ObjectPool,
    pending: &mut Vec<(ContentHash, RecordTag)>,
) -> StoreResult<Tuple> {
    let hash = tuple.hash();
    let slots: Vec<Value> = tuple.into_slots().into_iter().map(into_resolved).collect();
    pending.extend(
        slots
            .iter()
            .rev()
            .filter_map(Value::child)
            .map(|(child, kind)| (child, kind.tag())),
    );
    let resolved = Tuple::new(slots)?;
    debug_assert_eq!(resolved.hash(), hash, "resolution must not change identity");

    pool.intern_tuple(resolved.clone());
    Ok(resolved)
}

fn resolve_code_point(
    cp: CodePoint,
    pool: &mut ObjectPool,
    pending: &mut Vec<(ContentHash, RecordTag)>,
) -> CodePoint {
    let marker = cp.immediate().filter(|imm| imm.is_unresolved()).cloned();
    let resolved = match marker {
        Some(imm) => cp.with_immediate(Some(into_resolved(imm))),
        None => cp,
    };
    if let Some(next) = resolved.next() {
        pending.push((next, RecordTag::CodePoint));
    }
    if let Some((child, kind)) = resolved.immediate().and_then(Value::child) {
        pending.push((child, kind.tag()));
    }
    pool.intern_code_point(resolved.clone());
    resolved
}

fn into_resolved(value: Value) -> Value {
    match value {
        Value::Unresolved(u) => Value::from_child(u.hash, u.kind),
        other => other,
    }
}

fn mismatch(hash: &ContentHash, expected: RecordTag, found: &RecordBody) -> StoreError {
    StoreError::TypeMismatch {
        hash: *hash,
        expected,
        found: found.tag(),
    }
}
