//! ObjectPool: in-process owner of tuple and code point contents.
//!
//! Values only carry hashes. The pool maps those hashes back to contents for
//! values built in memory (so the store can walk them on save) and for values
//! loaded from the store (so callers can walk them after a get).

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::codec::CodecError;
use crate::hash::ContentHash;
use crate::value::{CodePoint, CodePointRef, Tuple, TupleRef, Value};

/// Interning arena for tuples and code points, keyed by content hash.
#[derive(Debug, Default, Clone)]
pub struct ObjectPool {
    tuples: HashMap<ContentHash, Tuple>,
    code_points: HashMap<ContentHash, CodePoint>,
}

impl ObjectPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tuple from `slots`, intern it, and return a value pointing at it.
    pub fn tuple(&mut self, slots: Vec<Value>) -> Result<Value, CodecError> {
        let tuple = Tuple::new(slots)?;
        Ok(Value::Tuple(self.intern_tuple(tuple)))
    }

    /// Build a code point, intern it, and return a value pointing at it.
    pub fn code_point(
        &mut self,
        op: u8,
        immediate: Option<Value>,
        next: Option<ContentHash>,
    ) -> Value {
        let cp = CodePoint::new(op, immediate, next);
        Value::CodePoint(self.intern_code_point(cp))
    }

    /// Build a straight-line chain of code points from `(op, immediate)`
    /// pairs, in execution order. Returns the entry point, or `None` for an
    /// empty program.
    pub fn code_chain(
        &mut self,
        ops: impl IntoIterator<Item = (u8, Option<Value>)>,
    ) -> Option<CodePointRef> {
        let ops: Vec<_> = ops.into_iter().collect();
        let mut next = None;
        let mut head = None;
        for (op, immediate) in ops.into_iter().rev() {
            let cp = self.intern_code_point(CodePoint::new(op, immediate, next));
            next = Some(cp.hash);
            head = Some(cp);
        }
        head
    }

    /// Intern a tuple. A fully resolved entry is never replaced by one with
    /// unresolved slots.
    pub fn intern_tuple(&mut self, tuple: Tuple) -> TupleRef {
        let r = tuple.to_ref();
        match self.tuples.entry(r.hash) {
            Entry::Occupied(mut e) => {
                if !e.get().is_resolved() || tuple.is_resolved() {
                    e.insert(tuple);
                }
            }
            Entry::Vacant(e) => {
                e.insert(tuple);
            }
        }
        r
    }

    /// Intern a code point, same replacement rule as [`Self::intern_tuple`].
    pub fn intern_code_point(&mut self, cp: CodePoint) -> CodePointRef {
        let r = cp.to_ref();
        match self.code_points.entry(r.hash) {
            Entry::Occupied(mut e) => {
                if !e.get().is_resolved() || cp.is_resolved() {
                    e.insert(cp);
                }
            }
            Entry::Vacant(e) => {
                e.insert(cp);
            }
        }
        r
    }

    pub fn get_tuple(&self, hash: &ContentHash) -> Option<&Tuple> {
        self.tuples.get(hash)
    }

    pub fn get_code_point(&self, hash: &ContentHash) -> Option<&CodePoint> {
        self.code_points.get(hash)
    }

    /// Contents of the tuple a value points at.
    pub fn tuple_of(&self, value: &Value) -> Option<&Tuple> {
        match value {
            Value::Tuple(r) => self.tuples.get(&r.hash),
            _ => None,
        }
    }

    /// Number of interned objects.
    pub fn len(&self) -> usize {
        self.tuples.len() + self.code_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty() && self.code_points.is_empty()
    }

    pub fn clear(&mut self) {
        self.tuples.clear();
        self.code_points.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_interns_once() {
        let mut pool = ObjectPool::new();
        let a = pool.tuple(vec![Value::int(1u64)]).unwrap();
        let b = pool.tuple(vec![Value::int(1u64)]).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_tuple_of_returns_contents() {
        let mut pool = ObjectPool::new();
        let v = pool.tuple(vec![Value::int(4u64), Value::int(2u64)]).unwrap();
        let t = pool.tuple_of(&v).expect("interned");
        assert_eq!(t.arity(), 2);
        assert_eq!(t.get(0), Some(&Value::int(4u64)));
    }

    #[test]
    fn test_resolved_entry_not_downgraded() {
        let mut pool = ObjectPool::new();
        let inner = pool.tuple(vec![Value::int(1u64)]).unwrap();
        let outer = pool.tuple(vec![inner.clone()]).unwrap();

        let shallow = Tuple::new(vec![inner.to_unresolved()]).unwrap();
        pool.intern_tuple(shallow);

        let kept = pool.tuple_of(&outer).unwrap();
        assert!(kept.is_resolved());
    }

    #[test]
    fn test_unresolved_entry_upgraded() {
        let mut pool = ObjectPool::new();
        let inner = Tuple::new(vec![Value::int(1u64)]).unwrap();
        let shallow = Tuple::new(vec![Value::Tuple(inner.to_ref()).to_unresolved()]).unwrap();
        let r = pool.intern_tuple(shallow);
        assert!(!pool.get_tuple(&r.hash).unwrap().is_resolved());

        pool.intern_tuple(Tuple::new(vec![Value::Tuple(inner.to_ref())]).unwrap());
        assert!(pool.get_tuple(&r.hash).unwrap().is_resolved());
    }

    #[test]
    fn test_code_chain_links_in_order() {
        let mut pool = ObjectPool::new();
        let head = pool
            .code_chain([(1, None), (2, Some(Value::int(9u64))), (3, None)])
            .expect("non-empty");

        let first = pool.get_code_point(&head.hash).unwrap();
        assert_eq!(first.op(), 1);
        let second = pool.get_code_point(&first.next().unwrap()).unwrap();
        assert_eq!(second.op(), 2);
        let third = pool.get_code_point(&second.next().unwrap()).unwrap();
        assert_eq!(third.op(), 3);
        assert!(third.next().is_none());
    }

    #[test]
    fn test_empty_chain() {
        let mut pool = ObjectPool::new();
        assert!(pool.code_chain(Vec::new()).is_none());
        assert!(pool.is_empty());
    }
}
