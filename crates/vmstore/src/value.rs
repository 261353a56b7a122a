//! The VM value model: integers inline, everything else by content hash.
//!
//! Tuples and code points are never nested by pointer. A `Value` that refers
//! to one carries the child's hash plus the small amount of metadata the codec
//! needs (arity or op id); the contents live in an [`ObjectPool`] or in the
//! store and are looked up explicitly.
//!
//! [`ObjectPool`]: crate::pool::ObjectPool

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError, RecordTag};
use crate::hash::ContentHash;

/// Maximum number of slots in a tuple.
pub const MAX_TUPLE_SIZE: usize = 8;

/// A 256-bit unsigned magnitude, stored big-endian.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct U256([u8; 32]);

impl U256 {
    pub const ZERO: Self = Self([0; 32]);
    pub const MAX: Self = Self([0xff; 32]);

    pub const fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn to_be_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn as_be_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The value as a `u64`, if it fits.
    pub fn to_u64(&self) -> Option<u64> {
        if self.0[..24].iter().any(|&b| b != 0) {
            return None;
        }
        let mut low = [0u8; 8];
        low.copy_from_slice(&self.0[24..]);
        Some(u64::from_be_bytes(low))
    }
}

impl From<u64> for U256 {
    fn from(n: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&n.to_be_bytes());
        Self(bytes)
    }
}

impl From<u128> for U256 {
    fn from(n: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&n.to_be_bytes());
        Self(bytes)
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_u64() {
            Some(n) => write!(f, "{}", n),
            None => write!(f, "0x{}", hex::encode(self.0)),
        }
    }
}

impl fmt::Debug for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U256({})", self)
    }
}

/// Handle to a tuple by content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TupleRef {
    pub hash: ContentHash,
    pub arity: u8,
}

/// Handle to a code point by content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodePointRef {
    pub hash: ContentHash,
    pub op: u8,
}

/// What an unresolved child turns into once it is faulted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildKind {
    Tuple { arity: u8 },
    CodePoint { op: u8 },
}

impl ChildKind {
    pub fn tag(&self) -> RecordTag {
        match self {
            ChildKind::Tuple { .. } => RecordTag::Tuple,
            ChildKind::CodePoint { .. } => RecordTag::CodePoint,
        }
    }
}

/// A child reference that has not been loaded yet.
///
/// Encodes and hashes exactly like the resolved reference it stands for, but
/// the store refuses to write it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Unresolved {
    pub hash: ContentHash,
    pub kind: ChildKind,
}

/// A VM value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Int(U256),
    Tuple(TupleRef),
    CodePoint(CodePointRef),
    Unresolved(Unresolved),
}

impl Value {
    pub fn int(n: impl Into<U256>) -> Self {
        Value::Int(n.into())
    }

    /// Content hash of this value as a standalone record.
    ///
    /// Integers hash their own encoding; references return the child's hash.
    pub fn hash(&self) -> ContentHash {
        match self {
            Value::Int(n) => codec::content_hash(RecordTag::Int, n.as_be_bytes()),
            Value::Tuple(r) => r.hash,
            Value::CodePoint(r) => r.hash,
            Value::Unresolved(u) => u.hash,
        }
    }

    /// The child this value points at, if it is not an inline integer.
    pub fn child(&self) -> Option<(ContentHash, ChildKind)> {
        match self {
            Value::Int(_) => None,
            Value::Tuple(r) => Some((r.hash, ChildKind::Tuple { arity: r.arity })),
            Value::CodePoint(r) => Some((r.hash, ChildKind::CodePoint { op: r.op })),
            Value::Unresolved(u) => Some((u.hash, u.kind)),
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, Value::Unresolved(_))
    }

    /// Replace a resolved reference with an unresolved marker.
    pub fn to_unresolved(&self) -> Value {
        match self.child() {
            Some((hash, kind)) => Value::Unresolved(Unresolved { hash, kind }),
            None => self.clone(),
        }
    }

    pub fn as_int(&self) -> Option<&U256> {
        match self {
            Value::Int(n) => Some(n),
            _ => None,
        }
    }

    pub(crate) fn from_child(hash: ContentHash, kind: ChildKind) -> Value {
        match kind {
            ChildKind::Tuple { arity } => Value::Tuple(TupleRef { hash, arity }),
            ChildKind::CodePoint { op } => Value::CodePoint(CodePointRef { hash, op }),
        }
    }
}

impl From<U256> for Value {
    fn from(n: U256) -> Self {
        Value::Int(n)
    }
}

impl From<TupleRef> for Value {
    fn from(r: TupleRef) -> Self {
        Value::Tuple(r)
    }
}

impl From<CodePointRef> for Value {
    fn from(r: CodePointRef) -> Self {
        Value::CodePoint(r)
    }
}

/// An ordered sequence of 0 to 8 values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    slots: Vec<Value>,
    hash: ContentHash,
}

impl Tuple {
    pub fn new(slots: Vec<Value>) -> Result<Self, CodecError> {
        if slots.len() > MAX_TUPLE_SIZE {
            return Err(CodecError::TooManySlots(slots.len()));
        }
        let hash = codec::content_hash(RecordTag::Tuple, &codec::encode_tuple(&slots));
        Ok(Self { slots, hash })
    }

    pub fn empty() -> Self {
        Self {
            slots: Vec::new(),
            hash: codec::content_hash(RecordTag::Tuple, &codec::encode_tuple(&[])),
        }
    }

    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    pub fn arity(&self) -> u8 {
        // bounded by MAX_TUPLE_SIZE at construction
        self.slots.len() as u8
    }

    pub fn slots(&self) -> &[Value] {
        &self.slots
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.slots.get(index)
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn to_ref(&self) -> TupleRef {
        TupleRef {
            hash: self.hash,
            arity: self.arity(),
        }
    }

    /// True when no slot is an unresolved marker.
    pub fn is_resolved(&self) -> bool {
        !self.slots.iter().any(Value::is_unresolved)
    }

    pub(crate) fn into_slots(self) -> Vec<Value> {
        self.slots
    }
}

/// One instruction location in a content-addressed instruction chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePoint {
    op: u8,
    immediate: Option<Value>,
    next: Option<ContentHash>,
    hash: ContentHash,
}

impl CodePoint {
    /// `next` is the hash of the following code point; `None` ends the chain.
    pub fn new(op: u8, immediate: Option<Value>, next: Option<ContentHash>) -> Self {
        let payload = codec::encode_code_point(op, immediate.as_ref(), next.as_ref());
        let hash = codec::content_hash(RecordTag::CodePoint, &payload);
        Self {
            op,
            immediate,
            next,
            hash,
        }
    }

    pub fn op(&self) -> u8 {
        self.op
    }

    pub fn immediate(&self) -> Option<&Value> {
        self.immediate.as_ref()
    }

    pub fn next(&self) -> Option<ContentHash> {
        self.next
    }

    pub fn hash(&self) -> ContentHash {
        self.hash
    }

    pub fn to_ref(&self) -> CodePointRef {
        CodePointRef {
            hash: self.hash,
            op: self.op,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.immediate.as_ref().is_some_and(Value::is_unresolved)
    }

    pub(crate) fn with_immediate(&self, immediate: Option<Value>) -> Self {
        Self::new(self.op, immediate, self.next)
    }
}
