//! Flat byte encoding for stored records.
//!
//! A record is `[tag][payload]` and its content hash is BLAKE3 over exactly
//! those bytes. Payloads:
//!
//! ```text
//! Int        32-byte big-endian magnitude
//! Tuple      arity:u8, slot * arity
//! CodePoint  op:u8, has_immediate:u8, [slot], has_next:u8, [next:32]
//!
//! slot       0x00 int:32
//!            0x01 op:u8 hash:32        (code point reference)
//!            0x02 arity:u8 hash:32     (tuple reference)
//! ```
//!
//! The codec is pure: it never looks anything up. Reference slots decode to
//! [`Value::Unresolved`] and the store decides whether to fault them in.

use thiserror::Error;

use crate::hash::{ContentHash, HASH_LEN};
use crate::value::{ChildKind, CodePoint, Tuple, Unresolved, Value, MAX_TUPLE_SIZE, U256};

const SLOT_INT: u8 = 0;
const SLOT_CODE_POINT: u8 = 1;
const SLOT_TUPLE: u8 = 2;

/// Errors raised while decoding a record body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unexpected end of payload")]
    UnexpectedEof,

    #[error("unknown record tag {0}")]
    UnknownTag(u8),

    #[error("unknown slot tag {0}")]
    UnknownSlotTag(u8),

    #[error("invalid presence flag {0}")]
    InvalidFlag(u8),

    #[error("tuple has {0} slots, maximum is 8")]
    TooManySlots(usize),

    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

/// Type tag of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum RecordTag {
    Int = 0,
    CodePoint = 1,
    Tuple = 2,
}

impl RecordTag {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordTag::Int => "int",
            RecordTag::CodePoint => "code point",
            RecordTag::Tuple => "tuple",
        }
    }
}

impl TryFrom<u8> for RecordTag {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(RecordTag::Int),
            1 => Ok(RecordTag::CodePoint),
            2 => Ok(RecordTag::Tuple),
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

impl std::fmt::Display for RecordTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded record body. Reference slots are [`Value::Unresolved`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    Int(U256),
    CodePoint(CodePoint),
    Tuple(Tuple),
}

impl RecordBody {
    pub fn tag(&self) -> RecordTag {
        match self {
            RecordBody::Int(_) => RecordTag::Int,
            RecordBody::CodePoint(_) => RecordTag::CodePoint,
            RecordBody::Tuple(_) => RecordTag::Tuple,
        }
    }

    pub fn hash(&self) -> ContentHash {
        match self {
            RecordBody::Int(n) => content_hash(RecordTag::Int, n.as_be_bytes()),
            RecordBody::CodePoint(cp) => cp.hash(),
            RecordBody::Tuple(t) => t.hash(),
        }
    }

    /// Every record this body holds a reference count on.
    pub fn children(&self) -> Vec<ContentHash> {
        match self {
            RecordBody::Int(_) => Vec::new(),
            RecordBody::Tuple(t) => t
                .slots()
                .iter()
                .filter_map(Value::child)
                .map(|(hash, _)| hash)
                .collect(),
            RecordBody::CodePoint(cp) => cp
                .immediate()
                .and_then(Value::child)
                .map(|(hash, _)| hash)
                .into_iter()
                .chain(cp.next())
                .collect(),
        }
    }
}

/// Hash of `tag || payload`.
pub fn content_hash(tag: RecordTag, payload: &[u8]) -> ContentHash {
    ContentHash::from_parts(&[&[tag.as_u8()], payload])
}

/// Encodes one value as it appears inside a tuple or code point.
pub fn encode_slot(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Int(n) => {
            out.push(SLOT_INT);
            out.extend_from_slice(n.as_be_bytes());
        }
        other => {
            // child() is Some for every non-int variant
            if let Some((hash, kind)) = other.child() {
                match kind {
                    ChildKind::CodePoint { op } => {
                        out.push(SLOT_CODE_POINT);
                        out.push(op);
                    }
                    ChildKind::Tuple { arity } => {
                        out.push(SLOT_TUPLE);
                        out.push(arity);
                    }
                }
                out.extend_from_slice(hash.as_bytes());
            }
        }
    }
}

/// Tuple payload. Callers are responsible for the arity bound.
pub fn encode_tuple(slots: &[Value]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + slots.len() * (2 + HASH_LEN));
    out.push(slots.len() as u8);
    for slot in slots {
        encode_slot(&mut out, slot);
    }
    out
}

pub fn encode_code_point(op: u8, immediate: Option<&Value>, next: Option<&ContentHash>) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + 2 * (2 + HASH_LEN));
    out.push(op);
    match immediate {
        Some(value) => {
            out.push(1);
            encode_slot(&mut out, value);
        }
        None => out.push(0),
    }
    match next {
        Some(hash) => {
            out.push(1);
            out.extend_from_slice(hash.as_bytes());
        }
        None => out.push(0),
    }
    out
}

/// Tag and payload of a body, the inverse of [`decode`].
pub fn encode(body: &RecordBody) -> (RecordTag, Vec<u8>) {
    match body {
        RecordBody::Int(n) => (RecordTag::Int, n.as_be_bytes().to_vec()),
        RecordBody::Tuple(t) => (RecordTag::Tuple, encode_tuple(t.slots())),
        RecordBody::CodePoint(cp) => (
            RecordTag::CodePoint,
            encode_code_point(cp.op(), cp.immediate(), cp.next().as_ref()),
        ),
    }
}

/// Decodes a record body. Rejects anything that would not re-encode to the
/// same bytes.
pub fn decode(tag: u8, payload: &[u8]) -> Result<RecordBody, CodecError> {
    let tag = RecordTag::try_from(tag)?;
    let mut offset = 0;
    let body = match tag {
        RecordTag::Int => RecordBody::Int(read_int(payload, &mut offset)?),
        RecordTag::Tuple => {
            let arity = usize::from(read_u8(payload, &mut offset)?);
            if arity > MAX_TUPLE_SIZE {
                return Err(CodecError::TooManySlots(arity));
            }
            let mut slots = Vec::with_capacity(arity);
            for _ in 0..arity {
                slots.push(read_slot(payload, &mut offset)?);
            }
            RecordBody::Tuple(Tuple::new(slots)?)
        }
        RecordTag::CodePoint => {
            let op = read_u8(payload, &mut offset)?;
            let immediate = if read_flag(payload, &mut offset)? {
                Some(read_slot(payload, &mut offset)?)
            } else {
                None
            };
            let next = if read_flag(payload, &mut offset)? {
                Some(read_hash(payload, &mut offset)?)
            } else {
                None
            };
            RecordBody::CodePoint(CodePoint::new(op, immediate, next))
        }
    };
    if offset != payload.len() {
        return Err(CodecError::TrailingBytes(payload.len() - offset));
    }
    Ok(body)
}

fn read_u8(bytes: &[u8], offset: &mut usize) -> Result<u8, CodecError> {
    let b = *bytes.get(*offset).ok_or(CodecError::UnexpectedEof)?;
    *offset += 1;
    Ok(b)
}

fn read_flag(bytes: &[u8], offset: &mut usize) -> Result<bool, CodecError> {
    match read_u8(bytes, offset)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(CodecError::InvalidFlag(other)),
    }
}

fn read_array(bytes: &[u8], offset: &mut usize) -> Result<[u8; 32], CodecError> {
    let end = offset.checked_add(32).ok_or(CodecError::UnexpectedEof)?;
    let slice = bytes.get(*offset..end).ok_or(CodecError::UnexpectedEof)?;
    let mut out = [0u8; 32];
    out.copy_from_slice(slice);
    *offset = end;
    Ok(out)
}

fn read_int(bytes: &[u8], offset: &mut usize) -> Result<U256, CodecError> {
    read_array(bytes, offset).map(U256::from_be_bytes)
}

fn read_hash(bytes: &[u8], offset: &mut usize) -> Result<ContentHash, CodecError> {
    read_array(bytes, offset).map(ContentHash::from_bytes)
}

fn read_slot(bytes: &[u8], offset: &mut usize) -> Result<Value, CodecError> {
    match read_u8(bytes, offset)? {
        SLOT_INT => Ok(Value::Int(read_int(bytes, offset)?)),
        SLOT_CODE_POINT => {
            let op = read_u8(bytes, offset)?;
            let hash = read_hash(bytes, offset)?;
            Ok(Value::Unresolved(Unresolved {
                hash,
                kind: ChildKind::CodePoint { op },
            }))
        }
        SLOT_TUPLE => {
            let arity = read_u8(bytes, offset)?;
            if usize::from(arity) > MAX_TUPLE_SIZE {
                return Err(CodecError::TooManySlots(usize::from(arity)));
            }
            let hash = read_hash(bytes, offset)?;
            Ok(Value::Unresolved(Unresolved {
                hash,
                kind: ChildKind::Tuple { arity },
            }))
        }
        other => Err(CodecError::UnknownSlotTag(other)),
    }
}
