//! On-disk layout: key namespaces and the stored record envelope.
//!
//! ```text
//! o:<hash 32 bytes>   -> StoredRecord   (bincode)
//! c:<checkpoint name> -> CheckpointRecord (bincode)
//! ```

use serde::{Deserialize, Serialize};

use crate::codec::{self, RecordBody, RecordTag};
use crate::error::{StoreError, StoreResult};
use crate::hash::ContentHash;

pub const OBJECT_PREFIX: &[u8] = b"o:";
pub const CHECKPOINT_PREFIX: &[u8] = b"c:";

pub fn object_key(hash: &ContentHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(OBJECT_PREFIX.len() + 32);
    key.extend_from_slice(OBJECT_PREFIX);
    key.extend_from_slice(hash.as_bytes());
    key
}

pub fn checkpoint_key(name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(CHECKPOINT_PREFIX.len() + name.len());
    key.extend_from_slice(CHECKPOINT_PREFIX);
    key.extend_from_slice(name.as_bytes());
    key
}

pub fn hash_from_object_key(key: &[u8]) -> Option<ContentHash> {
    key.strip_prefix(OBJECT_PREFIX)
        .and_then(|rest| ContentHash::from_slice(rest).ok())
}

pub fn name_from_checkpoint_key(key: &[u8]) -> Option<String> {
    key.strip_prefix(CHECKPOINT_PREFIX)
        .and_then(|rest| String::from_utf8(rest.to_vec()).ok())
}

/// One content-addressed record as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub reference_count: u32,
    pub tag: u8,
    pub payload: Vec<u8>,
}

impl StoredRecord {
    pub fn new(tag: RecordTag, payload: Vec<u8>) -> Self {
        Self {
            reference_count: 1,
            tag: tag.as_u8(),
            payload,
        }
    }

    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StoreError::corrupt("<record>", e))
    }

    /// Parse the envelope stored under `hash`.
    pub fn from_bytes(hash: &ContentHash, bytes: &[u8]) -> StoreResult<Self> {
        bincode::deserialize(bytes).map_err(|e| StoreError::corrupt(hash, e))
    }

    /// Decode the body and check it hashes to `hash`.
    pub fn body(&self, hash: &ContentHash) -> StoreResult<RecordBody> {
        let body = codec::decode(self.tag, &self.payload).map_err(|e| StoreError::corrupt(hash, e))?;
        let actual = body.hash();
        if &actual != hash {
            return Err(StoreError::corrupt(
                hash,
                format!("body hashes to {}", actual),
            ));
        }
        Ok(body)
    }

    pub fn record_tag(&self) -> Option<RecordTag> {
        RecordTag::try_from(self.tag).ok()
    }
}
