//! Cascading reference release.
//!
//! Deleting drops one reference. When a record's count reaches zero it is
//! removed and one reference is dropped from each child it names, repeating
//! until nothing else reaches zero. The cascade runs off an explicit
//! worklist so long code chains do not grow the stack.

use tracing::debug;

use crate::codec::RecordTag;
use crate::engine::KeyValueEngine;
use crate::error::{StoreError, StoreResult};
use crate::hash::ContentHash;
use crate::record::object_key;
use crate::store::ObjectStore;
use crate::writeset::WriteSet;

/// Outcome of a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteResult {
    pub hash: ContentHash,
    /// Count left on the target; zero means it was reclaimed.
    pub reference_count: u32,
    /// Records removed by this call, the target included.
    pub reclaimed: usize,
}

impl DeleteResult {
    pub fn is_reclaimed(&self) -> bool {
        self.reference_count == 0
    }
}

enum Release {
    Kept(u32),
    Reclaimed(Vec<ContentHash>),
}

impl<E: KeyValueEngine> ObjectStore<E> {
    /// Drop one reference to a record of any kind.
    pub fn delete_value(&self, hash: &ContentHash) -> StoreResult<DeleteResult> {
        self.delete_expecting(hash, None)
    }

    pub fn delete_tuple(&self, hash: &ContentHash) -> StoreResult<DeleteResult> {
        self.delete_expecting(hash, Some(RecordTag::Tuple))
    }

    pub fn delete_code_point(&self, hash: &ContentHash) -> StoreResult<DeleteResult> {
        self.delete_expecting(hash, Some(RecordTag::CodePoint))
    }

    fn delete_expecting(
        &self,
        hash: &ContentHash,
        expected: Option<RecordTag>,
    ) -> StoreResult<DeleteResult> {
        self.atomically(|ws| self.release_in(ws, hash, expected))
    }

    /// Drop one reference to `hash` inside `ws`, cascading into children of
    /// anything that reaches zero.
    pub(crate) fn release_in(
        &self,
        ws: &mut WriteSet<'_, E>,
        hash: &ContentHash,
        expected: Option<RecordTag>,
    ) -> StoreResult<DeleteResult> {
        let (reference_count, mut pending) = match self.release_one(ws, hash, expected)? {
            Release::Kept(count) => (count, Vec::new()),
            Release::Reclaimed(children) => (0, children),
        };
        let mut reclaimed = usize::from(reference_count == 0);

        while let Some(child) = pending.pop() {
            if let Release::Reclaimed(grandchildren) = self.release_one(ws, &child, None)? {
                reclaimed += 1;
                pending.extend(grandchildren);
            }
        }

        if reclaimed > 0 {
            debug!("released {}: {} records reclaimed", hash.short(), reclaimed);
        }
        Ok(DeleteResult {
            hash: *hash,
            reference_count,
            reclaimed,
        })
    }

    fn release_one(
        &self,
        ws: &mut WriteSet<'_, E>,
        hash: &ContentHash,
        expected: Option<RecordTag>,
    ) -> StoreResult<Release> {
        let mut record = self
            .read_record_in(ws, hash)?
            .ok_or(StoreError::RefcountUnderflow(*hash))?;

        if let Some(expected) = expected {
            match record.record_tag() {
                Some(found) if found == expected => {}
                Some(found) => {
                    return Err(StoreError::TypeMismatch {
                        hash: *hash,
                        expected,
                        found,
                    })
                }
                None => return Err(StoreError::corrupt(hash, "unknown record tag")),
            }
        }

        if record.reference_count == 0 {
            return Err(StoreError::RefcountUnderflow(*hash));
        }
        record.reference_count -= 1;

        let key = object_key(hash);
        if record.reference_count > 0 {
            ws.put(key, record.to_bytes()?);
            return Ok(Release::Kept(record.reference_count));
        }

        let children = record.body(hash)?.children();
        ws.delete(key);
        Ok(Release::Reclaimed(children))
    }
}
