//! Whole-store statistics and consistency checking.
//!
//! `verify` recomputes what every record's count should be from the
//! references held by checkpoints and parent records, then compares.
//! A reference held by a caller outside any checkpoint (a bare top-level
//! save) shows up as a count mismatch. It only reads; repairing is left to
//! the operator.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::warn;

use crate::checkpoint::CheckpointRecord;
use crate::codec;
use crate::engine::KeyValueEngine;
use crate::error::StoreResult;
use crate::hash::ContentHash;
use crate::record::{hash_from_object_key, StoredRecord, CHECKPOINT_PREFIX, OBJECT_PREFIX};
use crate::store::ObjectStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub records: u64,
    pub checkpoints: u64,
    /// Sum of all record counts.
    pub total_references: u64,
    /// Keys plus values, as held by the engine.
    pub bytes: u64,
}

/// One inconsistency found by [`ObjectStore::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    CountMismatch {
        hash: ContentHash,
        stored: u32,
        expected: u64,
    },
    ZeroCount {
        hash: ContentHash,
    },
    /// Referenced by a checkpoint or parent but not stored.
    DanglingReference {
        hash: ContentHash,
        references: u64,
    },
    HashMismatch {
        hash: ContentHash,
        actual: ContentHash,
    },
    Undecodable {
        key: String,
        reason: String,
    },
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Finding::CountMismatch {
                hash,
                stored,
                expected,
            } => write!(f, "{}: stored count {}, referenced {} times", hash, stored, expected),
            Finding::ZeroCount { hash } => write!(f, "{}: stored with count 0", hash),
            Finding::DanglingReference { hash, references } => {
                write!(f, "{}: missing, referenced {} times", hash, references)
            }
            Finding::HashMismatch { hash, actual } => {
                write!(f, "{}: body hashes to {}", hash, actual)
            }
            Finding::Undecodable { key, reason } => write!(f, "{}: {}", key, reason),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub records_checked: u64,
    pub checkpoints_checked: u64,
    pub findings: Vec<Finding>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

impl<E: KeyValueEngine> ObjectStore<E> {
    pub fn stats(&self) -> StoreResult<StoreStats> {
        let mut stats = StoreStats::default();
        for (key, value) in self.engine().scan_prefix(OBJECT_PREFIX)? {
            stats.records += 1;
            stats.bytes += (key.len() + value.len()) as u64;
            if let Some(hash) = hash_from_object_key(&key) {
                if let Ok(record) = StoredRecord::from_bytes(&hash, &value) {
                    stats.total_references += u64::from(record.reference_count);
                }
            }
        }
        for (key, value) in self.engine().scan_prefix(CHECKPOINT_PREFIX)? {
            stats.checkpoints += 1;
            stats.bytes += (key.len() + value.len()) as u64;
        }
        Ok(stats)
    }

    /// Check every record and checkpoint. Storage faults are errors;
    /// damaged data is reported as findings.
    pub fn verify(&self) -> StoreResult<VerifyReport> {
        let mut report = VerifyReport::default();
        // hash -> references held on it by checkpoints and parents
        let mut expected: HashMap<ContentHash, u64> = HashMap::new();
        let mut stored: BTreeMap<ContentHash, u32> = BTreeMap::new();

        for (key, value) in self.engine().scan_prefix(CHECKPOINT_PREFIX)? {
            report.checkpoints_checked += 1;
            let label = format!("checkpoint {}", String::from_utf8_lossy(&key[CHECKPOINT_PREFIX.len()..]));
            match bincode::deserialize::<CheckpointRecord>(&value) {
                Ok(record) => {
                    for (_, root) in record.roots.components() {
                        *expected.entry(root.hash).or_default() += 1;
                    }
                }
                Err(e) => report.findings.push(Finding::Undecodable {
                    key: label,
                    reason: e.to_string(),
                }),
            }
        }

        for (key, value) in self.engine().scan_prefix(OBJECT_PREFIX)? {
            report.records_checked += 1;
            let Some(hash) = hash_from_object_key(&key) else {
                report.findings.push(Finding::Undecodable {
                    key: hex::encode(&key),
                    reason: "malformed object key".to_string(),
                });
                continue;
            };
            let record = match StoredRecord::from_bytes(&hash, &value) {
                Ok(record) => record,
                Err(e) => {
                    report.findings.push(Finding::Undecodable {
                        key: hash.to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            stored.insert(hash, record.reference_count);
            if record.reference_count == 0 {
                report.findings.push(Finding::ZeroCount { hash });
            }

            let body = match codec::decode(record.tag, &record.payload) {
                Ok(body) => body,
                Err(e) => {
                    report.findings.push(Finding::Undecodable {
                        key: hash.to_string(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let actual = body.hash();
            if actual != hash {
                report.findings.push(Finding::HashMismatch { hash, actual });
            }
            for child in body.children() {
                *expected.entry(child).or_default() += 1;
            }
        }

        for (hash, count) in &stored {
            let wanted = expected.remove(hash).unwrap_or(0);
            // zero counts were already reported
            if *count > 0 && u64::from(*count) != wanted {
                report.findings.push(Finding::CountMismatch {
                    hash: *hash,
                    stored: *count,
                    expected: wanted,
                });
            }
        }
        let mut dangling: Vec<_> = expected.into_iter().collect();
        dangling.sort();
        for (hash, references) in dangling {
            report.findings.push(Finding::DanglingReference { hash, references });
        }

        for finding in &report.findings {
            warn!("verify: {}", finding);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::pool::ObjectPool;
    use crate::record::object_key;
    use crate::value::Value;

    #[test]
    fn test_stats_count_records_and_references() {
        let store = ObjectStore::new(MemoryEngine::new());
        let mut pool = ObjectPool::new();
        let leaf = pool.tuple(vec![Value::int(1u64)]).unwrap();
        let root = pool.tuple(vec![leaf.clone(), leaf.clone()]).unwrap();
        store.save_value(&root, &pool).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.checkpoints, 0);
        assert_eq!(stats.total_references, 3);
        assert!(stats.bytes > 0);
    }

    #[test]
    fn test_unbound_save_is_reported() {
        let store = ObjectStore::new(MemoryEngine::new());
        let mut pool = ObjectPool::new();
        let leaf = pool.tuple(vec![Value::int(1u64)]).unwrap();
        let root = pool.tuple(vec![leaf.clone(), Value::int(2u64)]).unwrap();
        store.save_value(&root, &pool).unwrap();

        let report = store.verify().unwrap();
        assert_eq!(report.records_checked, 2);
        assert_eq!(
            report.findings,
            vec![Finding::CountMismatch {
                hash: root.hash(),
                stored: 1,
                expected: 0,
            }]
        );
    }

    #[test]
    fn test_dangling_child_reported() {
        let store = ObjectStore::new(MemoryEngine::new());
        let mut pool = ObjectPool::new();
        let leaf = pool.tuple(vec![Value::int(1u64)]).unwrap();
        let root = pool.tuple(vec![leaf.clone()]).unwrap();
        store.save_value(&root, &pool).unwrap();
        store.engine().delete(&object_key(&leaf.hash())).unwrap();

        let report = store.verify().unwrap();
        assert!(report.findings.contains(&Finding::DanglingReference {
            hash: leaf.hash(),
            references: 1,
        }));
    }

    #[test]
    fn test_garbage_record_reported() {
        let store = ObjectStore::new(MemoryEngine::new());
        let hash = ContentHash::from_data(b"garbage");
        store.engine().put(&object_key(&hash), b"\x01").unwrap();

        let report = store.verify().unwrap();
        assert!(matches!(
            report.findings.as_slice(),
            [Finding::Undecodable { .. }]
        ));
    }
}
