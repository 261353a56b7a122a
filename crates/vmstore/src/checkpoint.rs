//! Named machine-state checkpoints.
//!
//! A checkpoint binds a name to the nine component roots of a machine plus
//! three raw fields. It holds one reference on each root; the records below
//! the roots are owned through the ordinary parent/child counts.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::codec::RecordTag;
use crate::engine::KeyValueEngine;
use crate::error::{StoreError, StoreResult};
use crate::pool::ObjectPool;
use crate::record::{checkpoint_key, name_from_checkpoint_key, CHECKPOINT_PREFIX};
use crate::store::{ObjectStore, SaveResult};
use crate::value::{CodePoint, Tuple, Value};
use crate::writeset::WriteSet;

/// One of the nine roots a checkpoint binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Static,
    Register,
    DataStack,
    AuxStack,
    Inbox,
    InboxCount,
    PendingInbox,
    PendingCount,
    ProgramCounter,
}

impl Component {
    pub const ALL: [Component; 9] = [
        Component::Static,
        Component::Register,
        Component::DataStack,
        Component::AuxStack,
        Component::Inbox,
        Component::InboxCount,
        Component::PendingInbox,
        Component::PendingCount,
        Component::ProgramCounter,
    ];

    /// Record kind this root must have, `None` for any value.
    pub fn kind(self) -> Option<RecordTag> {
        match self {
            Component::DataStack
            | Component::AuxStack
            | Component::Inbox
            | Component::PendingInbox => Some(RecordTag::Tuple),
            Component::ProgramCounter => Some(RecordTag::CodePoint),
            Component::Static
            | Component::Register
            | Component::InboxCount
            | Component::PendingCount => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Component::Static => "static",
            Component::Register => "register",
            Component::DataStack => "data_stack",
            Component::AuxStack => "aux_stack",
            Component::Inbox => "inbox",
            Component::InboxCount => "inbox_count",
            Component::PendingInbox => "pending_inbox",
            Component::PendingCount => "pending_count",
            Component::ProgramCounter => "pc",
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Already-saved component roots plus the raw fields, as bound under a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineStateRoots {
    pub static_val: SaveResult,
    pub register_val: SaveResult,
    pub data_stack: SaveResult,
    pub aux_stack: SaveResult,
    pub inbox: SaveResult,
    pub inbox_count: SaveResult,
    pub pending_inbox: SaveResult,
    pub pending_count: SaveResult,
    pub pc: SaveResult,
    pub status: u8,
    pub block_reason: Vec<u8>,
    pub balance_tracker: Vec<u8>,
}

impl MachineStateRoots {
    pub fn component(&self, component: Component) -> &SaveResult {
        match component {
            Component::Static => &self.static_val,
            Component::Register => &self.register_val,
            Component::DataStack => &self.data_stack,
            Component::AuxStack => &self.aux_stack,
            Component::Inbox => &self.inbox,
            Component::InboxCount => &self.inbox_count,
            Component::PendingInbox => &self.pending_inbox,
            Component::PendingCount => &self.pending_count,
            Component::ProgramCounter => &self.pc,
        }
    }

    pub fn components(&self) -> impl Iterator<Item = (Component, &SaveResult)> {
        Component::ALL.into_iter().map(move |c| (c, self.component(c)))
    }
}

/// Persisted form of a checkpoint.
///
/// The count is always 1: a name is bound once and destroyed once.
/// Component counts are as of bind time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub reference_count: u32,
    pub roots: MachineStateRoots,
}

impl CheckpointRecord {
    fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StoreError::corrupt("<checkpoint>", e))
    }

    fn from_bytes(name: &str, bytes: &[u8]) -> StoreResult<Self> {
        bincode::deserialize(bytes).map_err(|e| StoreError::corrupt(format!("checkpoint {}", name), e))
    }
}

/// Live machine state, with every component resolved through a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineState {
    pub static_val: Value,
    pub register_val: Value,
    pub data_stack: Tuple,
    pub aux_stack: Tuple,
    pub inbox: Tuple,
    pub inbox_count: Value,
    pub pending_inbox: Tuple,
    pub pending_count: Value,
    pub pc: CodePoint,
    pub status: u8,
    pub block_reason: Vec<u8>,
    pub balance_tracker: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateResult {
    /// Count on the checkpoint record itself.
    pub reference_count: u32,
    pub state: MachineState,
    pub roots: MachineStateRoots,
}

impl<E: KeyValueEngine> ObjectStore<E> {
    /// Bind already-saved roots under `name`.
    ///
    /// An existing checkpoint of the same name is released first, in the
    /// same batch. Every root must then still be present with the kind its
    /// component requires.
    pub fn save_machine_state(&self, roots: &MachineStateRoots, name: &str) -> StoreResult<()> {
        self.atomically(|ws| self.bind_in(ws, roots, name))?;
        info!("bound checkpoint {}", name);
        Ok(())
    }

    /// Save all nine components of `state` and bind them under `name`, as
    /// one batch.
    pub fn persist_machine_state(
        &self,
        state: &MachineState,
        pool: &ObjectPool,
        name: &str,
    ) -> StoreResult<MachineStateRoots> {
        let roots = self.atomically(|ws| {
            let roots = MachineStateRoots {
                static_val: self.save_value_in(ws, &state.static_val, pool)?,
                register_val: self.save_value_in(ws, &state.register_val, pool)?,
                data_stack: self.save_tuple_in(ws, &state.data_stack, pool)?,
                aux_stack: self.save_tuple_in(ws, &state.aux_stack, pool)?,
                inbox: self.save_tuple_in(ws, &state.inbox, pool)?,
                inbox_count: self.save_value_in(ws, &state.inbox_count, pool)?,
                pending_inbox: self.save_tuple_in(ws, &state.pending_inbox, pool)?,
                pending_count: self.save_value_in(ws, &state.pending_count, pool)?,
                pc: self.save_code_point_in(ws, &state.pc, pool)?,
                status: state.status,
                block_reason: state.block_reason.clone(),
                balance_tracker: state.balance_tracker.clone(),
            };
            self.bind_in(ws, &roots, name)?;
            Ok(roots)
        })?;
        info!("persisted checkpoint {}", name);
        Ok(roots)
    }

    fn bind_in(
        &self,
        ws: &mut WriteSet<'_, E>,
        roots: &MachineStateRoots,
        name: &str,
    ) -> StoreResult<()> {
        let key = checkpoint_key(name);
        if let Some(bytes) = ws.get(&key)? {
            let old = CheckpointRecord::from_bytes(name, &bytes)?;
            self.release_roots_in(ws, &old.roots)?;
            info!("replacing checkpoint {}", name);
        }

        for (component, root) in roots.components() {
            let record = self
                .read_record_in(ws, &root.hash)?
                .ok_or_else(|| StoreError::NotFound(format!("{} root {}", component, root.hash)))?;
            if let (Some(expected), Some(found)) = (component.kind(), record.record_tag()) {
                if expected != found {
                    return Err(StoreError::TypeMismatch {
                        hash: root.hash,
                        expected,
                        found,
                    });
                }
            }
        }

        let record = CheckpointRecord {
            reference_count: 1,
            roots: roots.clone(),
        };
        ws.put(key, record.to_bytes()?);
        Ok(())
    }

    fn release_roots_in(&self, ws: &mut WriteSet<'_, E>, roots: &MachineStateRoots) -> StoreResult<usize> {
        let mut reclaimed = 0;
        for (_, root) in roots.components() {
            reclaimed += self.release_in(ws, &root.hash, None)?.reclaimed;
        }
        Ok(reclaimed)
    }

    /// Load a checkpoint and resolve every component into `pool`.
    pub fn get_machine_state(&self, name: &str, pool: &mut ObjectPool) -> StoreResult<StateResult> {
        let CheckpointRecord {
            reference_count,
            roots,
        } = self.get_checkpoint_record(name)?;
        let state = MachineState {
            static_val: self.get_value(&roots.static_val.hash, pool)?.value,
            register_val: self.get_value(&roots.register_val.hash, pool)?.value,
            data_stack: self.get_tuple(&roots.data_stack.hash, pool)?.tuple,
            aux_stack: self.get_tuple(&roots.aux_stack.hash, pool)?.tuple,
            inbox: self.get_tuple(&roots.inbox.hash, pool)?.tuple,
            inbox_count: self.get_value(&roots.inbox_count.hash, pool)?.value,
            pending_inbox: self.get_tuple(&roots.pending_inbox.hash, pool)?.tuple,
            pending_count: self.get_value(&roots.pending_count.hash, pool)?.value,
            pc: self.get_code_point(&roots.pc.hash, pool)?.code_point,
            status: roots.status,
            block_reason: roots.block_reason.clone(),
            balance_tracker: roots.balance_tracker.clone(),
        };
        Ok(StateResult {
            reference_count,
            state,
            roots,
        })
    }

    /// The bound record, without resolving anything.
    pub fn get_checkpoint_record(&self, name: &str) -> StoreResult<CheckpointRecord> {
        let bytes = self
            .engine()
            .get(&checkpoint_key(name))?
            .ok_or_else(|| StoreError::NotFound(format!("checkpoint {}", name)))?;
        CheckpointRecord::from_bytes(name, &bytes)
    }

    /// Release every root of `name` and remove the checkpoint.
    pub fn delete_checkpoint(&self, name: &str) -> StoreResult<()> {
        let reclaimed = self.atomically(|ws| {
            let key = checkpoint_key(name);
            let bytes = ws
                .get(&key)?
                .ok_or_else(|| StoreError::NotFound(format!("checkpoint {}", name)))?;
            let record = CheckpointRecord::from_bytes(name, &bytes)?;

            let reclaimed = self.release_roots_in(ws, &record.roots)?;
            ws.delete(key);
            Ok(reclaimed)
        })?;
        info!("deleted checkpoint {} ({} records reclaimed)", name, reclaimed);
        Ok(())
    }

    /// Checkpoint names, sorted.
    pub fn list_checkpoints(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self
            .engine()
            .scan_prefix(CHECKPOINT_PREFIX)?
            .into_iter()
            .filter_map(|(key, _)| name_from_checkpoint_key(&key))
            .collect();
        names.sort();
        Ok(names)
    }
}
