//! External registry interface.
//!
//! The top-level group registry is an external collaborator; the storage
//! core only writes through this trait. Transitions are persisted here
//! before the next pipeline phase begins, so crash recovery is driven by
//! registry state plus on-disk evidence.
//!
//! `MemRegistry` is an in-memory implementation for tests and embedders
//! that keep their own durable registry elsewhere.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use cid::Cid;
use parking_lot::Mutex;

use crate::group::GroupState;

pub type GroupId = u64;

pub trait Registry: Send + Sync {
    /// Persist the group head after a sync: state plus committed counters
    /// and the committed log length.
    fn set_group_head(
        &self,
        id: GroupId,
        state: GroupState,
        committed_blocks: u64,
        committed_size: u64,
        committed_len: u64,
    ) -> Result<()>;

    /// Persist a bare state transition.
    fn set_group_state(&self, id: GroupId, state: GroupState) -> Result<()>;

    /// Persist the packaging result alongside the state transition.
    fn set_commp(
        &self,
        id: GroupId,
        state: GroupState,
        commp: &[u8],
        padded_piece_size: u64,
        root: &Cid,
        archive_size: u64,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct GroupRow {
    pub state: Option<GroupState>,
    pub committed_blocks: u64,
    pub committed_size: u64,
    pub committed_len: u64,
    pub commp: Option<Vec<u8>>,
    pub padded_piece_size: u64,
    pub root: Option<Cid>,
    pub archive_size: u64,
}

#[derive(Default)]
pub struct MemRegistry {
    rows: Mutex<HashMap<GroupId, GroupRow>>,
}

impl MemRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn row(&self, id: GroupId) -> Option<GroupRow> {
        self.rows.lock().get(&id).cloned()
    }
}

impl Registry for MemRegistry {
    fn set_group_head(
        &self,
        id: GroupId,
        state: GroupState,
        committed_blocks: u64,
        committed_size: u64,
        committed_len: u64,
    ) -> Result<()> {
        let mut rows = self.rows.lock();
        let row = rows.entry(id).or_default();
        row.state = Some(state);
        row.committed_blocks = committed_blocks;
        row.committed_size = committed_size;
        row.committed_len = committed_len;
        Ok(())
    }

    fn set_group_state(&self, id: GroupId, state: GroupState) -> Result<()> {
        let mut rows = self.rows.lock();
        rows.entry(id).or_default().state = Some(state);
        Ok(())
    }

    fn set_commp(
        &self,
        id: GroupId,
        state: GroupState,
        commp: &[u8],
        padded_piece_size: u64,
        root: &Cid,
        archive_size: u64,
    ) -> Result<()> {
        let mut rows = self.rows.lock();
        let row = rows.entry(id).or_default();
        row.state = Some(state);
        row.commp = Some(commp.to_vec());
        row.padded_piece_size = padded_piece_size;
        row.root = Some(*root);
        row.archive_size = archive_size;
        Ok(())
    }
}
