//! Group struct, open/create, locking and counters.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use parking_lot::RwLock;

use crate::blocklog::BlockLog;
use crate::bsst::Bsst;
use crate::consts::{BSST_FILE, INDEX_DIR, LOG_DATA_FILE, LOG_META_FILE, VCAR_DIR};
use crate::error::StoreError;
use crate::lock::{try_acquire_exclusive_lock, LockGuard};
use crate::memindex::MemIndex;
use crate::registry::{GroupId, Registry};

use super::state::GroupState;
use super::GroupConfig;

pub(crate) struct GroupInner {
    pub log: BlockLog,
    pub mi: Option<MemIndex>,
    pub sht: Option<Bsst>,
    pub state: GroupState,
    pub committed_blocks: u64,
    pub committed_size: u64,
    pub inflight_blocks: u64,
    pub inflight_size: u64,
}

/// A single group: an append-only block log plus its index, a lifecycle
/// state, and the packaging artifacts. Single writer, many readers.
pub struct Group {
    id: GroupId,
    path: PathBuf,
    cfg: GroupConfig,
    registry: Arc<dyn Registry>,
    pub(crate) inner: RwLock<GroupInner>,
    pub(crate) read_blocks: AtomicU64,
    pub(crate) read_size: AtomicU64,
    _lock: LockGuard,
}

impl Group {
    /// Create a fresh writable group under `dir`.
    pub fn create(
        dir: &Path,
        id: GroupId,
        registry: Arc<dyn Registry>,
        cfg: GroupConfig,
    ) -> Result<Self> {
        Self::open_inner(dir, id, registry, cfg, GroupState::Writable, 0, 0, true)
    }

    /// Open an existing group. `state` and the committed counters come
    /// from the registry row; the log head is authoritative for the
    /// committed block count and length.
    pub fn open(
        dir: &Path,
        id: GroupId,
        registry: Arc<dyn Registry>,
        cfg: GroupConfig,
        state: GroupState,
        committed_blocks: u64,
        committed_size: u64,
    ) -> Result<Self> {
        Self::open_inner(
            dir,
            id,
            registry,
            cfg,
            state,
            committed_blocks,
            committed_size,
            false,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn open_inner(
        dir: &Path,
        id: GroupId,
        registry: Arc<dyn Registry>,
        cfg: GroupConfig,
        state: GroupState,
        committed_blocks: u64,
        committed_size: u64,
        create: bool,
    ) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("create group directory {}", dir.display()))?;
        let lock = try_acquire_exclusive_lock(dir)?;

        let meta_path = dir.join(LOG_META_FILE);
        let log_path = dir.join(LOG_DATA_FILE);
        let log = if create {
            BlockLog::create(&meta_path, &log_path)?
        } else {
            BlockLog::open(&meta_path, &log_path)?
        };

        if !create && log.block_count() != committed_blocks {
            warn!(
                "group {}: registry reports {} committed blocks, log head has {}; \
                 trusting the log",
                id,
                committed_blocks,
                log.block_count()
            );
        }
        let committed_blocks = log.block_count();

        let index_dir = dir.join(INDEX_DIR);
        let mut mi = None;
        if state.uses_mutable_index() || index_dir.exists() {
            // A failed group keeps whatever is on disk for inspection; it
            // may have died in any phase.
            if state >= GroupState::LevelIndexDropped && state != GroupState::Failed {
                // The drop phase completed (the state write follows it), so
                // a leftover directory is stray; remove it.
                warn!(
                    "group {}: removing stray mutable index at {}",
                    id,
                    index_dir.display()
                );
                fs::remove_dir_all(&index_dir)
                    .with_context(|| format!("remove stray index dir {}", index_dir.display()))?;
            } else {
                let idx = MemIndex::open(&index_dir)?;
                let swept = idx.sweep_uncommitted(log.committed_len())?;
                if swept > 0 {
                    info!("group {}: swept {} uncommitted index entries", id, swept);
                }
                mi = Some(idx);
            }
        }

        let bsst_path = dir.join(BSST_FILE);
        let sht = if state >= GroupState::BsstExists && state != GroupState::Failed {
            Some(Bsst::open(&bsst_path).with_context(|| {
                format!(
                    "group {} is sealed but its static index is unusable",
                    id
                )
            })?)
        } else if state == GroupState::Failed && bsst_path.exists() {
            // A failed seal may have left a usable table behind.
            Bsst::open(&bsst_path).ok()
        } else {
            None
        };

        info!(
            "opened group {} at {} (state {}, {} blocks, {} committed bytes)",
            id,
            dir.display(),
            state,
            committed_blocks,
            log.committed_len()
        );

        Ok(Self {
            id,
            path: dir.to_path_buf(),
            cfg,
            registry,
            inner: RwLock::new(GroupInner {
                log,
                mi,
                sht,
                state,
                committed_blocks,
                committed_size,
                inflight_blocks: 0,
                inflight_size: 0,
            }),
            read_blocks: AtomicU64::new(0),
            read_size: AtomicU64::new(0),
            _lock: lock,
        })
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn config(&self) -> &GroupConfig {
        &self.cfg
    }

    pub(crate) fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub(crate) fn vcar_dir(&self) -> PathBuf {
        self.path.join(VCAR_DIR)
    }

    pub(crate) fn bsst_path(&self) -> PathBuf {
        self.path.join(BSST_FILE)
    }

    pub(crate) fn index_dir(&self) -> PathBuf {
        self.path.join(INDEX_DIR)
    }

    pub fn state(&self) -> GroupState {
        self.inner.read().state
    }

    /// (committed_blocks, committed_size, inflight_blocks, inflight_size)
    pub fn counters(&self) -> (u64, u64, u64, u64) {
        let inner = self.inner.read();
        (
            inner.committed_blocks,
            inner.committed_size,
            inner.inflight_blocks,
            inner.inflight_size,
        )
    }

    /// (read_blocks, read_size) since open.
    pub fn read_stats(&self) -> (u64, u64) {
        (
            self.read_blocks.load(Ordering::Relaxed),
            self.read_size.load(Ordering::Relaxed),
        )
    }

    /// Validate and persist a state transition, registry first so a crash
    /// between the two leaves the durable side ahead, never behind.
    pub(crate) fn advance_state_locked(
        &self,
        inner: &mut GroupInner,
        next: GroupState,
    ) -> Result<()> {
        if !inner.state.can_advance_to(next) {
            return Err(StoreError::BadState {
                expected: next,
                actual: inner.state,
            }
            .into());
        }
        self.registry.set_group_state(self.id, next)?;
        info!("group {}: {} -> {}", self.id, inner.state, next);
        inner.state = next;
        Ok(())
    }

    /// Escalation target for persistent pipeline failures. Best-effort:
    /// an already-terminal group is left alone.
    pub fn mark_failed(&self) {
        let mut inner = self.inner.write();
        if inner.state.is_terminal() {
            return;
        }
        if let Err(e) = self.registry.set_group_state(self.id, GroupState::Failed) {
            warn!("group {}: persisting failed state: {:#}", self.id, e);
            return;
        }
        inner.state = GroupState::Failed;
    }

    /// Flush and release handles and the directory lock. No state change.
    pub fn close(self) -> Result<()> {
        let inner = self.inner.into_inner();
        if let Some(mi) = inner.mi {
            mi.flush()?;
        }
        inner.log.close()?;
        info!("closed group {}", self.id);
        Ok(())
    }
}
