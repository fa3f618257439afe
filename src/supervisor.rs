//! Group lifecycle supervisor.
//!
//! Owns the store root and drives a full group through the seal and
//! packaging pipeline, persisting every transition before the next phase
//! begins. Re-entry after a crash starts at the first incomplete state;
//! persistent failures escalate by marking the group Failed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use log::warn;

use crate::ctx::Ctx;
use crate::error::{is_bad_state, is_cancelled, StoreError};
use crate::group::{group_dir, CommpResult, Group, GroupConfig, GroupState};
use crate::registry::{GroupId, Registry};

pub struct Supervisor {
    root: PathBuf,
    registry: Arc<dyn Registry>,
    cfg: GroupConfig,
}

impl Supervisor {
    pub fn new(root: &Path, registry: Arc<dyn Registry>, cfg: GroupConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            registry,
            cfg,
        }
    }

    pub fn group_dir(&self, id: GroupId) -> PathBuf {
        group_dir(&self.root, id)
    }

    /// Create a fresh writable group and register its head.
    pub fn create_group(&self, id: GroupId) -> Result<Group> {
        let group = Group::create(
            &self.group_dir(id),
            id,
            self.registry.clone(),
            self.cfg.clone(),
        )?;
        self.registry
            .set_group_head(id, GroupState::Writable, 0, 0, 0)?;
        Ok(group)
    }

    /// Open an existing group from its registry row.
    pub fn open_group(
        &self,
        id: GroupId,
        state: GroupState,
        committed_blocks: u64,
        committed_size: u64,
    ) -> Result<Group> {
        Group::open(
            &self.group_dir(id),
            id,
            self.registry.clone(),
            self.cfg.clone(),
            state,
            committed_blocks,
            committed_size,
        )
    }

    /// Drive a group from Full to HasCommP: finalize, DAG layers, piece
    /// commitment, in order. Idempotent; safe to re-invoke after a crash
    /// or failure. Returns the packaging result once available.
    pub fn finalize_pipeline(&self, ctx: &Ctx, group: &Group) -> Result<Option<CommpResult>> {
        let mut result = None;
        loop {
            let state = group.state();
            let step: Result<()> = match state {
                GroupState::Full | GroupState::BsstExists => group.finalize(ctx),
                GroupState::LevelIndexDropped => group.gen_top_car(ctx),
                GroupState::VrcarDone => group.gen_commp(ctx).map(|r| {
                    result = Some(r);
                }),
                GroupState::HasCommP | GroupState::DealsInProgress | GroupState::Offloaded => {
                    return Ok(result)
                }
                actual @ (GroupState::Writable | GroupState::Failed) => Err(StoreError::BadState {
                    expected: GroupState::Full,
                    actual,
                }
                .into()),
            };

            if let Err(e) = step {
                // Cancellation and precondition errors go back to the
                // caller untouched; anything else is a persistent pipeline
                // failure and takes the group down with it.
                if is_cancelled(&e) || is_bad_state(&e) {
                    return Err(e);
                }
                warn!(
                    "group {}: pipeline failed in state {}: {:#}",
                    group.id(),
                    state,
                    e
                );
                group.mark_failed();
                return Err(e);
            }
        }
    }
}
