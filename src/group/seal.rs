//! Seal path: finalize a full group.
//!
//! Order: mark the log read-only -> commit -> build the static table from
//! the mutable index (sorted hash order) -> persist BsstExists -> drop the
//! mutable index -> persist LevelIndexDropped. Every step is idempotent,
//! so a crashed finalize resumes from the first incomplete step using
//! on-disk evidence (static table validity, index directory presence).

use std::fs;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::bsst::{Bsst, BsstBuilder};
use crate::consts::BSST_HASH_SEED;
use crate::ctx::Ctx;
use crate::error::StoreError;

use super::core::Group;
use super::state::GroupState;

impl Group {
    pub fn finalize(&self, ctx: &Ctx) -> Result<()> {
        let mut inner = self.inner.write();
        ctx.check()?;

        match inner.state {
            GroupState::Full | GroupState::BsstExists => {}
            actual => {
                return Err(StoreError::BadState {
                    expected: GroupState::Full,
                    actual,
                }
                .into())
            }
        }

        // 1 + 2: freeze the log and make everything durable. Fold any
        // inflight counters so the persisted head matches the log.
        inner.log.mark_read_only();
        let at = inner.log.commit()?;
        inner.committed_blocks += inner.inflight_blocks;
        inner.committed_size += inner.inflight_size;
        inner.inflight_blocks = 0;
        inner.inflight_size = 0;
        self.registry().set_group_head(
            self.id(),
            inner.state,
            inner.committed_blocks,
            inner.committed_size,
            at,
        )?;

        // 3: build the static table, unless a valid one already covers
        // the index (crash between build and the state write).
        if inner.state == GroupState::Full {
            let mi = inner.mi.as_ref().ok_or_else(|| {
                StoreError::Corrupt("finalizing group without mutable index".into())
            })?;
            let bsst_path = self.bsst_path();

            let reusable = match Bsst::open(&bsst_path) {
                Ok(t) if t.entry_count() == mi.len() as u64 => true,
                Ok(t) => {
                    warn!(
                        "group {}: static index covers {} of {} entries, rebuilding",
                        self.id(),
                        t.entry_count(),
                        mi.len()
                    );
                    false
                }
                Err(_) => false,
            };
            if !reusable {
                let _ = fs::remove_file(&bsst_path);
                let mut builder = BsstBuilder::new(mi.len() as u64, BSST_HASH_SEED);
                mi.iterate_ordered(|mh, offset, length| {
                    ctx.check()?;
                    builder.insert(&mh.to_bytes(), offset, length)
                })?;
                builder.finish(&bsst_path)?;
            }

            let sht = Bsst::open(&bsst_path)?;
            inner.sht = Some(sht);
            self.advance_state_locked(&mut inner, GroupState::BsstExists)?;
        } else if inner.sht.is_none() {
            inner.sht = Some(Bsst::open(&self.bsst_path())?);
        }

        // 4: drop the mutable index; the static table is now the only
        // index. Missing directory means a previous attempt got here.
        if let Some(mi) = inner.mi.take() {
            mi.destroy()?;
        } else {
            let dir = self.index_dir();
            if dir.exists() {
                fs::remove_dir_all(&dir)
                    .with_context(|| format!("remove index dir {}", dir.display()))?;
            }
        }
        self.advance_state_locked(&mut inner, GroupState::LevelIndexDropped)?;

        info!(
            "sealed group {} ({} blocks, {} bytes)",
            self.id(),
            inner.committed_blocks,
            inner.committed_size
        );
        Ok(())
    }
}
