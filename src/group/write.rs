//! Write path: put and sync.

use std::collections::HashSet;

use anyhow::Result;
use log::debug;
use multihash::Multihash;

use crate::ctx::Ctx;
use crate::error::StoreError;

use super::core::Group;
use super::state::GroupState;
use super::Block;

impl Group {
    /// Accept the longest prefix of `blocks` that fits the size cap.
    ///
    /// Returns the number of accepted blocks. Duplicates of already-held
    /// hashes are accepted idempotently without a new log entry. A prefix
    /// shorter than the batch flips the group to Full; once Full (or
    /// later), every call accepts 0. Accepted entries are buffered in the
    /// log and recorded in the mutable index; nothing is durable or
    /// visible to `view` until `sync`.
    pub fn put(&self, ctx: &Ctx, blocks: &[Block]) -> Result<usize> {
        if blocks.is_empty() {
            return Ok(0);
        }

        let mut inner = self.inner.write();
        ctx.check()?;

        if inner.state != GroupState::Writable {
            return Ok(0);
        }

        let avail = self
            .config()
            .max_group_size
            .saturating_sub(inner.committed_size + inner.inflight_size);

        // Pick the accepted prefix. Duplicates cost no space.
        let (accepted, fresh, fresh_bytes) = {
            let mi = inner.mi.as_ref().ok_or_else(|| {
                StoreError::Corrupt("writable group without mutable index".into())
            })?;

            let mut accepted = 0usize;
            let mut fresh: Vec<usize> = Vec::new();
            let mut fresh_bytes = 0u64;
            let mut seen: HashSet<Vec<u8>> = HashSet::new();
            for (i, b) in blocks.iter().enumerate() {
                let key = b.hash().to_bytes();
                if seen.contains(&key) || mi.get(b.hash())?.is_some() {
                    accepted += 1;
                    continue;
                }
                let len = b.len() as u64;
                if fresh_bytes + len > avail {
                    break;
                }
                fresh_bytes += len;
                seen.insert(key);
                fresh.push(i);
                accepted += 1;
            }
            (accepted, fresh, fresh_bytes)
        };

        if accepted < blocks.len() {
            // Persisted with the next sync.
            inner.state = GroupState::Full;
            debug!("group {} is full", self.id());
        }
        if fresh.is_empty() {
            return Ok(accepted);
        }

        // 1. Buffered log append.
        let locs = inner
            .log
            .append_batch(fresh.iter().map(|&i| (blocks[i].hash(), blocks[i].data())))?;

        // Cancellation here leaves an uncommitted log tail; open-time
        // recovery truncates it and sweeps the index.
        ctx.check()?;

        // 2. Index entries, before the log commit.
        let entries: Vec<(Multihash<64>, u64, u32)> = fresh
            .iter()
            .zip(locs.iter())
            .map(|(&i, &(offset, length))| (*blocks[i].hash(), offset, length))
            .collect();
        inner
            .mi
            .as_ref()
            .ok_or_else(|| StoreError::Corrupt("writable group without mutable index".into()))?
            .put_batch(&entries)?;

        // 3. Inflight accounting.
        inner.inflight_blocks += fresh.len() as u64;
        inner.inflight_size += fresh_bytes;

        Ok(accepted)
    }

    /// Make buffered puts durable and visible: flush the index, commit
    /// the log, fold inflight counters into committed, persist the head.
    pub fn sync(&self, ctx: &Ctx) -> Result<()> {
        let mut inner = self.inner.write();
        ctx.check()?;

        // Index durability must not lag the log head: flush it first.
        if let Some(mi) = inner.mi.as_ref() {
            mi.flush()?;
        }
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
        debug!(
            "synced group {} ({} blocks, {} bytes committed)",
            self.id(),
            inner.committed_blocks,
            inner.committed_size
        );
        Ok(())
    }
}
