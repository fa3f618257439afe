//! Read path: view and iterate.

use std::sync::atomic::Ordering;

use anyhow::{anyhow, Context, Result};
use multihash::Multihash;

use crate::ctx::Ctx;
use crate::error::StoreError;
use crate::metrics::record_group_read;

use super::core::{Group, GroupInner};

impl Group {
    /// Resolve each hash and hand its payload to `cb(index, payload)`,
    /// exactly once per found hash in input order. A missing hash aborts
    /// with `NotFound`. Only committed entries are visible.
    pub fn view(
        &self,
        ctx: &Ctx,
        hashes: &[Multihash<64>],
        mut cb: impl FnMut(usize, &[u8]),
    ) -> Result<()> {
        let inner = self.inner.read();
        for (i, mh) in hashes.iter().enumerate() {
            ctx.check()?;
            let data = read_one(&inner, mh)?;
            self.read_blocks.fetch_add(1, Ordering::Relaxed);
            self.read_size.fetch_add(data.len() as u64, Ordering::Relaxed);
            record_group_read(1, data.len() as u64);
            cb(i, &data);
        }
        Ok(())
    }

    /// Walk every committed block. Sealed groups iterate in static-table
    /// slot order (the group's canonical block order); writable groups
    /// fall back to log insertion order.
    pub fn iterate(
        &self,
        ctx: &Ctx,
        mut cb: impl FnMut(&Multihash<64>, &[u8]) -> Result<()>,
    ) -> Result<()> {
        let inner = self.inner.read();
        match inner.sht.as_ref() {
            Some(sht) => sht.iterate(|_tag, offset, length| {
                ctx.check()?;
                let (mh, data) = inner.log.read_frame(offset, length)?;
                cb(&mh, &data)
            }),
            None => inner.log.iterate(|mh, data| {
                ctx.check()?;
                cb(mh, data)
            }),
        }
    }
}

fn read_one(inner: &GroupInner, mh: &Multihash<64>) -> Result<Vec<u8>> {
    // The mutable index is the live one for as long as it exists (it is
    // complete through the seal); afterwards lookups go to the static
    // table.
    let loc = if let Some(mi) = inner.mi.as_ref() {
        mi.get(mh)?
    } else if let Some(sht) = inner.sht.as_ref() {
        sht.lookup(mh)?
    } else {
        return Err(StoreError::Corrupt("group has no index".into()).into());
    };

    let Some((offset, length)) = loc else {
        return Err(anyhow!(StoreError::NotFound))
            .with_context(|| format!("block {:02x?}", mh.digest()));
    };
    // Entries past the committed head are inflight; invisible to readers.
    if offset >= inner.log.committed_len() {
        return Err(anyhow!(StoreError::NotFound))
            .with_context(|| format!("block {:02x?} is not committed yet", mh.digest()));
    }

    let (got, data) = inner.log.read_frame(offset, length)?;
    if got != *mh {
        return Err(StoreError::Corrupt(format!(
            "index entry for {:02x?} points at a different block",
            mh.digest()
        ))
        .into());
    }
    Ok(data)
}
