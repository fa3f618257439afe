//! Mutable per-group index, live only while the group is writable.
//!
//! Backed by an embedded ordered KV store (sled): key = raw multihash
//! bytes, value = 12 bytes LE `[offset u64][length u32]`. Batches apply
//! atomically; iteration is lexicographic key order, which is the
//! deterministic order the static table is later built from.
//!
//! Durability is cooperative with the block log: index batches land after
//! the log append but before the log commit, so on open every entry
//! pointing past the committed log length is swept.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};
use multihash::Multihash;

use crate::error::StoreError;

const VALUE_SIZE: usize = 12;

pub struct MemIndex {
    db: sled::Db,
    dir: PathBuf,
}

#[inline]
fn encode_value(offset: u64, length: u32) -> [u8; VALUE_SIZE] {
    let mut v = [0u8; VALUE_SIZE];
    LittleEndian::write_u64(&mut v[..8], offset);
    LittleEndian::write_u32(&mut v[8..], length);
    v
}

#[inline]
fn decode_value(v: &[u8]) -> Result<(u64, u32)> {
    if v.len() != VALUE_SIZE {
        return Err(StoreError::Corrupt(format!(
            "index value has {} bytes, want {}",
            v.len(),
            VALUE_SIZE
        ))
        .into());
    }
    Ok((
        LittleEndian::read_u64(&v[..8]),
        LittleEndian::read_u32(&v[8..]),
    ))
}

impl MemIndex {
    /// Open (or create) the index under `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        let db = sled::open(dir)
            .with_context(|| format!("open mutable index at {}", dir.display()))?;
        Ok(Self {
            db,
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Insert a batch atomically. Existing keys are overwritten (values
    /// are equal for equal hashes, so this is idempotent).
    pub fn put_batch(&self, entries: &[(Multihash<64>, u64, u32)]) -> Result<()> {
        let mut batch = sled::Batch::default();
        for (mh, offset, length) in entries {
            batch.insert(mh.to_bytes(), &encode_value(*offset, *length)[..]);
        }
        self.db
            .apply_batch(batch)
            .context("apply mutable index batch")?;
        Ok(())
    }

    pub fn get(&self, mh: &Multihash<64>) -> Result<Option<(u64, u32)>> {
        match self.db.get(mh.to_bytes()).context("mutable index get")? {
            Some(v) => Ok(Some(decode_value(&v)?)),
            None => Ok(None),
        }
    }

    /// Walk all entries in lexicographic hash order.
    pub fn iterate_ordered(
        &self,
        mut f: impl FnMut(&Multihash<64>, u64, u32) -> Result<()>,
    ) -> Result<()> {
        for item in self.db.iter() {
            let (k, v) = item.context("mutable index iteration")?;
            let mh = Multihash::<64>::from_bytes(&k)
                .map_err(|e| anyhow!(StoreError::Corrupt(format!("bad index key: {}", e))))?;
            let (offset, length) = decode_value(&v)?;
            f(&mh, offset, length)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush().context("flush mutable index")?;
        Ok(())
    }

    /// Recovery rule: remove every entry whose frame starts at or past the
    /// committed log length. Returns the number of entries removed.
    pub fn sweep_uncommitted(&self, committed_len: u64) -> Result<u64> {
        let mut doomed = Vec::new();
        for item in self.db.iter() {
            let (k, v) = item.context("mutable index sweep")?;
            let (offset, _) = decode_value(&v)?;
            if offset >= committed_len {
                doomed.push(k);
            }
        }
        if doomed.is_empty() {
            return Ok(0);
        }
        let mut batch = sled::Batch::default();
        for k in &doomed {
            batch.remove(k.clone());
        }
        self.db.apply_batch(batch).context("apply sweep batch")?;
        self.db.flush().context("flush after sweep")?;
        debug!(
            "swept {} uncommitted index entries above offset {}",
            doomed.len(),
            committed_len
        );
        Ok(doomed.len() as u64)
    }

    /// Drop the index: release the handle and remove its directory.
    pub fn destroy(self) -> Result<()> {
        let dir = self.dir.clone();
        drop(self.db);
        fs::remove_dir_all(&dir)
            .with_context(|| format!("remove mutable index dir {}", dir.display()))?;
        info!("dropped mutable index at {}", dir.display());
        Ok(())
    }
}
