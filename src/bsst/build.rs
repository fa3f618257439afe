//! Static table construction.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::info;

use crate::consts::{BSST_SLOT_SIZE, BSST_TARGET_LOAD, BSST_VERSION};
use crate::hash::{home_slot, mix64, slot_tag};
use crate::metrics::record_bsst_build;
use crate::util::fsync_parent_dir;

use super::{read_slot, write_slot, BsstHeader};

pub struct BsstBuilder {
    slots: Vec<u8>,
    bucket_count: u64,
    expected: u64,
    inserted: u64,
    max_probe: u32,
    seed: u64,
}

impl BsstBuilder {
    /// Size the table for `entry_count` entries. Insertion order decides
    /// the final layout, so callers feed entries in sorted hash order to
    /// keep the build deterministic.
    pub fn new(entry_count: u64, seed: u64) -> Self {
        let want = ((entry_count as f64) / BSST_TARGET_LOAD).ceil() as u64;
        let bucket_count = want.max(1).next_power_of_two();
        Self {
            slots: vec![0u8; (bucket_count as usize) * BSST_SLOT_SIZE],
            bucket_count,
            expected: entry_count,
            inserted: 0,
            max_probe: 0,
            seed,
        }
    }

    pub fn insert(&mut self, hash: &[u8], offset: u64, length: u32) -> Result<()> {
        if self.inserted == self.bucket_count {
            return Err(anyhow!("static index table overflow"));
        }
        let mixed = mix64(hash, self.seed);
        let tag = slot_tag(mixed);
        let home = home_slot(mixed, self.bucket_count);

        let mask = self.bucket_count - 1;
        for dist in 0..self.bucket_count {
            let idx = ((home + dist) & mask) as usize;
            let (cur_tag, _, _) = read_slot(&self.slots, idx);
            if cur_tag == 0 {
                write_slot(&mut self.slots, idx, tag, offset, length);
                self.inserted += 1;
                self.max_probe = self.max_probe.max(dist as u32);
                return Ok(());
            }
        }
        Err(anyhow!("static index table full"))
    }

    /// Write the finished table atomically (tmp + rename), so a crash
    /// mid-build never leaves a readable partial file.
    pub fn finish(self, path: &Path) -> Result<BsstHeader> {
        if self.inserted != self.expected {
            return Err(anyhow!(
                "static index build incomplete: {} of {} entries inserted",
                self.inserted,
                self.expected
            ));
        }

        let header = BsstHeader {
            version: BSST_VERSION,
            entry_count: self.inserted,
            bucket_count: self.bucket_count,
            hash_seed: self.seed,
            max_probe: self.max_probe,
            payload_crc: crc32fast::hash(&self.slots),
        };

        let tmp = path.with_extension("bsst.tmp");
        let _ = fs::remove_file(&tmp);
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)
            .with_context(|| format!("open static index tmp {}", tmp.display()))?;
        f.write_all(&header.encode())?;
        f.write_all(&self.slots)?;
        f.sync_all()?;
        drop(f);

        fs::rename(&tmp, path)
            .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
        let _ = fsync_parent_dir(path);

        record_bsst_build(header.entry_count);
        info!(
            "built static index {} ({} entries, {} buckets, max probe {})",
            path.display(),
            header.entry_count,
            header.bucket_count,
            header.max_probe
        );
        Ok(header)
    }
}
