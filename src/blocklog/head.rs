//! Log head record.
//!
//! On-disk format (`blk.jbmeta`): one DAG-CBOR map
//! `{ v: u32, ro: bool, ret: bool, len: u64, cnt: u64, crc: u32 }`
//! where `crc` is CRC32 over the same record encoded with `crc = 0`.
//!
//! Rewrites go tmp + fsync + rename; the previous head survives as
//! `blk.jbmeta.old`, so a torn write of the active file is recovered by
//! falling back to the old one. The newest file with a valid CRC wins.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::consts::{HEAD_VERSION, LOG_META_OLD_SUFFIX};
use crate::error::StoreError;
use crate::util::fsync_parent_dir;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogHead {
    /// Format version.
    pub v: u32,
    /// Log is read-only; appends are rejected.
    pub ro: bool,
    /// Group data has been offloaded; payload reads must go elsewhere.
    pub ret: bool,
    /// Committed log length in bytes.
    pub len: u64,
    /// Committed block count.
    pub cnt: u64,
    /// CRC32 over this record encoded with `crc = 0`.
    pub crc: u32,
}

impl Default for LogHead {
    fn default() -> Self {
        Self {
            v: HEAD_VERSION,
            ro: false,
            ret: false,
            len: 0,
            cnt: 0,
            crc: 0,
        }
    }
}

impl LogHead {
    fn crc_of(&self) -> Result<u32> {
        let mut zeroed = self.clone();
        zeroed.crc = 0;
        let bytes = serde_ipld_dagcbor::to_vec(&zeroed).context("encode log head")?;
        Ok(crc32fast::hash(&bytes))
    }

    /// Encode with a freshly computed CRC.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut h = self.clone();
        h.crc = h.crc_of()?;
        serde_ipld_dagcbor::to_vec(&h).context("encode log head")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let h: LogHead = serde_ipld_dagcbor::from_slice(bytes)
            .map_err(|e| anyhow!(StoreError::Corrupt(format!("decode log head: {}", e))))?;
        if h.v != HEAD_VERSION {
            return Err(StoreError::Corrupt(format!("unsupported head version {}", h.v)).into());
        }
        let want = h.crc_of()?;
        if want != h.crc {
            return Err(StoreError::Corrupt(format!(
                "log head CRC mismatch (stored={}, calc={})",
                h.crc, want
            ))
            .into());
        }
        Ok(h)
    }
}

pub fn old_head_path(meta_path: &Path) -> PathBuf {
    let name = meta_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    meta_path.with_file_name(format!("{}.{}", name, LOG_META_OLD_SUFFIX))
}

fn tmp_head_path(meta_path: &Path) -> PathBuf {
    let name = meta_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    meta_path.with_file_name(format!("{}.tmp", name))
}

/// Read and validate a single head file.
pub fn read_head_file(path: &Path) -> Result<LogHead> {
    let bytes =
        fs::read(path).with_context(|| format!("read log head {}", path.display()))?;
    LogHead::decode(&bytes)
}

/// Durably replace the head: tmp + fsync + rotate the previous head to
/// `.old` + rename + fsync parent directory.
pub fn write_head(meta_path: &Path, head: &LogHead) -> Result<()> {
    let bytes = head.encode()?;

    let tmp = tmp_head_path(meta_path);
    let _ = fs::remove_file(&tmp);
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .with_context(|| format!("open head tmp {}", tmp.display()))?;
    f.write_all(&bytes)?;
    f.sync_all()?;
    drop(f);

    if meta_path.exists() {
        let old = old_head_path(meta_path);
        fs::rename(meta_path, &old)
            .with_context(|| format!("rotate {} -> {}", meta_path.display(), old.display()))?;
    }
    fs::rename(&tmp, meta_path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), meta_path.display()))?;
    let _ = fsync_parent_dir(meta_path);
    Ok(())
}

/// Load the head, preferring the active file and falling back to `.old`
/// when the active one is missing or fails its CRC.
pub fn load_head(meta_path: &Path) -> Result<LogHead> {
    match read_head_file(meta_path) {
        Ok(h) => Ok(h),
        Err(active_err) => {
            let old = old_head_path(meta_path);
            match read_head_file(&old) {
                Ok(h) => {
                    warn!(
                        "log head {} unusable ({}); recovered from {}",
                        meta_path.display(),
                        active_err,
                        old.display()
                    );
                    Ok(h)
                }
                Err(_) => Err(anyhow!(StoreError::Corrupt(format!(
                    "no usable log head at {}: {}",
                    meta_path.display(),
                    active_err
                )))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_roundtrip_and_crc() {
        let h = LogHead {
            v: HEAD_VERSION,
            ro: true,
            ret: false,
            len: 12345,
            cnt: 42,
            crc: 0,
        };
        let bytes = h.encode().unwrap();
        let got = LogHead::decode(&bytes).unwrap();
        assert_eq!(got.len, 12345);
        assert_eq!(got.cnt, 42);
        assert!(got.ro);

        // Flip a payload byte: CRC must catch it.
        let mut bad = bytes.clone();
        let n = bad.len();
        bad[n / 2] ^= 0xff;
        assert!(LogHead::decode(&bad).is_err());
    }

    #[test]
    fn torn_active_head_falls_back_to_old() {
        let td = tempfile::tempdir().unwrap();
        let meta = td.path().join("blk.jbmeta");

        let mut h = LogHead {
            len: 100,
            cnt: 1,
            ..LogHead::default()
        };
        write_head(&meta, &h).unwrap();

        h.len = 200;
        h.cnt = 2;
        write_head(&meta, &h).unwrap();

        // Tear the active file: loader must pick up the previous head.
        std::fs::write(&meta, b"garbage").unwrap();
        let got = load_head(&meta).unwrap();
        assert_eq!(got.len, 100);
        assert_eq!(got.cnt, 1);
    }

    #[test]
    fn both_heads_bad_is_corrupt() {
        let td = tempfile::tempdir().unwrap();
        let meta = td.path().join("blk.jbmeta");
        std::fs::write(&meta, b"junk").unwrap();
        assert!(load_head(&meta).is_err());
    }
}
