//! Static table lookups and iteration.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use multihash::Multihash;

use crate::consts::{BSST_HDR_SIZE, BSST_SLOT_SIZE};
use crate::error::StoreError;
use crate::hash::{home_slot, mix64, slot_tag};
use crate::util::read_exact_at;

use super::{read_slot, BsstHeader};

#[derive(Debug)]
pub struct Bsst {
    file: File,
    path: PathBuf,
    header: BsstHeader,
}

impl Bsst {
    /// Open and fully validate the table: header sanity plus a CRC pass
    /// over the slot region. An invalid file is reported as `Corrupt`;
    /// the caller deletes it and rebuilds.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .open(path)
            .with_context(|| format!("open static index {}", path.display()))?;

        let mut hdr = [0u8; BSST_HDR_SIZE];
        read_exact_at(&file, path, &mut hdr, 0)?;
        let header = BsstHeader::decode(&hdr)?;

        let payload_len = header
            .bucket_count
            .checked_mul(BSST_SLOT_SIZE as u64)
            .ok_or_else(|| StoreError::Corrupt("static index payload overflow".into()))?;
        let file_len = file.metadata()?.len();
        if file_len != BSST_HDR_SIZE as u64 + payload_len {
            return Err(StoreError::Corrupt(format!(
                "static index {} has length {}, want {}",
                path.display(),
                file_len,
                BSST_HDR_SIZE as u64 + payload_len
            ))
            .into());
        }

        // CRC over the whole slot region, streamed.
        let mut hasher = crc32fast::Hasher::new();
        let mut r = BufReader::new(
            OpenOptions::new()
                .read(true)
                .open(path)
                .with_context(|| format!("open static index {}", path.display()))?,
        );
        r.seek_relative(BSST_HDR_SIZE as i64)?;
        let mut buf = vec![0u8; 1 << 16];
        loop {
            let n = r.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let crc = hasher.finalize();
        if crc != header.payload_crc {
            return Err(StoreError::Corrupt(format!(
                "static index {} CRC mismatch (stored={}, calc={})",
                path.display(),
                header.payload_crc,
                crc
            ))
            .into());
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            header,
        })
    }

    pub fn header(&self) -> &BsstHeader {
        &self.header
    }

    pub fn entry_count(&self) -> u64 {
        self.header.entry_count
    }

    /// Point lookup. `None` when the hash is absent.
    pub fn lookup(&self, mh: &Multihash<64>) -> Result<Option<(u64, u32)>> {
        if self.header.entry_count == 0 {
            return Ok(None);
        }
        let key = mh.to_bytes();
        let mixed = mix64(&key, self.header.hash_seed);
        let tag = slot_tag(mixed);
        let home = home_slot(mixed, self.header.bucket_count);

        let probes = (self.header.max_probe as u64 + 1).min(self.header.bucket_count);
        let window = self.read_slot_window(home, probes)?;
        for i in 0..probes as usize {
            let (cur_tag, offset, length) = read_slot(&window, i);
            if cur_tag == 0 {
                return Ok(None);
            }
            if cur_tag == tag {
                return Ok(Some((offset, length)));
            }
        }
        Ok(None)
    }

    /// Visit every live slot in slot order: `(tag, offset, length)`.
    /// This order defines the group's block order once sealed.
    pub fn iterate(&self, mut f: impl FnMut(u64, u64, u32) -> Result<()>) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .open(&self.path)
            .with_context(|| format!("open static index {}", self.path.display()))?;
        let mut r = BufReader::new(file);

        let mut hdr = [0u8; BSST_HDR_SIZE];
        r.read_exact(&mut hdr)?;

        let mut slot = [0u8; BSST_SLOT_SIZE];
        for _ in 0..self.header.bucket_count {
            r.read_exact(&mut slot).map_err(|e| {
                anyhow::anyhow!(StoreError::Corrupt(format!(
                    "truncated static index: {}",
                    e
                )))
            })?;
            let (tag, offset, length) = read_slot(&slot, 0);
            if tag == 0 {
                continue;
            }
            f(tag, offset, length)?;
        }
        Ok(())
    }

    /// Read `count` slots starting at `start`, wrapping at the end of the
    /// table. At most two positional reads.
    fn read_slot_window(&self, start: u64, count: u64) -> Result<Vec<u8>> {
        let mut out = vec![0u8; (count as usize) * BSST_SLOT_SIZE];
        let first = count.min(self.header.bucket_count - start);
        let first_bytes = (first as usize) * BSST_SLOT_SIZE;
        let off = BSST_HDR_SIZE as u64 + start * BSST_SLOT_SIZE as u64;
        read_exact_at(&self.file, &self.path, &mut out[..first_bytes], off)?;
        if first < count {
            read_exact_at(
                &self.file,
                &self.path,
                &mut out[first_bytes..],
                BSST_HDR_SIZE as u64,
            )?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsst::BsstBuilder;
    use crate::consts::{BSST_HASH_SEED, MH_SHA2_256};
    use sha2::{Digest, Sha256};

    fn mh_of(data: &[u8]) -> Multihash<64> {
        Multihash::wrap(MH_SHA2_256, &Sha256::digest(data)).unwrap()
    }

    fn build_with(entries: &[(Multihash<64>, u64, u32)], path: &Path) -> BsstHeader {
        // Sorted hash order, as the seal path feeds it.
        let mut sorted: Vec<_> = entries.to_vec();
        sorted.sort_by_key(|(mh, _, _)| mh.to_bytes());
        let mut b = BsstBuilder::new(sorted.len() as u64, BSST_HASH_SEED);
        for (mh, off, len) in &sorted {
            b.insert(&mh.to_bytes(), *off, *len).unwrap();
        }
        b.finish(path).unwrap()
    }

    #[test]
    fn build_lookup_iterate() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("index.bsst");

        let entries: Vec<_> = (0..500u32)
            .map(|i| (mh_of(format!("blk-{}", i).as_bytes()), i as u64 * 64, 64))
            .collect();
        let header = build_with(&entries, &path);
        assert_eq!(header.entry_count, 500);
        assert!(header.bucket_count >= 500);

        let t = Bsst::open(&path).unwrap();
        for (mh, off, len) in &entries {
            assert_eq!(t.lookup(mh).unwrap(), Some((*off, *len)));
        }
        assert_eq!(t.lookup(&mh_of(b"not-there")).unwrap(), None);

        let mut n = 0u64;
        let mut offsets = std::collections::HashSet::new();
        t.iterate(|tag, off, len| {
            assert_ne!(tag, 0);
            assert_eq!(len, 64);
            offsets.insert(off);
            n += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(n, 500);
        assert_eq!(offsets.len(), 500);
    }

    #[test]
    fn build_is_deterministic() {
        let td = tempfile::tempdir().unwrap();
        let p1 = td.path().join("a.bsst");
        let p2 = td.path().join("b.bsst");

        let entries: Vec<_> = (0..100u32)
            .map(|i| (mh_of(format!("d-{}", i).as_bytes()), i as u64, 10))
            .collect();
        build_with(&entries, &p1);
        build_with(&entries, &p2);
        assert_eq!(std::fs::read(&p1).unwrap(), std::fs::read(&p2).unwrap());
    }

    #[test]
    fn corrupt_payload_fails_open() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("index.bsst");
        build_with(&[(mh_of(b"only"), 0, 4)], &path);

        let mut bytes = std::fs::read(&path).unwrap();
        let n = bytes.len();
        bytes[n - 1] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let err = Bsst::open(&path).unwrap_err();
        assert!(crate::error::is_corrupt(&err));
    }

    #[test]
    fn empty_table_lookup_is_none() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("index.bsst");
        let b = BsstBuilder::new(0, BSST_HASH_SEED);
        b.finish(&path).unwrap();

        let t = Bsst::open(&path).unwrap();
        assert_eq!(t.lookup(&mh_of(b"x")).unwrap(), None);
    }
}
