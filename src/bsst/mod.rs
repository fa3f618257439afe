//! Static hash table (`index.bsst`), built once when a group seals.
//!
//! Format (LE):
//! - header: [magic8 "BSSTv001"][version u32][entry_count u64]
//!   [bucket_count u64][hash_seed u64][max_probe u32][payload_crc u32]
//! - payload: bucket_count dense slots of [tag u64][offset u64][length u32]
//!
//! An all-zero tag marks an empty slot (real tags are remapped away from
//! zero). `bucket_count` is a power of two sized for the target load
//! factor; collisions resolve by linear probing with wraparound, and the
//! longest probe distance used during build is stored in the header to
//! bound lookups. `payload_crc` is CRC32 over the slot region.
//!
//! Building from entries in sorted hash order makes the file a pure
//! function of the entry set, so rebuilds are byte-identical.

mod build;
mod reader;

pub use build::BsstBuilder;
pub use reader::Bsst;

use anyhow::Result;
use byteorder::{ByteOrder, LittleEndian};

use crate::consts::{BSST_HDR_SIZE, BSST_MAGIC, BSST_SLOT_SIZE, BSST_VERSION};
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BsstHeader {
    pub version: u32,
    pub entry_count: u64,
    pub bucket_count: u64,
    pub hash_seed: u64,
    pub max_probe: u32,
    pub payload_crc: u32,
}

impl BsstHeader {
    pub fn encode(&self) -> [u8; BSST_HDR_SIZE] {
        let mut buf = [0u8; BSST_HDR_SIZE];
        buf[..8].copy_from_slice(BSST_MAGIC);
        LittleEndian::write_u32(&mut buf[8..12], self.version);
        LittleEndian::write_u64(&mut buf[12..20], self.entry_count);
        LittleEndian::write_u64(&mut buf[20..28], self.bucket_count);
        LittleEndian::write_u64(&mut buf[28..36], self.hash_seed);
        LittleEndian::write_u32(&mut buf[36..40], self.max_probe);
        LittleEndian::write_u32(&mut buf[40..44], self.payload_crc);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < BSST_HDR_SIZE {
            return Err(StoreError::Corrupt("static index header too short".into()).into());
        }
        if &buf[..8] != BSST_MAGIC {
            return Err(StoreError::Corrupt("bad static index magic".into()).into());
        }
        let version = LittleEndian::read_u32(&buf[8..12]);
        if version != BSST_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported static index version {}",
                version
            ))
            .into());
        }
        let bucket_count = LittleEndian::read_u64(&buf[20..28]);
        if bucket_count == 0 || !bucket_count.is_power_of_two() {
            return Err(StoreError::Corrupt(format!(
                "bad static index bucket count {}",
                bucket_count
            ))
            .into());
        }
        Ok(Self {
            version,
            entry_count: LittleEndian::read_u64(&buf[12..20]),
            bucket_count,
            hash_seed: LittleEndian::read_u64(&buf[28..36]),
            max_probe: LittleEndian::read_u32(&buf[36..40]),
            payload_crc: LittleEndian::read_u32(&buf[40..44]),
        })
    }
}

#[inline]
pub(crate) fn read_slot(buf: &[u8], idx: usize) -> (u64, u64, u32) {
    let p = idx * BSST_SLOT_SIZE;
    (
        LittleEndian::read_u64(&buf[p..p + 8]),
        LittleEndian::read_u64(&buf[p + 8..p + 16]),
        LittleEndian::read_u32(&buf[p + 16..p + 20]),
    )
}

#[inline]
pub(crate) fn write_slot(buf: &mut [u8], idx: usize, tag: u64, offset: u64, length: u32) {
    let p = idx * BSST_SLOT_SIZE;
    LittleEndian::write_u64(&mut buf[p..p + 8], tag);
    LittleEndian::write_u64(&mut buf[p + 8..p + 16], offset);
    LittleEndian::write_u32(&mut buf[p + 16..p + 20], length);
}
