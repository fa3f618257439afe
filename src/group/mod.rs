//! Group store: binds the block log and the live index to a directory,
//! enforces the size cap, and drives the seal/packaging lifecycle.
//!
//! Layout:
//! - state.rs — lifecycle state machine
//! - core.rs  — Group struct, open/create/close, locking, counters
//! - write.rs — put / sync
//! - read.rs  — view / iterate
//! - seal.rs  — finalize (mutable index -> static table)
//! - dag.rs   — layered Merkle DAG generation
//! - car.rs   — archive streaming and piece commitment

pub mod state;

mod car;
mod core;
mod dag;
mod read;
mod seal;
mod write;

pub use car::CommpResult;
pub use core::Group;
pub use state::GroupState;

use std::path::{Path, PathBuf};

use cid::Cid;
use multihash::Multihash;
use sha2::{Digest, Sha256};

use crate::consts::{CODEC_RAW, MH_SHA2_256};
use crate::util::format_base32;

/// A content-addressed block: multihash plus payload. The multihash is
/// trusted to identify the payload; `from_data` computes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    hash: Multihash<64>,
    data: Vec<u8>,
}

impl Block {
    /// Wrap pre-hashed data. The caller vouches that `hash` matches.
    pub fn new(hash: Multihash<64>, data: Vec<u8>) -> Self {
        Self { hash, data }
    }

    /// Hash `data` with the group's hash function (SHA-256).
    pub fn from_data(data: Vec<u8>) -> Self {
        let digest = Sha256::digest(&data);
        let hash = Multihash::wrap(MH_SHA2_256, &digest).expect("sha-256 digest fits a multihash");
        Self { hash, data }
    }

    pub fn hash(&self) -> &Multihash<64> {
        &self.hash
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// CIDv1 with the raw codec over a block multihash; the leaf identity in
/// the group DAG and archive.
#[inline]
pub fn raw_cid(mh: &Multihash<64>) -> Cid {
    Cid::new_v1(CODEC_RAW, *mh)
}

/// Per-group tunables.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// Soft cap on committed + inflight payload bytes.
    pub max_group_size: u64,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            max_group_size: crate::consts::DEFAULT_MAX_GROUP_SIZE,
        }
    }
}

/// Directory of a group under the store root: `<root>/grp/<id base32>`.
pub fn group_dir(root: &Path, id: crate::registry::GroupId) -> PathBuf {
    root.join("grp").join(format_base32(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_from_data_hashes_sha256() {
        let b = Block::from_data(b"hello world".to_vec());
        assert_eq!(b.hash().code(), MH_SHA2_256);
        assert_eq!(b.hash().digest(), &Sha256::digest(b"hello world")[..]);
        assert_eq!(b.len(), 11);
    }

    #[test]
    fn raw_cid_wraps_multihash() {
        let b = Block::from_data(b"x".to_vec());
        let c = raw_cid(b.hash());
        assert_eq!(c.codec(), CODEC_RAW);
        assert_eq!(c.hash(), b.hash());
    }

    #[test]
    fn group_dir_uses_base32_id() {
        let d = group_dir(Path::new("/data"), 1234);
        assert_eq!(d, PathBuf::from("/data/grp/16i"));
    }
}
