//! Shared format constants (group layout, log, static index, DAG, CAR).

// -------- Group directory layout --------
pub const LOCK_FILE: &str = "LOCK";
pub const LOG_META_FILE: &str = "blk.jbmeta";
pub const LOG_META_OLD_SUFFIX: &str = "old";
pub const LOG_DATA_FILE: &str = "blk.jblog";
pub const INDEX_DIR: &str = "index";
pub const BSST_FILE: &str = "index.bsst";
pub const VCAR_DIR: &str = "vcar";
pub const LAYERS_FILE: &str = "layers";
pub const ARITY_FILE: &str = "arity";

// -------- Log head --------
pub const HEAD_VERSION: u32 = 1;

// -------- Static hash table (BSST) --------
pub const BSST_MAGIC: &[u8; 8] = b"BSSTv001";
pub const BSST_VERSION: u32 = 1;
// [magic8][version u32][entry_count u64][bucket_count u64][hash_seed u64][max_probe u32][payload_crc u32]
pub const BSST_HDR_SIZE: usize = 44;
// [tag u64][offset u64][length u32]
pub const BSST_SLOT_SIZE: usize = 20;
// Bucket count is the next power of two that keeps the load at or below this.
pub const BSST_TARGET_LOAD: f64 = 0.7;
// Fixed seed so rebuilds of the same entry set are byte-identical.
pub const BSST_HASH_SEED: u64 = 0;

// -------- Merkle DAG --------
pub const DAG_ARITY: usize = 2048;

// -------- Size policy --------
// Soft cap on committed + inflight payload bytes per group.
pub const DEFAULT_MAX_GROUP_SIZE: u64 = 8000 << 20;

// -------- Multicodec / multihash codes --------
pub const CODEC_RAW: u64 = 0x55;
pub const CODEC_DAG_CBOR: u64 = 0x71;
pub const CODEC_FIL_COMMITMENT_UNSEALED: u64 = 0xf101;
pub const MH_SHA2_256: u64 = 0x12;
pub const MH_SHA2_256_TRUNC254_PADDED: u64 = 0x1012;

// -------- CAR --------
pub const CAR_VERSION: u64 = 1;
