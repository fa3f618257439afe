//! Streaming piece commitment (commP) over an archive byte stream.
//!
//! The commitment is the root of a binary Merkle tree over the fr32-padded
//! stream: every 127 input bytes expand to four 32-byte leaves (two zero
//! bits inserted per 254), interior nodes are SHA-256 of the child pair
//! truncated to 254 bits (top two bits of the last byte cleared), and the
//! tree is zero-padded up to a power-of-two piece of at least 128 padded
//! bytes.
//!
//! `CommpWriter` is an `io::Write` sink, so it can tee the archive stream
//! without materializing it.

use std::io::Write;

use anyhow::{anyhow, Result};
use cid::Cid;
use multihash::Multihash;
use sha2::{Digest, Sha256};

use crate::consts::{CODEC_FIL_COMMITMENT_UNSEALED, MH_SHA2_256_TRUNC254_PADDED};

const QUAD_SIZE: usize = 127;
const NODE_SIZE: usize = 32;
// 128 padded bytes = 4 leaves = a tree of height 2.
const MIN_TREE_LEVEL: u32 = 2;

type Node = [u8; NODE_SIZE];

/// SHA-256 of `l || r` truncated to 254 bits.
#[inline]
fn truncated_pair_hash(l: &Node, r: &Node) -> Node {
    let mut h = Sha256::new();
    h.update(l);
    h.update(r);
    let mut out: Node = h.finalize().into();
    out[NODE_SIZE - 1] &= 0x3f;
    out
}

/// Expand one 127-byte quad into four 254-bit leaves.
fn pad_quad(quad: &[u8; QUAD_SIZE]) -> [Node; 4] {
    let mut out = [[0u8; NODE_SIZE]; 4];

    // Leaf 0: bits 0..254.
    out[0][..31].copy_from_slice(&quad[..31]);
    out[0][31] = quad[31] & 0x3f;

    // Leaf 1: bits 254..508 (starts at bit 6 of byte 31).
    for i in 0..31 {
        out[1][i] = (quad[31 + i] >> 6) | (quad[32 + i] << 2);
    }
    out[1][31] = ((quad[62] >> 6) | (quad[63] << 2)) & 0x3f;

    // Leaf 2: bits 508..762 (starts at bit 4 of byte 63).
    for i in 0..31 {
        out[2][i] = (quad[63 + i] >> 4) | (quad[64 + i] << 4);
    }
    out[2][31] = ((quad[94] >> 4) | (quad[95] << 4)) & 0x3f;

    // Leaf 3: bits 762..1016 (starts at bit 2 of byte 95).
    for i in 0..31 {
        out[3][i] = (quad[95 + i] >> 2) | (quad[96 + i] << 6);
    }
    out[3][31] = quad[126] >> 2;

    out
}

/// Incremental commP computer.
pub struct CommpWriter {
    quad: [u8; QUAD_SIZE],
    quad_fill: usize,
    // (level, node), levels strictly decreasing towards the top.
    stack: Vec<(u32, Node)>,
    zero_nodes: Vec<Node>,
    bytes_in: u64,
}

impl Default for CommpWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl CommpWriter {
    pub fn new() -> Self {
        Self {
            quad: [0u8; QUAD_SIZE],
            quad_fill: 0,
            stack: Vec::new(),
            zero_nodes: vec![[0u8; NODE_SIZE]],
            bytes_in: 0,
        }
    }

    /// Raw (unpadded) bytes consumed so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_in
    }

    fn zero_node(&mut self, level: u32) -> Node {
        while self.zero_nodes.len() <= level as usize {
            let top = *self.zero_nodes.last().expect("seeded with level 0");
            self.zero_nodes.push(truncated_pair_hash(&top, &top));
        }
        self.zero_nodes[level as usize]
    }

    fn push_node(&mut self, level: u32, node: Node) {
        self.stack.push((level, node));
        while self.stack.len() >= 2 {
            let (la, _) = self.stack[self.stack.len() - 2];
            let (lb, _) = self.stack[self.stack.len() - 1];
            if la != lb {
                break;
            }
            let (_, r) = self.stack.pop().expect("len checked");
            let (_, l) = self.stack.pop().expect("len checked");
            self.stack.push((la + 1, truncated_pair_hash(&l, &r)));
        }
    }

    fn process_quad(&mut self) {
        debug_assert_eq!(self.quad_fill, QUAD_SIZE);
        let quad = self.quad;
        for leaf in pad_quad(&quad) {
            self.push_node(0, leaf);
        }
        self.quad_fill = 0;
    }

    fn push_bytes(&mut self, mut buf: &[u8]) {
        self.bytes_in += buf.len() as u64;
        while !buf.is_empty() {
            let take = (QUAD_SIZE - self.quad_fill).min(buf.len());
            self.quad[self.quad_fill..self.quad_fill + take].copy_from_slice(&buf[..take]);
            self.quad_fill += take;
            buf = &buf[take..];
            if self.quad_fill == QUAD_SIZE {
                self.process_quad();
            }
        }
    }

    /// Consume the writer and produce `(commp, padded_piece_size)`.
    pub fn finalize(mut self) -> Result<(Node, u64)> {
        if self.bytes_in == 0 {
            return Err(anyhow!("commp over empty stream"));
        }

        // Zero-fill the partial quad; trailing zero bytes pad to zero leaves.
        if self.quad_fill > 0 {
            self.quad[self.quad_fill..].fill(0);
            self.quad_fill = QUAD_SIZE;
            self.process_quad();
        }

        // Collapse to a single node, padding incomplete subtrees with
        // zero subtrees of the matching level.
        while self.stack.len() > 1 {
            let (top_level, _) = *self.stack.last().expect("non-empty");
            let z = self.zero_node(top_level);
            self.push_node(top_level, z);
        }

        let (mut level, mut root) = self.stack.pop().expect("at least one quad processed");
        while level < MIN_TREE_LEVEL {
            let z = self.zero_node(level);
            root = truncated_pair_hash(&root, &z);
            level += 1;
        }

        let padded_piece_size = (NODE_SIZE as u64) << level;
        Ok((root, padded_piece_size))
    }
}

impl Write for CommpWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.push_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Wrap a commP digest as a piece CID
/// (fil-commitment-unsealed / sha2-256-trunc254-padded).
pub fn piece_cid(commp: &Node) -> Result<Cid> {
    let mh = Multihash::<64>::wrap(MH_SHA2_256_TRUNC254_PADDED, commp)
        .map_err(|e| anyhow!("wrap piece commitment: {}", e))?;
    Ok(Cid::new_v1(CODEC_FIL_COMMITMENT_UNSEALED, mh))
}
