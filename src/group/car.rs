//! Archive streaming (CAR v1) and piece commitment.
//!
//! The archive is the depth-first, parent-before-children serialization
//! of the group DAG: a varint-framed DAG-CBOR header naming the root,
//! then every link block and leaf. The stream is produced by merging the
//! layer files with the leaf walk — no part of the tree is materialized
//! in memory — and is byte-deterministic for a given group.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use cid::Cid;
use log::info;
use serde::Serialize;

use crate::cardata;
use crate::commp::{piece_cid, CommpWriter};
use crate::consts::{ARITY_FILE, CAR_VERSION, LAYERS_FILE};
use crate::ctx::Ctx;
use crate::error::StoreError;
use crate::metrics::record_car_bytes;
use crate::util::write_varint_u64;

use super::core::{Group, GroupInner};
use super::state::GroupState;
use super::raw_cid;

#[derive(Serialize)]
struct CarHeader {
    roots: Vec<Cid>,
    version: u64,
}

/// Result of the packaging phase; the group's handle for deal placement.
#[derive(Debug, Clone)]
pub struct CommpResult {
    pub piece_cid: Cid,
    pub commp: [u8; 32],
    pub padded_piece_size: u64,
    pub root: Cid,
    pub archive_size: u64,
}

struct CountingWriter<'a> {
    w: &'a mut dyn Write,
    count: u64,
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.w.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.w.flush()
    }
}

fn read_ascii_usize(path: &Path) -> Result<usize> {
    let s = fs::read_to_string(path)
        .with_context(|| format!("read {}", path.display()))?;
    s.trim()
        .parse::<usize>()
        .map_err(|e| anyhow!(StoreError::Corrupt(format!("parse {}: {}", path.display(), e))))
}

impl Group {
    /// Stream the group archive into `out`. Holds the shared lock for the
    /// duration; requires the DAG layers to exist (state >= VrcarDone, not
    /// yet offloaded). Returns (archive_size, root_cid).
    pub fn write_car(&self, ctx: &Ctx, out: &mut dyn Write) -> Result<(u64, Cid)> {
        let inner = self.inner.read();
        ctx.check()?;
        if inner.state < GroupState::VrcarDone || inner.state.is_terminal() {
            return Err(StoreError::BadState {
                expected: GroupState::VrcarDone,
                actual: inner.state,
            }
            .into());
        }
        self.write_car_locked(ctx, &inner, out)
    }

    fn write_car_locked(
        &self,
        ctx: &Ctx,
        inner: &GroupInner,
        out: &mut dyn Write,
    ) -> Result<(u64, Cid)> {
        let vcar = self.vcar_dir();
        let layer_count = read_ascii_usize(&vcar.join(LAYERS_FILE))?;
        let arity = read_ascii_usize(&vcar.join(ARITY_FILE))?;
        if layer_count == 0 || arity < 2 {
            return Err(StoreError::Corrupt(format!(
                "bad DAG metadata (layers={}, arity={})",
                layer_count, arity
            ))
            .into());
        }

        let open_layer = |level: usize| -> Result<BufReader<File>> {
            let path = vcar.join(format!("layer{}.cardata", level));
            Ok(BufReader::new(
                OpenOptions::new()
                    .read(true)
                    .open(&path)
                    .with_context(|| format!("open layer file {}", path.display()))?,
            ))
        };
        let mut layers: Vec<BufReader<File>> = (1..=layer_count)
            .map(open_layer)
            .collect::<Result<_>>()?;

        // The top layer holds exactly the root block; read it for the
        // header, then rewind so the descent emits it again first.
        let (root, _) = cardata::read_block(&mut layers[layer_count - 1])?
            .ok_or_else(|| StoreError::Corrupt("top layer is empty".into()))?;
        layers[layer_count - 1] = open_layer(layer_count)?;

        let mut cw = CountingWriter { w: out, count: 0 };
        let header = serde_ipld_dagcbor::to_vec(&CarHeader {
            roots: vec![root],
            version: CAR_VERSION,
        })
        .context("encode car header")?;
        write_varint_u64(&mut cw, header.len() as u64)?;
        cw.write_all(&header).context("write car header")?;

        // Depth-first merge: descend through unwritten ancestors before
        // each leaf, ascend whenever a subtree completes.
        let mut wrote = vec![0usize; layer_count + 1];
        let mut at_layer = layer_count;

        let sht = inner.sht.as_ref().ok_or_else(|| {
            StoreError::Corrupt("sealed group without static index".into())
        })?;
        sht.iterate(|_tag, offset, length| {
            ctx.check()?;
            while at_layer > 0 {
                let (cid, payload) =
                    cardata::read_block(&mut layers[at_layer - 1])?.ok_or_else(|| {
                        StoreError::Corrupt(format!(
                            "layer {} exhausted after {} block(s)",
                            at_layer, wrote[at_layer]
                        ))
                    })?;
                cardata::write_block(&mut cw, &cid, &payload)?;
                wrote[at_layer] += 1;
                at_layer -= 1;
            }

            let (mh, data) = inner.log.read_frame(offset, length)?;
            cardata::write_block(&mut cw, &raw_cid(&mh), &data)?;
            wrote[0] += 1;

            while wrote[at_layer] == arity {
                wrote[at_layer] = 0;
                at_layer += 1;
            }
            Ok(())
        })?;

        cw.flush().context("flush car stream")?;
        record_car_bytes(cw.count);
        Ok((cw.count, root))
    }

    /// Compute the piece commitment by streaming the archive into the
    /// commP computer (no archive file is materialized), then persist the
    /// result and advance to HasCommP.
    pub fn gen_commp(&self, ctx: &Ctx) -> Result<CommpResult> {
        // Streaming happens under the shared lock; only the state update
        // takes the write lock.
        let (archive_size, root, commp, padded_piece_size) = {
            let inner = self.inner.read();
            ctx.check()?;
            if inner.state != GroupState::VrcarDone {
                return Err(StoreError::BadState {
                    expected: GroupState::VrcarDone,
                    actual: inner.state,
                }
                .into());
            }
            let mut cc = CommpWriter::new();
            let (size, root) = self.write_car_locked(ctx, &inner, &mut cc)?;
            let (commp, padded) = cc.finalize()?;
            (size, root, commp, padded)
        };
        let piece = piece_cid(&commp)?;

        let mut inner = self.inner.write();
        ctx.check()?;
        if inner.state != GroupState::VrcarDone {
            return Err(StoreError::BadState {
                expected: GroupState::VrcarDone,
                actual: inner.state,
            }
            .into());
        }
        self.registry().set_commp(
            self.id(),
            GroupState::HasCommP,
            &commp,
            padded_piece_size,
            &root,
            archive_size,
        )?;
        inner.state = GroupState::HasCommP;

        info!(
            "group {}: piece {} ({} padded bytes over a {} byte archive, root {})",
            self.id(),
            piece,
            padded_piece_size,
            archive_size,
            root
        );
        Ok(CommpResult {
            piece_cid: piece,
            commp,
            padded_piece_size,
            root,
            archive_size,
        })
    }
}
