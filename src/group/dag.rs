//! Layered Merkle DAG generation over a sealed group.
//!
//! Walks the static-table slot order accumulating leaf CIDs into
//! fixed-arity link blocks (DAG-CBOR arrays of child CIDs), one layer
//! file per tree level, bottom up. A layer that emits exactly one block
//! ends the tree; that block is the DAG root. The `layers` and `arity`
//! files record what the archive writer needs to re-read the layers.

use std::fs::{self, File};
use std::io::{BufWriter, Write};

use anyhow::{anyhow, Context, Result};
use cid::Cid;
use log::info;
use multihash::Multihash;
use sha2::{Digest, Sha256};

use crate::cardata;
use crate::consts::{ARITY_FILE, CODEC_DAG_CBOR, DAG_ARITY, LAYERS_FILE, MH_SHA2_256};
use crate::ctx::Ctx;
use crate::error::StoreError;

use super::core::Group;
use super::state::GroupState;
use super::raw_cid;

/// Serialize `links` as a DAG-CBOR array and derive its CID.
fn make_link_block(links: &[Cid]) -> Result<(Cid, Vec<u8>)> {
    let payload = serde_ipld_dagcbor::to_vec(&links).context("encode link block")?;
    let mh = Multihash::wrap(MH_SHA2_256, &Sha256::digest(&payload))
        .map_err(|e| anyhow!("wrap link block hash: {}", e))?;
    Ok((Cid::new_v1(CODEC_DAG_CBOR, mh), payload))
}

impl Group {
    /// Generate `vcar/layer{1..K}.cardata` plus the `layers` and `arity`
    /// metadata files, then advance to VrcarDone. Re-entry after a crash
    /// rebuilds the directory from scratch.
    pub fn gen_top_car(&self, ctx: &Ctx) -> Result<()> {
        let mut inner = self.inner.write();
        ctx.check()?;

        if inner.state != GroupState::LevelIndexDropped {
            return Err(StoreError::BadState {
                expected: GroupState::LevelIndexDropped,
                actual: inner.state,
            }
            .into());
        }

        let vcar = self.vcar_dir();
        if vcar.exists() {
            fs::remove_dir_all(&vcar)
                .with_context(|| format!("clear vcar dir {}", vcar.display()))?;
        }
        fs::create_dir_all(&vcar)
            .with_context(|| format!("create vcar dir {}", vcar.display()))?;

        let layer_path = |level: usize| vcar.join(format!("layer{}.cardata", level));

        // Layer 1: link blocks over the leaves, in block order.
        let mut level = 1usize;
        let mut links: Vec<Cid> = Vec::with_capacity(DAG_ARITY);
        let mut next_links: Vec<Cid> = Vec::new();
        {
            let sht = inner.sht.as_ref().ok_or_else(|| {
                StoreError::Corrupt("sealed group without static index".into())
            })?;
            if sht.entry_count() == 0 {
                return Err(anyhow!("group {} has no blocks to build a DAG over", self.id()));
            }

            let mut out = BufWriter::new(
                File::create(layer_path(level))
                    .with_context(|| format!("create layer {} file", level))?,
            );
            sht.iterate(|_tag, offset, length| {
                ctx.check()?;
                let (mh, _) = inner.log.read_frame(offset, length)?;
                links.push(raw_cid(&mh));
                if links.len() == DAG_ARITY {
                    let (cid, payload) = make_link_block(&links)?;
                    cardata::write_block(&mut out, &cid, &payload)?;
                    next_links.push(cid);
                    links.clear();
                }
                Ok(())
            })?;
            if !links.is_empty() {
                let (cid, payload) = make_link_block(&links)?;
                cardata::write_block(&mut out, &cid, &payload)?;
                next_links.push(cid);
                links.clear();
            }
            out.flush().context("flush layer 1")?;
        }

        // Upper layers, from the in-memory CID lists, until a layer holds
        // a single block: the DAG root.
        let mut prev = next_links;
        while prev.len() > 1 {
            ctx.check()?;
            level += 1;
            let mut out = BufWriter::new(
                File::create(layer_path(level))
                    .with_context(|| format!("create layer {} file", level))?,
            );
            let mut next: Vec<Cid> = Vec::with_capacity(prev.len() / DAG_ARITY + 1);
            for chunk in prev.chunks(DAG_ARITY) {
                let (cid, payload) = make_link_block(chunk)?;
                cardata::write_block(&mut out, &cid, &payload)?;
                next.push(cid);
            }
            out.flush().with_context(|| format!("flush layer {}", level))?;
            prev = next;
        }

        fs::write(vcar.join(LAYERS_FILE), format!("{}", level))
            .context("write layers file")?;
        fs::write(vcar.join(ARITY_FILE), format!("{}", DAG_ARITY))
            .context("write arity file")?;

        info!(
            "group {}: built {} DAG layer(s), root {}",
            self.id(),
            level,
            prev[0]
        );
        self.advance_state_locked(&mut inner, GroupState::VrcarDone)?;
        Ok(())
    }
}
