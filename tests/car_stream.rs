//! Archive determinism and CAR v1 well-formedness.

use std::collections::HashSet;
use std::io::Write;

use anyhow::Result;
use cid::Cid;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::Deserialize;
use sha2::Digest;

use carpool::commp::CommpWriter;
use carpool::{cardata, util};
use carpool::{Block, CommpResult, Ctx, Group, GroupConfig, GroupState, MemRegistry, Supervisor};

#[derive(Debug, Deserialize)]
struct CarHeader {
    roots: Vec<Cid>,
    version: u64,
}

fn random_blocks(seed: u64, n: usize) -> Vec<Block> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let len = rng.gen_range(32..160);
            let mut data = vec![0u8; len];
            rng.fill_bytes(&mut data);
            Block::from_data(data)
        })
        .collect()
}

/// Build a group over `blocks`, run the whole pipeline, and return the
/// group together with its packaging result.
fn packaged_group(
    root: &std::path::Path,
    id: u64,
    blocks: &[Block],
) -> Result<(Supervisor, Group, CommpResult)> {
    let registry = MemRegistry::new();
    let total: u64 = blocks.iter().map(|b| b.len() as u64).sum();
    let sup = Supervisor::new(root, registry, GroupConfig { max_group_size: total });
    let ctx = Ctx::new();

    let group = sup.create_group(id)?;
    assert_eq!(group.put(&ctx, blocks)?, blocks.len());
    assert_eq!(group.put(&ctx, &[Block::from_data(vec![0u8; 8])])?, 0);
    assert_eq!(group.state(), GroupState::Full);
    group.sync(&ctx)?;

    let result = sup.finalize_pipeline(&ctx, &group)?.expect("commp result");
    Ok((sup, group, result))
}

#[test]
fn pipeline_is_deterministic_across_directories() -> Result<()> {
    let td1 = tempfile::tempdir()?;
    let td2 = tempfile::tempdir()?;
    let blocks = random_blocks(42, 100);
    let ctx = Ctx::new();

    let (_s1, g1, r1) = packaged_group(td1.path(), 1, &blocks)?;
    let (_s2, g2, r2) = packaged_group(td2.path(), 7, &blocks)?;

    assert_eq!(r1.root, r2.root);
    assert_eq!(r1.piece_cid, r2.piece_cid);
    assert_eq!(r1.commp, r2.commp);
    assert_eq!(r1.padded_piece_size, r2.padded_piece_size);
    assert_eq!(r1.archive_size, r2.archive_size);

    let mut car1 = Vec::new();
    let mut car2 = Vec::new();
    let (n1, root1) = g1.write_car(&ctx, &mut car1)?;
    let (n2, root2) = g2.write_car(&ctx, &mut car2)?;
    assert_eq!(car1, car2);
    assert_eq!(n1, car1.len() as u64);
    assert_eq!(n2, n1);
    assert_eq!(root1, r1.root);
    assert_eq!(root2, root1);
    assert_eq!(n1, r1.archive_size);

    // The streamed commitment matches one recomputed from the bytes.
    let mut cc = CommpWriter::new();
    cc.write_all(&car1)?;
    let (commp, padded) = cc.finalize()?;
    assert_eq!(commp, r1.commp);
    assert_eq!(padded, r1.padded_piece_size);

    g1.close()?;
    g2.close()?;
    Ok(())
}

#[test]
fn archive_parses_as_car_v1_with_every_block_once() -> Result<()> {
    let td = tempfile::tempdir()?;
    let blocks = random_blocks(7, 100);
    let ctx = Ctx::new();

    let (_sup, group, result) = packaged_group(td.path(), 1, &blocks)?;
    let mut car = Vec::new();
    group.write_car(&ctx, &mut car)?;

    let mut r = std::io::Cursor::new(&car[..]);
    let (hdr_len, _) = util::read_varint_u64(&mut r)?.expect("header frame");
    let mut hdr = vec![0u8; hdr_len as usize];
    std::io::Read::read_exact(&mut r, &mut hdr)?;
    let header: CarHeader = serde_ipld_dagcbor::from_slice(&hdr)?;
    assert_eq!(header.version, 1);
    assert_eq!(header.roots, vec![result.root]);

    // Body: the root link block first (parent before children), then the
    // 100 leaves, each exactly once, in the group's block order.
    let mut body = Vec::new();
    while let Some((cid, payload)) = cardata::read_block(&mut r)? {
        body.push((cid, payload));
    }
    assert_eq!(body.len(), 101);
    assert_eq!(body[0].0, result.root);

    let children: Vec<Cid> = serde_ipld_dagcbor::from_slice(&body[0].1)?;
    let leaf_cids: Vec<Cid> = body[1..].iter().map(|(c, _)| *c).collect();
    assert_eq!(children, leaf_cids);

    let mut unique = HashSet::new();
    for (cid, payload) in &body[1..] {
        assert!(unique.insert(*cid), "leaf {} appears twice", cid);
        // Leaf payloads are the original block bytes.
        assert_eq!(
            cid.hash().digest(),
            &sha2::Sha256::digest(payload)[..],
            "leaf payload does not match its CID"
        );
    }

    // Every inserted block made it into the archive.
    let inserted: HashSet<Cid> = blocks.iter().map(|b| carpool::raw_cid(b.hash())).collect();
    assert_eq!(unique, inserted);

    group.close()?;
    Ok(())
}
