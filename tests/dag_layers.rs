//! DAG shape at the arity boundary: 2049 leaves must produce two layers,
//! with a full 2048-child link block, a 1-child link block, and a 2-child
//! root above them.

use std::fs::File;
use std::io::BufReader;

use anyhow::Result;
use cid::Cid;

use carpool::cardata;
use carpool::{Block, Ctx, GroupConfig, GroupState, MemRegistry, Supervisor};

fn read_layer(path: &std::path::Path) -> Result<Vec<(Cid, Vec<Cid>)>> {
    let mut r = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    while let Some((cid, payload)) = cardata::read_block(&mut r)? {
        let children: Vec<Cid> = serde_ipld_dagcbor::from_slice(&payload)?;
        out.push((cid, children));
    }
    Ok(out)
}

#[test]
fn arity_boundary_produces_two_layers() -> Result<()> {
    let td = tempfile::tempdir()?;
    let registry = MemRegistry::new();

    let blocks: Vec<Block> = (0..2049u32)
        .map(|i| Block::from_data(i.to_le_bytes().to_vec()))
        .collect();
    let total: u64 = blocks.iter().map(|b| b.len() as u64).sum();

    let cfg = GroupConfig {
        max_group_size: total,
    };
    let sup = Supervisor::new(td.path(), registry, cfg);
    let ctx = Ctx::new();

    let group = sup.create_group(1)?;
    assert_eq!(group.put(&ctx, &blocks)?, 2049);
    // The cap is exactly consumed; the next block flips the group to Full.
    assert_eq!(group.put(&ctx, &[Block::from_data(vec![0xAA; 8])])?, 0);
    assert_eq!(group.state(), GroupState::Full);
    group.sync(&ctx)?;

    group.finalize(&ctx)?;
    group.gen_top_car(&ctx)?;
    assert_eq!(group.state(), GroupState::VrcarDone);

    let vcar = group.path().join("vcar");
    assert_eq!(std::fs::read_to_string(vcar.join("layers"))?.trim(), "2");
    assert_eq!(std::fs::read_to_string(vcar.join("arity"))?.trim(), "2048");

    let layer1 = read_layer(&vcar.join("layer1.cardata"))?;
    assert_eq!(layer1.len(), 2);
    assert_eq!(layer1[0].1.len(), 2048);
    assert_eq!(layer1[1].1.len(), 1);

    let layer2 = read_layer(&vcar.join("layer2.cardata"))?;
    assert_eq!(layer2.len(), 1);
    let (_, root_children) = &layer2[0];
    assert_eq!(root_children.len(), 2);
    assert_eq!(root_children[0], layer1[0].0);
    assert_eq!(root_children[1], layer1[1].0);

    // Layer-1 children are the leaf CIDs in the group's block order.
    let mut leaf_cids = Vec::new();
    group.iterate(&ctx, |mh, _| {
        leaf_cids.push(carpool::raw_cid(mh));
        Ok(())
    })?;
    assert_eq!(leaf_cids.len(), 2049);
    let dag_children: Vec<Cid> = layer1
        .iter()
        .flat_map(|(_, children)| children.iter().copied())
        .collect();
    assert_eq!(dag_children, leaf_cids);

    // The streamed archive interleaves both layers depth-first:
    // root, the full link block, its 2048 leaves, the 1-child link
    // block, and the last leaf.
    group.gen_commp(&ctx)?;
    let mut car = Vec::new();
    group.write_car(&ctx, &mut car)?;
    let mut r = std::io::Cursor::new(&car[..]);
    let (hdr_len, _) = carpool::util::read_varint_u64(&mut r)?.unwrap();
    std::io::Seek::seek(&mut r, std::io::SeekFrom::Current(hdr_len as i64))?;

    let mut body = Vec::new();
    while let Some((cid, _)) = cardata::read_block(&mut r)? {
        body.push(cid);
    }
    assert_eq!(body.len(), 2052);
    assert_eq!(body[0], layer2[0].0);
    assert_eq!(body[1], layer1[0].0);
    assert_eq!(&body[2..2050], &leaf_cids[..2048]);
    assert_eq!(body[2050], layer1[1].0);
    assert_eq!(body[2051], leaf_cids[2048]);

    group.close()?;
    Ok(())
}

#[test]
fn single_link_block_group_has_one_layer() -> Result<()> {
    let td = tempfile::tempdir()?;
    let registry = MemRegistry::new();

    let blocks: Vec<Block> = (0..10u32)
        .map(|i| Block::from_data(format!("small-{}", i).into_bytes()))
        .collect();
    let total: u64 = blocks.iter().map(|b| b.len() as u64).sum();

    let sup = Supervisor::new(td.path(), registry, GroupConfig { max_group_size: total });
    let ctx = Ctx::new();

    let group = sup.create_group(1)?;
    assert_eq!(group.put(&ctx, &blocks)?, 10);
    assert_eq!(group.put(&ctx, &[Block::from_data(vec![1u8; 4])])?, 0);
    group.sync(&ctx)?;
    group.finalize(&ctx)?;
    group.gen_top_car(&ctx)?;

    let vcar = group.path().join("vcar");
    assert_eq!(std::fs::read_to_string(vcar.join("layers"))?.trim(), "1");
    let layer1 = read_layer(&vcar.join("layer1.cardata"))?;
    assert_eq!(layer1.len(), 1);
    assert_eq!(layer1[0].1.len(), 10);

    group.close()?;
    Ok(())
}
