//! Size-cap behavior: accepted prefixes, the Full transition, and
//! duplicate-put idempotence.

use anyhow::Result;

use carpool::{Block, Ctx, GroupConfig, GroupState, MemRegistry, Supervisor};

fn block_n(i: u32, size: usize) -> Block {
    let mut data = vec![0u8; size];
    let n = size.min(4);
    data[..n].copy_from_slice(&i.to_le_bytes()[..n]);
    Block::from_data(data)
}

#[test]
fn batch_accepts_prefix_and_flips_to_full() -> Result<()> {
    let td = tempfile::tempdir()?;
    let registry = MemRegistry::new();
    // Room for four 10-byte blocks plus change; the fifth must not fit.
    let cfg = GroupConfig { max_group_size: 49 };
    let sup = Supervisor::new(td.path(), registry.clone(), cfg);
    let ctx = Ctx::new();

    let blocks: Vec<Block> = (0..5).map(|i| block_n(i, 10)).collect();

    let group = sup.create_group(1)?;
    let accepted = group.put(&ctx, &blocks)?;
    assert_eq!(accepted, 4);
    assert_eq!(group.state(), GroupState::Full);

    // Once Full, every put accepts zero.
    assert_eq!(group.put(&ctx, &[block_n(99, 1)])?, 0);

    group.sync(&ctx)?;
    let row = registry.row(1).unwrap();
    assert_eq!(row.state, Some(GroupState::Full));
    assert_eq!(row.committed_blocks, 4);
    assert_eq!(row.committed_size, 40);

    // The four accepted blocks are all readable; the rejected one is not.
    let hashes: Vec<_> = blocks.iter().map(|b| *b.hash()).collect();
    let mut seen = 0;
    group.view(&ctx, &hashes[..4], |_, data| {
        assert_eq!(data.len(), 10);
        seen += 1;
    })?;
    assert_eq!(seen, 4);
    let err = group
        .view(&ctx, &hashes[4..], |_, _| panic!("rejected block surfaced"))
        .unwrap_err();
    assert!(carpool::error::is_not_found(&err));
    group.close()?;
    Ok(())
}

#[test]
fn size_cap_counts_committed_plus_inflight() -> Result<()> {
    let td = tempfile::tempdir()?;
    let registry = MemRegistry::new();
    let cfg = GroupConfig { max_group_size: 30 };
    let sup = Supervisor::new(td.path(), registry, cfg);
    let ctx = Ctx::new();

    let group = sup.create_group(1)?;
    assert_eq!(group.put(&ctx, &[block_n(0, 10)])?, 1);
    group.sync(&ctx)?;
    assert_eq!(group.put(&ctx, &[block_n(1, 10)])?, 1);

    // 10 committed + 10 inflight + 20 would exceed the 30-byte cap.
    assert_eq!(group.put(&ctx, &[block_n(2, 20)])?, 0);
    assert_eq!(group.state(), GroupState::Full);

    let (cb, cs, ib, is) = group.counters();
    assert_eq!((cb, cs, ib, is), (1, 10, 1, 10));
    group.close()?;
    Ok(())
}

#[test]
fn duplicate_puts_are_idempotent() -> Result<()> {
    let td = tempfile::tempdir()?;
    let registry = MemRegistry::new();
    let sup = Supervisor::new(td.path(), registry.clone(), GroupConfig::default());
    let ctx = Ctx::new();

    let b = Block::from_data(b"once".to_vec());
    let group = sup.create_group(1)?;

    assert_eq!(group.put(&ctx, &[b.clone()])?, 1);
    // Repeat within a later batch: accepted, but no new log entry.
    assert_eq!(group.put(&ctx, &[b.clone()])?, 1);
    // Repeat inside a single batch alongside a fresh block.
    let fresh = Block::from_data(b"fresh".to_vec());
    assert_eq!(group.put(&ctx, &[b.clone(), fresh.clone()])?, 2);

    group.sync(&ctx)?;
    let row = registry.row(1).unwrap();
    assert_eq!(row.committed_blocks, 2);
    assert_eq!(row.committed_size, (b.len() + fresh.len()) as u64);

    let mut payloads = Vec::new();
    group.view(&ctx, &[*b.hash(), *fresh.hash()], |_, data| {
        payloads.push(data.to_vec())
    })?;
    assert_eq!(payloads, vec![b"once".to_vec(), b"fresh".to_vec()]);
    group.close()?;
    Ok(())
}

#[test]
fn cancelled_context_stops_operations() -> Result<()> {
    let td = tempfile::tempdir()?;
    let registry = MemRegistry::new();
    let sup = Supervisor::new(td.path(), registry, GroupConfig::default());

    let group = sup.create_group(1)?;
    let ctx = Ctx::new();
    ctx.cancel();

    let err = group.put(&ctx, &[Block::from_data(b"x".to_vec())]).unwrap_err();
    assert!(carpool::error::is_cancelled(&err));
    let err = group.sync(&ctx).unwrap_err();
    assert!(carpool::error::is_cancelled(&err));
    group.close()?;
    Ok(())
}
