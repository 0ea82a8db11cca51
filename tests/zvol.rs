use std::sync::Arc;
use std::time::Duration;

use zpool_engines::pool::context::PoolContext;
use zpool_engines::tunables::Tunables;
use zpool_engines::zvol::clone::SourceBlocks;
use zpool_engines::zvol::state::{DnodeHandle, ObjectSetHandle};
use zpool_engines::zvol::zil::ClonedBlock;
use zpool_engines::zvol::ZvolEngine;

fn engine() -> ZvolEngine { ZvolEngine::new(Arc::new(PoolContext::new("tank", Tunables::default()))) }

fn wait_for<F: Fn() -> bool>(pred: F, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while !pred() {
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    true
}

#[test]
fn remove_minors_blocks_until_the_volume_is_closed() {
    let engine = engine();
    engine.insert("tank/vol1", 1, 1024, 512, ObjectSetHandle(1), DnodeHandle(1)).unwrap();
    let found = engine.table().find_by_name("tank/vol1", zpool_engines::zvol::table::LockMode::None).unwrap();
    found.state.open();

    let n = engine.remove_minors(Some("tank/vol1")).unwrap();
    assert_eq!(n, 1);

    // The shutdown phase is dispatched asynchronously and must wait for
    // the open handle to close before the name disappears from the table.
    std::thread::sleep(Duration::from_millis(30));
    assert!(engine.table().find_by_name("tank/vol1", zpool_engines::zvol::table::LockMode::None).is_ok());

    found.state.close();

    assert!(wait_for(|| !engine.completed_tasks().is_empty(), Duration::from_secs(2)));
    assert!(engine.table().find_by_name("tank/vol1", zpool_engines::zvol::table::LockMode::None).is_err());
}

#[test]
fn remove_minors_on_unknown_dataset_fails_with_not_found() {
    let engine = engine();
    let err = engine.remove_minors(Some("tank/nope")).unwrap_err();
    assert_eq!(err, zpool_engines::zvol::ZvolError::NotFound("tank/nope".to_string()));
}

#[test]
fn suspend_blocks_a_concurrent_resume_less_operation_until_released() {
    let engine = engine();
    engine.insert("tank/vol1", 1, 1024, 512, ObjectSetHandle(1), DnodeHandle(1)).unwrap();

    let state = engine.suspend("tank/vol1").unwrap();
    assert_eq!(state.suspend_refcount(), 1);

    // A second, independent lookup still succeeds -- suspend only blocks
    // data-path readers/writers taking the suspend lock themselves, not
    // name-table lookups.
    let found = engine.table().find_by_name("tank/vol1", zpool_engines::zvol::table::LockMode::None).unwrap();
    assert_eq!(found.state.guid(), 1);

    engine.resume(&state);
    assert_eq!(state.suspend_refcount(), 0);
}

#[test]
fn clone_range_spanning_multiple_chunks_commits_every_chunk_in_order() {
    let engine = engine();
    engine.insert("tank/src", 1, 4096, 512, ObjectSetHandle(1), DnodeHandle(1)).unwrap();
    engine.insert("tank/dst", 2, 4096, 512, ObjectSetHandle(2), DnodeHandle(2)).unwrap();

    let committed = std::sync::Mutex::new(Vec::new());
    let done = engine
        .clone_range(
            "tank/src",
            0,
            "tank/dst",
            0,
            4096,
            false,
            &|off, len| SourceBlocks { blocks: vec![ClonedBlock { blkptr: off, block_size: len as u32 }], dirty_in_open_txg: false },
            &|off, blocks| committed.lock().unwrap().push((off, blocks.to_vec())),
            true,
        )
        .unwrap();

    assert_eq!(done, 4096);
    let commits = committed.lock().unwrap();
    // max_blocks_per_record defaults to 16 blocks of 512 bytes = 8192
    // bytes per chunk, which covers the whole 4096-byte range in one go.
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].0, 0);
}

#[test]
fn clone_range_rejects_an_unaligned_offset() {
    let engine = engine();
    engine.insert("tank/src", 1, 4096, 512, ObjectSetHandle(1), DnodeHandle(1)).unwrap();
    engine.insert("tank/dst", 2, 4096, 512, ObjectSetHandle(2), DnodeHandle(2)).unwrap();

    let err = engine
        .clone_range(
            "tank/src",
            100,
            "tank/dst",
            0,
            512,
            false,
            &|off, len| SourceBlocks { blocks: vec![ClonedBlock { blkptr: off, block_size: len as u32 }], dirty_in_open_txg: false },
            &|_, _| {},
            false,
        )
        .unwrap_err();
    assert_eq!(err, zpool_engines::zvol::ZvolError::InvalidArgument("offsets/length must be block-aligned".to_string()));
}

#[test]
fn clone_range_rejects_overlap_on_the_same_volume() {
    let engine = engine();
    engine.insert("tank/src", 1, 4096, 512, ObjectSetHandle(1), DnodeHandle(1)).unwrap();

    let err = engine
        .clone_range(
            "tank/src",
            0,
            "tank/src",
            0,
            512,
            false,
            &|off, len| SourceBlocks { blocks: vec![ClonedBlock { blkptr: off, block_size: len as u32 }], dirty_in_open_txg: false },
            &|_, _| {},
            false,
        )
        .unwrap_err();
    assert_eq!(err, zpool_engines::zvol::ZvolError::InvalidArgument("source and destination ranges overlap".to_string()));
}

#[test]
fn set_common_volmode_propagates_to_every_descendant() {
    let engine = engine();
    engine.insert("tank/vol1", 1, 1024, 512, ObjectSetHandle(1), DnodeHandle(1)).unwrap();
    engine.insert("tank/vol1/child", 2, 1024, 512, ObjectSetHandle(2), DnodeHandle(2)).unwrap();

    engine.set_volmode("tank/vol1", zpool_engines::zvol::state::VolMode::Dev);
    assert!(wait_for(|| !engine.completed_tasks().is_empty(), Duration::from_secs(2)));

    let parent = engine.table().find_by_name("tank/vol1", zpool_engines::zvol::table::LockMode::None).unwrap();
    let child = engine.table().find_by_name("tank/vol1/child", zpool_engines::zvol::table::LockMode::None).unwrap();
    assert_eq!(parent.state.volmode(), zpool_engines::zvol::state::VolMode::Dev);
    assert_eq!(child.state.volmode(), zpool_engines::zvol::state::VolMode::Dev);
}
