//! `zvol_clone_range`: reference-clones a byte range
//! between two volumes by cloning block pointers rather than copying
//! data.

use crate::pool::txg::TxgManager;
use crate::zvol::range_lock::{self, Range};
use crate::zvol::state::ZvolState;
use crate::zvol::zil::ClonedBlock;
use crate::zvol::ZvolError;

/// One chunk's worth of source block pointers, as the (out-of-scope)
/// DMU layer would hand back.
#[derive(Debug, Clone)]
pub struct SourceBlocks {
    pub blocks: Vec<ClonedBlock>,
    /// True if any of these blocks were dirtied in the currently-open
    /// transaction group.
    pub dirty_in_open_txg: bool,
}

/// Reads the source block pointers for one chunk. Supplied by the
/// caller since the DMU/object-set read path is out of scope.
pub type ReadSourceBlocks<'a> = dyn Fn(u64, u64) -> SourceBlocks + 'a;

/// Commits a destination clone-by-dnode transaction for one chunk,
/// logging a `TX_CLONE_RANGE` record. Supplied by the caller for the
/// same reason as [`ReadSourceBlocks`].
pub type CommitClone<'a> = dyn Fn(u64, &[ClonedBlock]) + 'a;

fn validate(src: &ZvolState, src_off: u64, dst: &ZvolState, dst_off: u64, len: u64) -> Result<(), ZvolError> {
    if src.blocksize() != dst.blocksize() {
        return Err(ZvolError::InvalidArgument("block sizes differ".into()));
    }
    let bs = src.blocksize();
    if src_off % bs != 0 || dst_off % bs != 0 || len % bs != 0 {
        return Err(ZvolError::InvalidArgument("offsets/length must be block-aligned".into()));
    }
    if len == 0 {
        return Err(ZvolError::InvalidArgument("zero-length clone".into()));
    }
    if std::ptr::eq(src, dst) {
        let src_end = src_off + len;
        let dst_end = dst_off + len;
        if src_off < dst_end && dst_off < src_end {
            return Err(ZvolError::InvalidArgument("source and destination ranges overlap".into()));
        }
    }
    Ok(())
}

/// `zvol_clone_range(src, src_off, dst, dst_off, len)`.
/// `max_blocks_per_record` bounds how many blocks one chunk covers.
///
/// `wait_dirty` decides what happens when a chunk's source blocks are
/// still dirty in the currently-open transaction group: when true, this
/// function blocks on `txg.wait_synced` for that txg and retries the
/// same chunk once it has synced, so the call either completes the full
/// range or fails; when false, it stops at the first dirty chunk and
/// returns the bytes cloned so far as success (see DESIGN.md's decision
/// on the matching open question — a caller that wants the rest retries
/// with the returned length as its new offset).
#[allow(clippy::too_many_arguments)]
pub fn clone_range(
    txg: &TxgManager,
    src: &ZvolState,
    src_off: u64,
    dst: &ZvolState,
    dst_off: u64,
    len: u64,
    max_blocks_per_record: u64,
    wait_dirty: bool,
    read_source: &ReadSourceBlocks,
    commit: &CommitClone,
    sync_always: bool,
) -> Result<u64, ZvolError> {
    validate(src, src_off, dst, dst_off, len)?;

    if dst.zil.lock().unwrap().is_none() {
        *dst.zil.lock().unwrap() = Some(crate::zvol::zil::ZilHandle::new());
    }

    let bs = src.blocksize();
    let chunk_bytes = (max_blocks_per_record.max(1) * bs).min(len.max(bs));

    let (src_id, dst_id) =
        range_lock::lock_pair_for_clone(&src.range_lock, Range::new(src_off, len), &dst.range_lock, Range::new(dst_off, len));

    let mut done = 0u64;
    while done < len {
        let this_chunk = chunk_bytes.min(len - done);
        let mut source = read_source(src_off + done, this_chunk);

        if source.dirty_in_open_txg {
            if !wait_dirty {
                break;
            }
            // Retry the same chunk once the currently-open txg has
            // synced; a chunk dirtied again by a concurrent writer keeps
            // retrying rather than silently skipping it.
            loop {
                txg.wait_synced(txg.open_txg());
                source = read_source(src_off + done, this_chunk);
                if !source.dirty_in_open_txg {
                    break;
                }
            }
        }

        commit(dst_off + done, &source.blocks);
        if let Some(zil) = dst.zil.lock().unwrap().as_ref() {
            zil.log_clone_range(dst_off + done, this_chunk, source.blocks.clone());
        }
        done += this_chunk;
    }

    src.range_lock.unlock(src_id);
    dst.range_lock.unlock(dst_id);

    if sync_always {
        if let Some(zil) = dst.zil.lock().unwrap().as_ref() {
            zil.commit();
        }
    }

    Ok(done)
}
