//! `trim_ranges` — the shared issuing loop used by manual, automatic and
//! simple TRIM alike.

use crate::pool::context::PoolContext;
use crate::pool::iostats::TrimKind;
use crate::pool::leaf::Leaf;
use crate::pool::rangetree::RangeTree;
use crate::trim::TrimError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Issue every segment in `tree` against `leaf`, honoring extent-size
/// floors/ceilings, rate pacing (manual only) and the queue-depth cap,
/// then wait for all issued I/O to drain before returning.
///
/// `stop_requested` is checked before each chunk is issued so callers can
/// cooperatively cancel.
#[allow(clippy::too_many_arguments)]
pub fn trim_ranges(
    ctx: &PoolContext,
    leaf: &Arc<Leaf>,
    tree: &RangeTree,
    kind: TrimKind,
    stop_requested: &AtomicBool,
) -> Result<(), TrimError> {
    let extent_min = if leaf.secure() { leaf.block_size() } else { *ctx.tunables.trim_extent_bytes_min() };
    let extent_max = *ctx.tunables.trim_extent_bytes_max();
    let queue_limit = *ctx.tunables.trim_queue_limit();

    let start_time = Instant::now();
    let mut scheduled_this_txg = false;
    let mut current_txg = ctx.txg.open_txg();

    for (seg_start, seg_len) in tree.iter() {
        if seg_len < extent_min {
            leaf.iostats().record_skipped(kind, seg_len);
            continue;
        }

        for (chunk_start, chunk_len) in chunk_segment(seg_start, seg_len, extent_max) {
            if kind == TrimKind::Manual {
                pace(leaf, &start_time);
            }

            leaf.wait_for_inflight_below(queue_limit);

            let txg = ctx.txg.open_txg();
            if txg != current_txg {
                current_txg = txg;
                scheduled_this_txg = false;
            }
            if !scheduled_this_txg {
                schedule_progress_persist(ctx, leaf, txg);
                scheduled_this_txg = true;
            }

            if !leaf.is_writable() || stop_requested.load(Ordering::Acquire) {
                return Err(TrimError::Interrupted);
            }

            issue_one(ctx, leaf, kind, chunk_start, chunk_len);
        }
    }

    leaf.wait_for_inflight_drain();
    Ok(())
}

fn chunk_segment(start: u64, len: u64, max: u64) -> Vec<(u64, u64)> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < len {
        let piece = (len - offset).min(max.max(1));
        out.push((start + offset, piece));
        offset += piece;
    }
    out
}

/// Manual-only rate pacing: compute `bytes_done * 1000 / (ms_since_start
/// + 1)` and sleep briefly while it exceeds the configured rate.
/// A rate of 0 means unlimited.
fn pace(leaf: &Leaf, start_time: &Instant) {
    let rate = leaf.rate();
    if rate == 0 {
        return;
    }
    loop {
        let elapsed_ms = start_time.elapsed().as_millis().max(0) as u64;
        let current_rate = leaf.bytes_done().saturating_mul(1000) / (elapsed_ms + 1);
        if current_rate <= rate {
            break;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn schedule_progress_persist(ctx: &PoolContext, leaf: &Arc<Leaf>, txg: u64) {
    let leaf = leaf.clone();
    ctx.txg.schedule_at_sync(txg, move || {
        crate::trim::zap::TrimPersistentState::from_leaf(&leaf).persist(&leaf);
    });
}

fn issue_one(ctx: &PoolContext, leaf: &Arc<Leaf>, kind: TrimKind, start: u64, len: u64) {
    leaf.begin_inflight();
    // Synchronous "I/O" for this in-process simulation: the physical
    // device collaborator is out of scope. Completion
    // callbacks below run inline, which preserves every invariant the
    // asynchronous version has (in-flight accounting, rollback-on-error,
    // lock release) without needing a real disk.
    let failed = leaf.take_injected_failure();
    complete_one(ctx, leaf, kind, start, len, failed);
}

fn complete_one(_ctx: &PoolContext, leaf: &Arc<Leaf>, kind: TrimKind, start: u64, len: u64, failed: bool) {
    match kind {
        TrimKind::Manual => {
            if failed {
                leaf.roll_back_last_offset(start);
                leaf.iostats().record_failed(kind, len);
            } else {
                leaf.add_bytes_done(len);
                leaf.iostats().record_issued(kind, len);
                leaf.set_last_offset(start + len);
            }
        },
        TrimKind::Auto | TrimKind::Simple => {
            if failed {
                leaf.iostats().record_failed(kind, len);
            } else {
                leaf.add_bytes_done(len);
                leaf.iostats().record_issued(kind, len);
            }
        },
    }
    leaf.end_inflight();
}
