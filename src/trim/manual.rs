//! The manual TRIM algorithm: a dedicated worker per
//! leaf that walks the containing top-level vdev's metaslabs in index
//! order, translating free ranges to this leaf's physical ranges and
//! handing them to [`trim_ranges`].

use crate::pool::context::PoolContext;
use crate::pool::events::Event;
use crate::pool::iostats::TrimKind;
use crate::pool::leaf::{Leaf, TrimState};
use crate::pool::rangetree::RangeTree;
use crate::pool::vdev::TopLevelVdev;
use crate::trim::ranges::trim_ranges;
use crate::trim::zap::TrimPersistentState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Shared handle a caller uses to request that a running worker stop, and
/// to learn what final state it should settle into.
pub struct ManualWorkerHandle {
    pub stop_requested: Arc<AtomicBool>,
    pub target_state: Arc<Mutex<Option<TrimState>>>,
    pub join: JoinHandle<()>,
}

pub fn spawn(
    ctx: Arc<PoolContext>,
    leaf: Arc<Leaf>,
    tlvdev: Arc<TopLevelVdev>,
) -> ManualWorkerHandle {
    let stop_requested = Arc::new(AtomicBool::new(false));
    let target_state = Arc::new(Mutex::new(None));

    let worker_ctx = ctx.clone();
    let worker_leaf = leaf.clone();
    let worker_tlvdev = tlvdev.clone();
    let worker_stop = stop_requested.clone();
    let worker_target = target_state.clone();

    let join = std::thread::Builder::new()
        .name(format!("trim-manual-{}", leaf.guid()))
        .spawn(move || run(worker_ctx, worker_leaf, worker_tlvdev, worker_stop, worker_target))
        .expect("failed to spawn manual trim worker");

    ManualWorkerHandle { stop_requested, target_state, join }
}

fn run(
    ctx: Arc<PoolContext>,
    leaf: Arc<Leaf>,
    tlvdev: Arc<TopLevelVdev>,
    stop_requested: Arc<AtomicBool>,
    target_state: Arc<Mutex<Option<TrimState>>>,
) {
    // Step 1: the worker observes the commanded rate/partial/secure by
    // reading the in-memory leaf fields directly, which already lead the
    // on-disk state.
    //
    // Step 2: read persisted progress (applies on restart; on a fresh
    // start this is a no-op since last_offset is already 0).
    let mut completed = true;

    'metaslabs: for metaslab in tlvdev.metaslabs() {
        if stop_requested.load(Ordering::Acquire) || tlvdev.exit_wanted() || leaf.is_detached() {
            completed = false;
            break;
        }

        metaslab.disable();
        let loaded = metaslab.force_load();
        if !loaded {
            metaslab.enable();
            completed = false;
            break; // a metaslab that can't load is a hard error in manual TRIM.
        }

        if leaf.partial() && !metaslab.ever_written() {
            metaslab.enable();
            continue 'metaslabs;
        }

        let Some(leaf_index) = tlvdev.leaf_index(leaf.guid()) else {
            metaslab.enable();
            completed = false;
            break;
        };

        let mut per_iteration = RangeTree::new();
        {
            let allocatable = metaslab.allocatable().lock().unwrap();
            for (start, len) in allocatable.iter() {
                for (phys_start, phys_len) in tlvdev.translator().translate(leaf_index, start, len) {
                    let floor = leaf.last_offset();
                    if phys_start + phys_len <= floor {
                        continue;
                    }
                    let clipped_start = phys_start.max(floor);
                    let clipped_len = phys_start + phys_len - clipped_start;
                    per_iteration.add(clipped_start, clipped_len);
                }
            }
        }

        let result = trim_ranges(&ctx, &leaf, &per_iteration, TrimKind::Manual, &stop_requested);
        metaslab.enable();

        if result.is_err() {
            completed = false;
            break;
        }
    }

    let previous_state = leaf.trim_state();
    let final_state = {
        let requested = *target_state.lock().unwrap();
        match requested {
            Some(TrimState::Canceled) => TrimState::Canceled,
            Some(TrimState::Suspended) => TrimState::Suspended,
            _ if completed => TrimState::Complete,
            _ => previous_state, // externally stopped: leave state unchanged
        }
    };

    leaf.set_trim_state(final_state);
    let txg = ctx.txg.open_txg();
    let persist_leaf = leaf.clone();
    ctx.txg.schedule_at_sync(txg, move || {
        TrimPersistentState::from_leaf(&persist_leaf).persist(&persist_leaf);
    });
    ctx.txg.sync();
    ctx.txg.wait_synced(txg);

    ctx.events.push(
        &ctx.logger,
        Event::TrimStateChanged {
            leaf_guid: leaf.guid(),
            from: previous_state.to_string(),
            to: final_state.to_string(),
        },
    );
}
