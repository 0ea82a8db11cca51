//! The automatic TRIM algorithm: one worker per
//! top-level vdev, continuously trimming recently-freed ranges.

use crate::pool::context::PoolContext;
use crate::pool::iostats::TrimKind;
use crate::pool::leaf::TrimState;
use crate::pool::rangetree::RangeTree;
use crate::pool::vdev::TopLevelVdev;
use crate::trim::ranges::trim_ranges;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Cooperative kick signal: one kick per txg sync.
#[derive(Default)]
struct Kick {
    lock: Mutex<u64>,
    cv: Condvar,
}

impl Kick {
    fn bump(&self) {
        *self.lock.lock().unwrap() += 1;
        self.cv.notify_all();
    }

    /// Wait for `n` kicks or an early exit request, whichever comes first.
    fn wait_n(&self, n: u64, exit: &AtomicBool) {
        let guard = self.lock.lock().unwrap();
        let start = *guard;
        let _unused = self
            .cv
            .wait_timeout_while(guard, std::time::Duration::from_millis(200), |count| {
                *count < start + n && !exit.load(Ordering::Acquire)
            })
            .unwrap();
    }
}

pub struct AutoWorkerHandle {
    stop_requested: Arc<AtomicBool>,
    kick: Arc<Kick>,
    join: Option<JoinHandle<()>>,
}

impl AutoWorkerHandle {
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.kick.bump();
    }

    pub fn join(mut self) {
        if let Some(h) = self.join.take() {
            let _ = h.join();
        }
    }

    pub fn kick(&self) { self.kick.bump(); }
}

pub fn spawn(ctx: Arc<PoolContext>, tlvdev: Arc<TopLevelVdev>) -> AutoWorkerHandle {
    let stop_requested = Arc::new(AtomicBool::new(false));
    let kick = Arc::new(Kick::default());

    let worker_stop = stop_requested.clone();
    let worker_kick = kick.clone();
    let join = std::thread::Builder::new()
        .name(format!("autotrim-{}", tlvdev.id()))
        .spawn(move || run(ctx, tlvdev, worker_stop, worker_kick))
        .expect("failed to spawn autotrim worker");

    AutoWorkerHandle { stop_requested, kick, join: Some(join) }
}

fn run(ctx: Arc<PoolContext>, tlvdev: Arc<TopLevelVdev>, stop_requested: Arc<AtomicBool>, kick: Arc<Kick>) {
    let batch = (*ctx.tunables.trim_txg_batch()).max(1) as usize;
    let metaslab_count = tlvdev.metaslabs().len();

    while !stop_requested.load(Ordering::Acquire) && !tlvdev.exit_wanted() {
        for group_start in 0..batch.min(metaslab_count.max(1)) {
            if stop_requested.load(Ordering::Acquire) || tlvdev.exit_wanted() {
                break;
            }
            let indices: Vec<usize> = (group_start..metaslab_count).step_by(batch).collect();
            run_group(&ctx, &tlvdev, &indices);
            // Wait for a kick before moving to the next interleaved group:
            // we already block inside trim_ranges until every I/O in this
            // group drains, so one kick per group paces the next one.
            kick.wait_n(1, &stop_requested);
        }
    }

    // autotrim turned off (or vdev removed): vacate ms_trim on every
    // metaslab to reclaim memory.
    for metaslab in tlvdev.metaslabs() {
        metaslab.trim_tree().lock().unwrap().swap_out();
    }
}

/// Process one interleaved group of metaslab indices, returning whether
/// any TRIM I/O was issued.
fn run_group(ctx: &PoolContext, tlvdev: &TopLevelVdev, indices: &[usize]) -> bool {
    let mut issued_any = false;
    for &idx in indices {
        let Some(metaslab) = tlvdev.metaslabs().get(idx) else { continue };

        if metaslab.is_disabled() {
            continue; // already disabled, e.g. by manual TRIM
        }
        metaslab.disable();

        if !metaslab.ever_written() {
            metaslab.enable();
            continue;
        }

        let swapped = metaslab.trim_tree().lock().unwrap().swap_out();
        if swapped.is_empty() {
            metaslab.enable();
            continue;
        }

        for (leaf_index, leaf) in tlvdev.leaves().iter().enumerate() {
            if leaf.is_detached() || !leaf.is_writable() || leaf.trim_state() == TrimState::Active {
                continue;
            }
            let mut per_leaf = RangeTree::new();
            for (start, len) in swapped.iter() {
                for (ps, pl) in tlvdev.translator().translate(leaf_index, start, len) {
                    per_leaf.add(ps, pl);
                }
            }
            if per_leaf.is_empty() {
                continue;
            }
            let stop_flag = AtomicBool::new(false);
            let _ = trim_ranges(ctx, leaf, &per_leaf, TrimKind::Auto, &stop_flag);
            issued_any = true;
        }

        metaslab.enable();
    }
    issued_any
}
