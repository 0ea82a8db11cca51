//! Stand-in for the (out-of-scope) DMU transaction manager: just enough
//! of "open a txg, do work, wait for it to sync" for the TRIM and ZVOL
//! engines to schedule sync-time callbacks and block until they've run,
//! matching `dmu_tx_assign`/`txg_wait_synced` semantics.

use std::sync::{Arc, Condvar, Mutex};

type SyncTask = Box<dyn FnOnce() + Send>;

struct Inner {
    synced_txg: Mutex<u64>,
    cv: Condvar,
    pending: Mutex<Vec<(u64, SyncTask)>>,
}

/// A handle to the pool's transaction-group clock, shared by every engine
/// that needs to commit state "at sync time".
#[derive(Clone)]
pub struct TxgManager {
    inner: Arc<Inner>,
}

impl Default for TxgManager {
    fn default() -> Self { Self::new() }
}

impl TxgManager {
    pub fn new() -> Self {
        TxgManager {
            inner: Arc::new(Inner {
                synced_txg: Mutex::new(0),
                cv: Condvar::new(),
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the txg number a caller entering a transaction right now
    /// would be assigned (`dmu_tx_assign`); it becomes durable on the next
    /// [`TxgManager::sync`].
    pub fn open_txg(&self) -> u64 { *self.inner.synced_txg.lock().unwrap() + 1 }

    pub fn current_synced(&self) -> u64 { *self.inner.synced_txg.lock().unwrap() }

    /// Schedule a callback to run the next time the given txg syncs, the
    /// way `dsl_sync_task`/`vdev_trim_change_state`'s progress-persistence
    /// callback does.
    pub fn schedule_at_sync<F: FnOnce() + Send + 'static>(&self, txg: u64, f: F) {
        self.inner.pending.lock().unwrap().push((txg, Box::new(f)));
    }

    /// Advance the txg clock by one, running every callback scheduled for
    /// the txg that just became synced, then waking waiters.
    pub fn sync(&self) {
        let synced = {
            let mut guard = self.inner.synced_txg.lock().unwrap();
            *guard += 1;
            *guard
        };
        let due: Vec<SyncTask> = {
            let mut pending = self.inner.pending.lock().unwrap();
            let (due, rest): (Vec<_>, Vec<_>) =
                std::mem::take(&mut *pending).into_iter().partition(|(txg, _)| *txg <= synced);
            *pending = rest;
            due.into_iter().map(|(_, f)| f).collect()
        };
        for f in due {
            f();
        }
        self.inner.cv.notify_all();
    }

    /// Block until `txg` has synced (`txg_wait_synced`).
    pub fn wait_synced(&self, txg: u64) {
        let guard = self.inner.synced_txg.lock().unwrap();
        let _unused = self.inner.cv.wait_while(guard, |synced| *synced < txg).unwrap();
    }
}
