//! The TRIM engine: per-leaf-device reclamation of unused
//! physical ranges, manual and automatic.

pub mod auto;
pub mod manual;
pub mod ranges;
pub mod zap;

use crate::pool::context::PoolContext;
use crate::pool::events::Event;
use crate::pool::iostats::TrimKind;
use crate::pool::leaf::{Leaf, TrimState};
use crate::pool::rangetree::RangeTree;
use crate::pool::vdev::TopLevelVdev;
use auto::AutoWorkerHandle;
use manual::ManualWorkerHandle;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

quick_error::quick_error! {
    #[derive(Debug, PartialEq, Eq, Clone)]
    pub enum TrimError {
        LeafNotFound(guid: u64) {
            display("no such leaf: {}", guid)
        }
        VdevNotFound(guid: u64) {
            display("leaf {} has no containing top-level vdev registered", guid)
        }
        AlreadyActive(guid: u64) {
            display("leaf {} is already being trimmed", guid)
        }
        NotActive(guid: u64) {
            display("leaf {} is not being trimmed", guid)
        }
        Interrupted {
            display("trim was interrupted")
        }
    }
}

impl TrimError {
    /// Maps each variant to a POSIX-ish code. There is no real OS
    /// boundary here to hand a raw `errno` to; this is the symbolic
    /// equivalent callers can match on.
    pub fn as_errno(&self) -> i32 {
        match self {
            TrimError::LeafNotFound(_) | TrimError::VdevNotFound(_) => libc::ENOENT,
            TrimError::AlreadyActive(_) => libc::EBUSY,
            TrimError::NotActive(_) => libc::ENOENT,
            TrimError::Interrupted => libc::EINTR,
        }
    }
}

/// Target final state a caller may request of [`TrimEngine::trim_stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrimStopTarget {
    Canceled,
    Suspended,
}

impl From<TrimStopTarget> for TrimState {
    fn from(t: TrimStopTarget) -> TrimState {
        match t {
            TrimStopTarget::Canceled => TrimState::Canceled,
            TrimStopTarget::Suspended => TrimState::Suspended,
        }
    }
}

/// A deferred-wait list: handles for workers that were signalled to stop
/// but not yet joined.
#[derive(Default)]
pub struct TrimStopList {
    handles: Vec<ManualWorkerHandle>,
}

impl TrimStopList {
    pub fn new() -> Self { TrimStopList::default() }

    pub fn join_all(self) {
        for handle in self.handles {
            let _ = handle.join.join();
        }
    }
}

struct LeafEntry {
    leaf: Arc<Leaf>,
    tlvdev: Arc<TopLevelVdev>,
    worker: Option<ManualWorkerHandle>,
}

pub struct TrimEngine {
    ctx: Arc<PoolContext>,
    leaves: Mutex<HashMap<u64, LeafEntry>>,
    autotrim: Mutex<HashMap<usize, (Arc<TopLevelVdev>, AutoWorkerHandle)>>,
}

impl TrimEngine {
    pub fn new(ctx: Arc<PoolContext>) -> Self {
        TrimEngine { ctx, leaves: Mutex::new(HashMap::new()), autotrim: Mutex::new(HashMap::new()) }
    }

    /// Register a leaf under the top-level vdev that owns it. Registration
    /// is how the (out-of-scope) pool substrate would hand TRIM a leaf
    /// once it's discovered; discovery itself stays external.
    pub fn register_leaf(&self, leaf: Arc<Leaf>, tlvdev: Arc<TopLevelVdev>) {
        self.leaves.lock().unwrap().insert(leaf.guid(), LeafEntry { leaf, tlvdev, worker: None });
    }

    fn with_entry<T>(&self, guid: u64, f: impl FnOnce(&mut LeafEntry) -> Result<T, TrimError>) -> Result<T, TrimError> {
        let mut leaves = self.leaves.lock().unwrap();
        let entry = leaves.get_mut(&guid).ok_or(TrimError::LeafNotFound(guid))?;
        f(entry)
    }

    /// `trim_start(leaf, rate, partial, secure)`:
    /// transitions NONE|COMPLETE|CANCELED -> ACTIVE and spawns a worker.
    pub fn trim_start(&self, guid: u64, rate: u64, partial: bool, secure: bool) -> Result<(), TrimError> {
        self.with_entry(guid, |entry| {
            let state = entry.leaf.trim_state();
            if matches!(state, TrimState::Active | TrimState::Suspended) {
                return Err(TrimError::AlreadyActive(guid));
            }
            entry.leaf.set_rate(rate);
            entry.leaf.set_partial(partial);
            entry.leaf.set_secure(secure);
            entry.leaf.set_last_offset(0);
            entry.leaf.set_trim_state(TrimState::Active);
            self.ctx.events.push(
                &self.ctx.logger,
                Event::TrimStateChanged { leaf_guid: guid, from: state.to_string(), to: "ACTIVE".into() },
            );
            let handle = manual::spawn(self.ctx.clone(), entry.leaf.clone(), entry.tlvdev.clone());
            entry.worker = Some(handle);
            Ok(())
        })
    }

    /// `trim_stop(leaf, target_state, list?)`: signals
    /// the worker and either joins it now or appends its handle to
    /// `defer` for the caller to join later via `trim_stop_wait`.
    pub fn trim_stop(
        &self,
        guid: u64,
        target: TrimStopTarget,
        defer: Option<&mut TrimStopList>,
    ) -> Result<(), TrimError> {
        let handle = self.with_entry(guid, |entry| {
            if entry.worker.is_none() {
                return Err(TrimError::NotActive(guid));
            }
            let handle = entry.worker.take().unwrap();
            *handle.target_state.lock().unwrap() = Some(target.into());
            handle.stop_requested.store(true, Ordering::Release);
            Ok(handle)
        })?;

        match defer {
            Some(list) => {
                list.handles.push(handle);
                Ok(())
            },
            None => {
                let _ = handle.join.join();
                Ok(())
            },
        }
    }

    pub fn trim_stop_wait(&self, list: TrimStopList) { list.join_all(); }

    /// `trim_restart(leaf)`: on pool import, reload
    /// persisted state and resume if it was ACTIVE.
    pub fn trim_restart(&self, guid: u64) -> Result<(), TrimError> {
        self.with_entry(guid, |entry| {
            let persisted = zap::TrimPersistentState::load(&entry.leaf);
            persisted.apply_to(&entry.leaf);
            if persisted.state == TrimState::Active {
                let handle = manual::spawn(self.ctx.clone(), entry.leaf.clone(), entry.tlvdev.clone());
                entry.worker = Some(handle);
            }
            Ok(())
        })
    }

    /// `trim_simple(leaf, offset, length)`: a
    /// synchronous one-shot TRIM of a specific physical range, used by
    /// L2ARC header wipe and cache-device whole-device TRIM.
    pub fn trim_simple(&self, guid: u64, offset: u64, length: u64) -> Result<(), TrimError> {
        let leaf = self.with_entry(guid, |entry| Ok(entry.leaf.clone()))?;
        let mut tree = RangeTree::new();
        tree.add(offset, length);
        let stop = std::sync::atomic::AtomicBool::new(false);
        ranges::trim_ranges(&self.ctx, &leaf, &tree, TrimKind::Simple, &stop)
    }

    /// `autotrim_start(tvd)`.
    pub fn autotrim_start(&self, tlvdev: Arc<TopLevelVdev>) {
        let mut autotrim = self.autotrim.lock().unwrap();
        if autotrim.contains_key(&tlvdev.id()) {
            return;
        }
        let handle = auto::spawn(self.ctx.clone(), tlvdev.clone());
        autotrim.insert(tlvdev.id(), (tlvdev, handle));
    }

    /// `autotrim_stop_wait(tvd)`.
    pub fn autotrim_stop_wait(&self, tlvdev_id: usize) {
        let entry = self.autotrim.lock().unwrap().remove(&tlvdev_id);
        if let Some((_, handle)) = entry {
            handle.request_stop();
            handle.join();
        }
    }

    /// `autotrim_kick(pool)`: wake every autotrim
    /// worker, e.g. after a txg sync completed.
    pub fn autotrim_kick(&self) {
        for (_, handle) in self.autotrim.lock().unwrap().values() {
            handle.kick();
        }
    }
}
