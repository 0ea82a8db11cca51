//! Per-volume ZVOL state.

use crate::zvol::range_lock::RangeLock;
use crate::zvol::suspend::{StateLock, SuspendLock};
use crate::zvol::zil::ZilHandle;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

/// `volmode` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolMode {
    None,
    Geom,
    Dev,
    Default,
}

/// Stable 64-bit hash of a dataset name, used for hot lookup in the name
/// table's hash index.
pub fn hash_name(name: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    name.hash(&mut hasher);
    hasher.finish()
}

/// Opaque handles into the (out-of-scope) pool substrate: we model them
/// as plain ids since the DMU object-set/dnode internals aren't ours to
/// implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectSetHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnodeHandle(pub u64);

pub struct ZvolState {
    name: Mutex<String>,
    hash: u64,
    guid: u64,
    volsize: AtomicU64,
    blocksize: u64,

    open_count: AtomicU64,
    suspend_refcount: AtomicU64,
    removing: AtomicBool,
    readonly: AtomicBool,
    volmode: Mutex<VolMode>,
    threaded: AtomicBool,

    /// Guards the read-modify-write sequences in the suspend/remove
    /// protocols; `find_by_name` returns holding it whenever `lock_mode
    /// != LockMode::None`.
    pub(crate) state_lock: StateLock,
    /// Reader-writer: readers are ordinary data I/O, the writer is
    /// suspend.
    pub(crate) suspend_lock: SuspendLock,
    pub(crate) removing_cv: Condvar,
    pub(crate) removing_cv_lock: Mutex<()>,
    pub(crate) io_done_cv: Condvar,
    pub(crate) io_done_cv_lock: Mutex<()>,

    pub(crate) range_lock: RangeLock,
    pub(crate) zil: Mutex<Option<ZilHandle>>,

    object_set: Mutex<ObjectSetHandle>,
    dnode: Mutex<DnodeHandle>,
}

impl ZvolState {
    pub fn new(name: impl Into<String>, guid: u64, volsize: u64, blocksize: u64, object_set: ObjectSetHandle, dnode: DnodeHandle) -> Self {
        let name = name.into();
        let hash = hash_name(&name);
        ZvolState {
            name: Mutex::new(name),
            hash,
            guid,
            volsize: AtomicU64::new(volsize),
            blocksize,
            open_count: AtomicU64::new(0),
            suspend_refcount: AtomicU64::new(0),
            removing: AtomicBool::new(false),
            readonly: AtomicBool::new(false),
            volmode: Mutex::new(VolMode::Default),
            threaded: AtomicBool::new(true),
            state_lock: StateLock::new(),
            suspend_lock: SuspendLock::new(),
            removing_cv: Condvar::new(),
            removing_cv_lock: Mutex::new(()),
            io_done_cv: Condvar::new(),
            io_done_cv_lock: Mutex::new(()),
            range_lock: RangeLock::new(),
            zil: Mutex::new(None),
            object_set: Mutex::new(object_set),
            dnode: Mutex::new(dnode),
        }
    }

    pub fn name(&self) -> String { self.name.lock().unwrap().clone() }

    pub fn set_name(&self, name: impl Into<String>) { *self.name.lock().unwrap() = name.into(); }

    pub fn hash(&self) -> u64 { self.hash }

    pub fn guid(&self) -> u64 { self.guid }

    pub fn volsize(&self) -> u64 { self.volsize.load(Ordering::Acquire) }

    pub fn set_volsize(&self, v: u64) { self.volsize.store(v, Ordering::Release); }

    pub fn blocksize(&self) -> u64 { self.blocksize }

    pub fn open_count(&self) -> u64 { self.open_count.load(Ordering::Acquire) }

    pub fn open(&self) { self.open_count.fetch_add(1, Ordering::AcqRel); }

    pub fn close(&self) {
        self.open_count.fetch_sub(1, Ordering::AcqRel);
        self.io_done_cv.notify_all();
        self.removing_cv.notify_all();
    }

    pub fn suspend_refcount(&self) -> u64 { self.suspend_refcount.load(Ordering::Acquire) }

    pub fn bump_suspend_refcount(&self, delta: i64) {
        if delta >= 0 {
            self.suspend_refcount.fetch_add(delta as u64, Ordering::AcqRel);
        } else {
            self.suspend_refcount.fetch_sub((-delta) as u64, Ordering::AcqRel);
        }
    }

    pub fn is_removing(&self) -> bool { self.removing.load(Ordering::Acquire) }

    pub fn set_removing(&self, v: bool) { self.removing.store(v, Ordering::Release); }

    pub fn is_readonly(&self) -> bool { self.readonly.load(Ordering::Acquire) }

    pub fn set_readonly(&self, v: bool) { self.readonly.store(v, Ordering::Release); }

    pub fn volmode(&self) -> VolMode { *self.volmode.lock().unwrap() }

    pub fn set_volmode(&self, v: VolMode) { *self.volmode.lock().unwrap() = v; }

    pub fn is_threaded(&self) -> bool { self.threaded.load(Ordering::Acquire) }

    pub fn object_set(&self) -> ObjectSetHandle { *self.object_set.lock().unwrap() }

    pub fn set_object_set(&self, h: ObjectSetHandle) { *self.object_set.lock().unwrap() = h; }

    pub fn dnode(&self) -> DnodeHandle { *self.dnode.lock().unwrap() }
}
