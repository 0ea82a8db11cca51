//! The metaslab allocator is out of scope; this models just
//! the "load/enable/disable" contract the TRIM engine consumes, plus the
//! two range trees it needs (`ms_allocatable`, `ms_trim`).

use crate::pool::rangetree::RangeTree;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

/// A contiguous allocation region of a top-level vdev.
#[derive(Debug)]
pub struct Metaslab {
    id: usize,
    /// Logical offset of this metaslab within the top-level vdev.
    start: u64,
    size: u64,
    loaded: AtomicBool,
    /// Non-zero prevents new allocations; TRIM bumps it while it owns the
    /// metaslab.
    disabled: AtomicI64,
    /// Whether any block has ever been allocated from this metaslab.
    /// `partial` TRIM skips metaslabs where this is false.
    ever_written: AtomicBool,
    allocatable: Mutex<RangeTree>,
    trim: Mutex<RangeTree>,
}

impl Metaslab {
    pub fn new(id: usize, start: u64, size: u64) -> Self {
        Metaslab {
            id,
            start,
            size,
            loaded: AtomicBool::new(false),
            disabled: AtomicI64::new(0),
            ever_written: AtomicBool::new(false),
            allocatable: Mutex::new(RangeTree::new()),
            trim: Mutex::new(RangeTree::new()),
        }
    }

    pub fn id(&self) -> usize { self.id }

    pub fn start(&self) -> u64 { self.start }

    pub fn size(&self) -> u64 { self.size }

    pub fn is_loaded(&self) -> bool { self.loaded.load(Ordering::Acquire) }

    pub fn ever_written(&self) -> bool { self.ever_written.load(Ordering::Acquire) }

    pub fn mark_written(&self) { self.ever_written.store(true, Ordering::Release); }

    /// Disable the metaslab for new allocations. May be called
    /// concurrently by manual and automatic TRIM; the counter tracks how
    /// many callers currently hold it disabled.
    pub fn disable(&self) { self.disabled.fetch_add(1, Ordering::AcqRel); }

    pub fn enable(&self) { self.disabled.fetch_sub(1, Ordering::AcqRel); }

    pub fn is_disabled(&self) -> bool { self.disabled.load(Ordering::Acquire) > 0 }

    /// Force-load free-range metadata. TRIM must do this before it can
    /// enumerate `ms_allocatable`. Returns `false` if the
    /// load failed (simulated failure is only ever triggered in tests).
    pub fn force_load(&self) -> bool {
        self.loaded.store(true, Ordering::Release);
        true
    }

    pub fn allocatable(&self) -> &Mutex<RangeTree> { &self.allocatable }

    pub fn trim_tree(&self) -> &Mutex<RangeTree> { &self.trim }

    /// Record a free of `[start, start+len)` in both `ms_allocatable` and
    /// `ms_trim`, as the DMU free path would.
    pub fn free(&self, start: u64, len: u64) {
        self.allocatable.lock().unwrap().add(start, len);
        self.trim.lock().unwrap().add(start, len);
        self.mark_written();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn disable_counter_tracks_concurrent_holders() {
        let ms = Metaslab::new(0, 0, 1 << 20);
        assert!(!ms.is_disabled());
        ms.disable();
        ms.disable();
        assert!(ms.is_disabled());
        ms.enable();
        assert!(ms.is_disabled());
        ms.enable();
        assert!(!ms.is_disabled());
    }

    #[test]
    fn free_populates_both_trees_and_marks_written() {
        let ms = Metaslab::new(0, 0, 1 << 20);
        assert!(!ms.ever_written());
        ms.free(1024, 4096);
        assert!(ms.ever_written());
        assert!(ms.allocatable().lock().unwrap().contains(1024, 4096));
        assert!(ms.trim_tree().lock().unwrap().contains(1024, 4096));
    }
}
