//! A leaf device: the bottom of the vdev tree, the unit
//! TRIM actually issues I/O against.

use crate::pool::iostats::IoStats;
use crate::pool::metaslab::Metaslab;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// On-disk TRIM state, persisted as `vdev_trim_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrimState {
    None,
    Active,
    Suspended,
    Canceled,
    Complete,
}

impl TrimState {
    pub fn as_u64(self) -> u64 {
        match self {
            TrimState::None => 0,
            TrimState::Active => 1,
            TrimState::Suspended => 2,
            TrimState::Canceled => 3,
            TrimState::Complete => 4,
        }
    }

    pub fn from_u64(v: u64) -> Self {
        match v {
            1 => TrimState::Active,
            2 => TrimState::Suspended,
            3 => TrimState::Canceled,
            4 => TrimState::Complete,
            _ => TrimState::None,
        }
    }
}

impl std::fmt::Display for TrimState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrimState::None => "NONE",
            TrimState::Active => "ACTIVE",
            TrimState::Suspended => "SUSPENDED",
            TrimState::Canceled => "CANCELED",
            TrimState::Complete => "COMPLETE",
        };
        f.write_str(s)
    }
}

/// A minimal stand-in for a per-leaf ZAP object: a flat
/// key/value store of `u64`s, simulating what would really be a DMU
/// object committed through a transaction.
#[derive(Debug, Default)]
pub struct Zap {
    entries: Mutex<HashMap<String, u64>>,
}

impl Zap {
    pub fn new() -> Self { Zap::default() }

    pub fn set(&self, key: &str, value: u64) {
        self.entries.lock().unwrap().insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<u64> { self.entries.lock().unwrap().get(key).copied() }
}

/// A leaf device.
pub struct Leaf {
    guid: u64,
    writable: AtomicBool,
    detached: AtomicBool,
    removing: AtomicBool,
    ashift: u8,

    trim_state: Mutex<TrimState>,
    last_offset: AtomicU64,
    rate: AtomicU64,
    partial: AtomicBool,
    secure: AtomicBool,
    action_time: AtomicU64,

    bytes_done: AtomicU64,
    bytes_estimated: AtomicU64,

    metaslabs: Vec<Arc<Metaslab>>,
    iostats: IoStats,
    zap: Zap,

    // in-flight TRIM bookkeeping: a dedicated mutex disjoint from any
    // configuration lock.
    inflight: Mutex<u64>,
    inflight_cv: std::sync::Condvar,

    /// Test-only fault injection: the next N issued TRIM I/Os fail.
    fail_next: AtomicU64,
}

impl Leaf {
    pub fn new(guid: u64, ashift: u8, metaslabs: Vec<Arc<Metaslab>>) -> Self {
        Leaf {
            guid,
            writable: AtomicBool::new(true),
            detached: AtomicBool::new(false),
            removing: AtomicBool::new(false),
            ashift,
            trim_state: Mutex::new(TrimState::None),
            last_offset: AtomicU64::new(0),
            rate: AtomicU64::new(0),
            partial: AtomicBool::new(false),
            secure: AtomicBool::new(false),
            action_time: AtomicU64::new(0),
            bytes_done: AtomicU64::new(0),
            bytes_estimated: AtomicU64::new(0),
            metaslabs,
            iostats: IoStats::new(),
            zap: Zap::new(),
            inflight: Mutex::new(0),
            inflight_cv: std::sync::Condvar::new(),
            fail_next: AtomicU64::new(0),
        }
    }

    /// Make the next `n` issued TRIM I/Os on this leaf report failure.
    pub fn inject_failures(&self, n: u64) { self.fail_next.store(n, Ordering::Release); }

    /// Consumed by the issuing loop's completion callback: returns `true`
    /// (and decrements the counter) if this I/O should simulate failure.
    pub fn take_injected_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| if n > 0 { Some(n - 1) } else { None })
            .is_ok()
    }

    pub fn guid(&self) -> u64 { self.guid }

    pub fn ashift(&self) -> u8 { self.ashift }

    pub fn block_size(&self) -> u64 { 1u64 << self.ashift }

    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::Acquire) && !self.detached.load(Ordering::Acquire)
    }

    pub fn set_writable(&self, v: bool) { self.writable.store(v, Ordering::Release); }

    pub fn is_detached(&self) -> bool { self.detached.load(Ordering::Acquire) }

    /// Detach this leaf. The persisted last-offset is rolled back to the
    /// minimum of any uncommitted write; callers pass that floor in
    /// explicitly since only the TRIM worker knows what was in flight.
    pub fn detach(&self, rollback_last_offset_to: Option<u64>) {
        self.detached.store(true, Ordering::Release);
        if let Some(floor) = rollback_last_offset_to {
            self.roll_back_last_offset(floor);
        }
    }

    pub fn is_removing(&self) -> bool { self.removing.load(Ordering::Acquire) }

    pub fn set_removing(&self, v: bool) { self.removing.store(v, Ordering::Release); }

    pub fn metaslabs(&self) -> &[Arc<Metaslab>] { &self.metaslabs }

    pub fn iostats(&self) -> &IoStats { &self.iostats }

    pub fn zap(&self) -> &Zap { &self.zap }

    pub fn trim_state(&self) -> TrimState { *self.trim_state.lock().unwrap() }

    pub fn set_trim_state(&self, state: TrimState) { *self.trim_state.lock().unwrap() = state; }

    pub fn last_offset(&self) -> u64 { self.last_offset.load(Ordering::Acquire) }

    pub fn set_last_offset(&self, v: u64) { self.last_offset.store(v, Ordering::Release); }

    /// Roll the in-memory last-offset back to `floor` if it currently
    /// exceeds it, matching the failure-model rollback after an aborted
    /// or restarted TRIM pass.
    pub fn roll_back_last_offset(&self, floor: u64) {
        let _ = self.last_offset.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
            Some(cur.min(floor))
        });
    }

    pub fn rate(&self) -> u64 { self.rate.load(Ordering::Acquire) }

    pub fn set_rate(&self, v: u64) { self.rate.store(v, Ordering::Release); }

    pub fn partial(&self) -> bool { self.partial.load(Ordering::Acquire) }

    pub fn set_partial(&self, v: bool) { self.partial.store(v, Ordering::Release); }

    pub fn secure(&self) -> bool { self.secure.load(Ordering::Acquire) }

    pub fn set_secure(&self, v: bool) { self.secure.store(v, Ordering::Release); }

    pub fn action_time(&self) -> u64 { self.action_time.load(Ordering::Acquire) }

    pub fn set_action_time(&self, v: u64) { self.action_time.store(v, Ordering::Release); }

    pub fn bytes_done(&self) -> u64 { self.bytes_done.load(Ordering::Acquire) }

    pub fn add_bytes_done(&self, v: u64) { self.bytes_done.fetch_add(v, Ordering::AcqRel); }

    pub fn bytes_estimated(&self) -> u64 { self.bytes_estimated.load(Ordering::Acquire) }

    pub fn set_bytes_estimated(&self, v: u64) { self.bytes_estimated.store(v, Ordering::Release); }

    pub fn inflight_count(&self) -> u64 { *self.inflight.lock().unwrap() }

    /// Block while the number of in-flight TRIM I/Os is at or above
    /// `limit`.
    pub fn wait_for_inflight_below(&self, limit: u64) {
        let guard = self.inflight.lock().unwrap();
        let _unused = self.inflight_cv.wait_while(guard, |n| *n >= limit).unwrap();
    }

    pub fn begin_inflight(&self) {
        *self.inflight.lock().unwrap() += 1;
    }

    pub fn end_inflight(&self) {
        let mut guard = self.inflight.lock().unwrap();
        *guard = guard.saturating_sub(1);
        drop(guard);
        self.inflight_cv.notify_all();
    }

    /// Block until every in-flight TRIM I/O for this leaf has completed,
    /// so a metaslab can be safely re-enabled at the end of
    /// `trim_ranges`.
    pub fn wait_for_inflight_drain(&self) { self.wait_for_inflight_below(1); }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trim_state_round_trips_through_u64() {
        for s in [
            TrimState::None,
            TrimState::Active,
            TrimState::Suspended,
            TrimState::Canceled,
            TrimState::Complete,
        ] {
            assert_eq!(TrimState::from_u64(s.as_u64()), s);
        }
    }

    #[test]
    fn rollback_never_increases_last_offset() {
        let leaf = Leaf::new(1, 9, vec![]);
        leaf.set_last_offset(1000);
        leaf.roll_back_last_offset(500);
        assert_eq!(leaf.last_offset(), 500);
        leaf.roll_back_last_offset(800); // no-op: 800 > current 500
        assert_eq!(leaf.last_offset(), 500);
    }

    #[test]
    fn zap_persists_values() {
        let zap = Zap::new();
        zap.set("vdev_trim_last_offset", 4096);
        assert_eq!(zap.get("vdev_trim_last_offset"), Some(4096));
        assert_eq!(zap.get("missing"), None);
    }
}
