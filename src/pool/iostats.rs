//! Per-I/O-type counters exposed as readable iostats.

use std::sync::atomic::{AtomicU64, Ordering};

/// Which code path issued a TRIM I/O: manual, automatic, or UNMAP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrimKind {
    Manual,
    Auto,
    Simple,
}

#[derive(Debug, Default)]
struct Counters {
    issued_extents: AtomicU64,
    issued_bytes: AtomicU64,
    skipped_extents: AtomicU64,
    skipped_bytes: AtomicU64,
    failed_extents: AtomicU64,
    failed_bytes: AtomicU64,
}

/// Counters for one leaf, broken down by [`TrimKind`].
#[derive(Debug, Default)]
pub struct IoStats {
    manual: Counters,
    auto: Counters,
    simple: Counters,
}

impl IoStats {
    pub fn new() -> Self { IoStats::default() }

    fn counters(&self, kind: TrimKind) -> &Counters {
        match kind {
            TrimKind::Manual => &self.manual,
            TrimKind::Auto => &self.auto,
            TrimKind::Simple => &self.simple,
        }
    }

    pub fn record_issued(&self, kind: TrimKind, bytes: u64) {
        let c = self.counters(kind);
        c.issued_extents.fetch_add(1, Ordering::Relaxed);
        c.issued_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_skipped(&self, kind: TrimKind, bytes: u64) {
        let c = self.counters(kind);
        c.skipped_extents.fetch_add(1, Ordering::Relaxed);
        c.skipped_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_failed(&self, kind: TrimKind, bytes: u64) {
        let c = self.counters(kind);
        c.failed_extents.fetch_add(1, Ordering::Relaxed);
        c.failed_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn issued_bytes(&self, kind: TrimKind) -> u64 {
        self.counters(kind).issued_bytes.load(Ordering::Relaxed)
    }

    pub fn skipped_bytes(&self, kind: TrimKind) -> u64 {
        self.counters(kind).skipped_bytes.load(Ordering::Relaxed)
    }

    pub fn failed_extents(&self, kind: TrimKind) -> u64 {
        self.counters(kind).failed_extents.load(Ordering::Relaxed)
    }
}
