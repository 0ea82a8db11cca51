//! Reader-writer range lock keyed by `(offset, length)`, for concurrent
//! data operations on a single volume and for the stable-order locking
//! `zvol_clone_range` requires across two volumes.

use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Range {
    pub offset: u64,
    pub length: u64,
}

impl Range {
    pub fn new(offset: u64, length: u64) -> Self { Range { offset, length } }

    pub fn end(&self) -> u64 { self.offset + self.length }

    pub fn overlaps(&self, other: &Range) -> bool { self.offset < other.end() && other.offset < self.end() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Reader,
    Writer,
}

struct Held {
    range: Range,
    mode: Mode,
}

/// A single volume's range lock: any number of non-overlapping readers,
/// or one writer, per overlapping range. Requests that overlap a
/// currently-held range block until it clears; unrelated ranges proceed
/// concurrently.
#[derive(Default)]
pub struct RangeLock {
    held: Mutex<BTreeMap<u64, Held>>,
    cv: Condvar,
    next_id: Mutex<u64>,
}

impl RangeLock {
    pub fn new() -> Self { RangeLock { held: Mutex::new(BTreeMap::new()), cv: Condvar::new(), next_id: Mutex::new(0) } }

    fn conflicts(held: &BTreeMap<u64, Held>, range: &Range, mode: Mode, exclude: Option<u64>) -> bool {
        held.iter().any(|(id, h)| {
            if Some(*id) == exclude {
                return false;
            }
            if !h.range.overlaps(range) {
                return false;
            }
            mode == Mode::Writer || h.mode == Mode::Writer
        })
    }

    fn acquire(&self, range: Range, mode: Mode) -> u64 {
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        let my_id = *id;
        drop(id);

        let mut guard = self.held.lock().unwrap();
        while Self::conflicts(&guard, &range, mode, None) {
            guard = self.cv.wait(guard).unwrap();
        }
        guard.insert(my_id, Held { range, mode });
        my_id
    }

    pub fn lock_reader(&self, range: Range) -> u64 { self.acquire(range, Mode::Reader) }

    pub fn lock_writer(&self, range: Range) -> u64 { self.acquire(range, Mode::Writer) }

    pub fn unlock(&self, id: u64) {
        let mut guard = self.held.lock().unwrap();
        guard.remove(&id);
        drop(guard);
        self.cv.notify_all();
    }
}

/// Acquires a reader lock on `a` and a writer lock on `b` in a stable
/// global order — by pointer identity, then by offset — so that two
/// callers racing to clone in opposite directions never deadlock.
pub fn lock_pair_for_clone(a: &RangeLock, a_range: Range, b: &RangeLock, b_range: Range) -> (u64, u64) {
    let a_ptr = a as *const RangeLock as usize;
    let b_ptr = b as *const RangeLock as usize;
    let a_first = if a_ptr != b_ptr { a_ptr < b_ptr } else { a_range.offset <= b_range.offset };

    if a_first {
        let a_id = a.lock_reader(a_range);
        let b_id = b.lock_writer(b_range);
        (a_id, b_id)
    } else {
        let b_id = b.lock_writer(b_range);
        let a_id = a.lock_reader(a_range);
        (a_id, b_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc as StdArc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn non_overlapping_readers_proceed_concurrently() {
        let lock = RangeLock::new();
        let a = lock.lock_reader(Range::new(0, 100));
        let b = lock.lock_reader(Range::new(200, 100));
        lock.unlock(a);
        lock.unlock(b);
    }

    #[test]
    fn writer_blocks_overlapping_reader_until_released() {
        let lock = StdArc::new(RangeLock::new());
        let writer_id = lock.lock_writer(Range::new(0, 100));

        let lock2 = lock.clone();
        let handle = thread::spawn(move || {
            let reader_id = lock2.lock_reader(Range::new(50, 10));
            lock2.unlock(reader_id);
        });

        thread::sleep(Duration::from_millis(20));
        lock.unlock(writer_id);
        handle.join().unwrap();
    }

    #[test]
    fn range_overlap_is_half_open() {
        let a = Range::new(0, 10);
        let b = Range::new(10, 10);
        assert!(!a.overlaps(&b));
        let c = Range::new(9, 10);
        assert!(a.overlaps(&c));
    }
}
