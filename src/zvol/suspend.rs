//! The suspend lock and state lock primitives, and the suspend/resume
//! protocol.
//!
//! Both locks are modeled as explicit acquire/release primitives rather
//! than `std::sync::Mutex`/`RwLock`'s RAII guards: `find_by_name` hands
//! them back held across an unrelated caller-controlled scope, which an
//! owned guard can't express without unsafe lifetime extension.
//! [`RangeLock`](crate::zvol::range_lock::RangeLock) uses the same
//! id-based shape for the same reason.

use crate::zvol::state::ZvolState;
use crate::zvol::zil::ZilHandle;
use crate::zvol::ZvolError;
use std::sync::{Condvar, Mutex};

/// Plain mutual exclusion, held by explicit `lock`/`try_lock`/`unlock`
/// calls for the same reason as [`SuspendLock`]: `find_by_name`'s
/// Writer/Reader modes hand it back held past the call's return.
#[derive(Debug, Default)]
pub struct StateLock {
    locked: Mutex<bool>,
    cv: Condvar,
}

impl StateLock {
    pub fn new() -> Self { StateLock::default() }

    pub fn lock(&self) {
        let mut guard = self.locked.lock().unwrap();
        while *guard {
            guard = self.cv.wait(guard).unwrap();
        }
        *guard = true;
    }

    /// Non-blocking acquisition; `Ok(())` on success.
    pub fn try_lock(&self) -> Result<(), ()> {
        let mut guard = self.locked.lock().unwrap();
        if *guard {
            return Err(());
        }
        *guard = true;
        Ok(())
    }

    pub fn unlock(&self) {
        let mut guard = self.locked.lock().unwrap();
        *guard = false;
        drop(guard);
        self.cv.notify_all();
    }
}

#[derive(Debug, Default)]
struct SuspendLockState {
    readers: u32,
    writer: bool,
}

/// A single-slot reader-writer lock: any number of readers, or one
/// writer, held by explicit acquire/release calls rather than guards.
#[derive(Debug, Default)]
pub struct SuspendLock {
    state: Mutex<SuspendLockState>,
    cv: Condvar,
}

impl SuspendLock {
    pub fn new() -> Self { SuspendLock::default() }

    pub fn lock_reader(&self) {
        let mut guard = self.state.lock().unwrap();
        while guard.writer {
            guard = self.cv.wait(guard).unwrap();
        }
        guard.readers += 1;
    }

    pub fn lock_writer(&self) {
        let mut guard = self.state.lock().unwrap();
        while guard.writer || guard.readers > 0 {
            guard = self.cv.wait(guard).unwrap();
        }
        guard.writer = true;
    }

    /// Non-blocking writer acquisition; `Ok(())` on success.
    pub fn try_lock_writer(&self) -> Result<(), ()> {
        let mut guard = self.state.lock().unwrap();
        if guard.writer || guard.readers > 0 {
            return Err(());
        }
        guard.writer = true;
        Ok(())
    }

    /// Non-blocking reader acquisition; `Ok(())` on success.
    pub fn try_lock_reader(&self) -> Result<(), ()> {
        let mut guard = self.state.lock().unwrap();
        if guard.writer {
            return Err(());
        }
        guard.readers += 1;
        Ok(())
    }

    pub fn unlock_reader(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.readers = guard.readers.saturating_sub(1);
        drop(guard);
        self.cv.notify_all();
    }

    pub fn unlock_writer(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.writer = false;
        drop(guard);
        self.cv.notify_all();
    }
}

/// Request to suspend a volume. Expects the caller already holds the
/// state's suspend lock as writer and its state mutex (as
/// `find_by_name(name, WRITER)` would have left it); releases the state
/// mutex before returning but keeps the suspend lock held for
/// [`resume`] to release.
pub fn suspend(state: &ZvolState) -> Result<(), ZvolError> {
    if state.is_removing() {
        state.state_lock.unlock();
        state.suspend_lock.unlock_writer();
        return Err(ZvolError::Io);
    }

    state.bump_suspend_refcount(1);
    if state.open_count() > 0 {
        *state.zil.lock().unwrap() = None;
    }
    // Do not hold the state mutex across suspend/resume: it would lock
    // up unrelated find_by_name lookups for however long the caller
    // keeps the volume suspended.
    state.state_lock.unlock();
    Ok(())
}

/// Resume after [`suspend`]: re-initializes the ZIL,
/// releases the suspend lock, and decrements the refcount; broadcasts
/// the removing condvar if removal was requested while suspended.
pub fn resume(state: &ZvolState) {
    state.state_lock.lock();
    if state.open_count() > 0 {
        *state.zil.lock().unwrap() = Some(ZilHandle::new());
    }
    state.bump_suspend_refcount(-1);
    state.state_lock.unlock();

    state.suspend_lock.unlock_writer();
    if state.is_removing() {
        state.removing_cv.notify_all();
    }
}
