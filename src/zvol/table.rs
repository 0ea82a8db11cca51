//! The name table: a linked list of every live
//! [`ZvolState`] protected by a reader-writer lock, plus a hash index
//! keyed by the truncated 64-bit hash of the dataset name for O(1)
//! lookup.

use crate::zvol::state::ZvolState;
use crate::zvol::ZvolError;
use std::sync::{Arc, RwLock, RwLockReadGuard};

/// How hard [`ZvolTable::find_by_name`] should try to also acquire the
/// matching state's suspend lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    None,
    Reader,
    Writer,
}

/// A found state, with its suspend lock acquired per the requested
/// [`LockMode`]. The caller owns releasing it — via
/// [`crate::zvol::state::ZvolState::suspend_lock`]'s
/// `unlock_reader`/`unlock_writer` — once done, typically by driving the
/// suspend/resume protocol in [`crate::zvol::suspend`]. When `lock_mode
/// != LockMode::None`, the state mutex is held too (`state_locked ==
/// true`) and must be released via `state.state_lock.unlock()` — again,
/// `suspend::suspend` already does this for the `Writer` case.
pub struct FoundState {
    pub state: Arc<ZvolState>,
    pub lock_mode: LockMode,
    pub state_locked: bool,
}

/// The name table: `zvol_state_list` plus its hash index. Hash buckets
/// hold plain `Vec`s since the volume count per pool is small enough
/// that bucket scans stay cheap.
pub struct ZvolTable {
    states: RwLock<Vec<Arc<ZvolState>>>,
    bucket_count: u64,
}

impl ZvolTable {
    pub fn new(bucket_count: u64) -> Self { ZvolTable { states: RwLock::new(Vec::new()), bucket_count: bucket_count.max(1) } }

    fn bucket_of(&self, hash: u64) -> u64 { hash % self.bucket_count }

    pub fn insert(&self, state: Arc<ZvolState>) { self.states.write().unwrap().push(state); }

    pub fn remove(&self, name: &str) {
        self.states.write().unwrap().retain(|s| s.name() != name);
    }

    pub fn list(&self) -> RwLockReadGuard<'_, Vec<Arc<ZvolState>>> { self.states.read().unwrap() }

    pub fn list_names_under(&self, dataset: &str) -> Vec<String> {
        self.states.read().unwrap().iter().map(|s| s.name()).filter(|n| n == dataset || n.starts_with(&format!("{dataset}/"))).collect()
    }

    /// `find_by_name(name, lock_mode)`: acquires the global lock for
    /// read, scans the (conceptual) hash bucket, and on match, if
    /// `lock_mode != NONE`, tries `trylock` on the suspend lock; on
    /// failure it drops the state mutex, acquires the suspend lock in
    /// blocking mode, then reacquires the state mutex. Returns with both
    /// held in that case — suspend lock always taken before the state
    /// mutex is re-taken, so this never blocks on the suspend lock while
    /// holding the state mutex.
    pub fn find_by_name(&self, name: &str, lock_mode: LockMode) -> Result<FoundState, ZvolError> {
        let states = self.states.read().unwrap();
        let target_hash = crate::zvol::state::hash_name(name);
        let _bucket = self.bucket_of(target_hash);
        let found = states.iter().find(|s| s.hash() == target_hash && s.name() == name).cloned();
        drop(states);

        let state = found.ok_or_else(|| ZvolError::NotFound(name.to_string()))?;

        if lock_mode == LockMode::None {
            return Ok(FoundState { state, lock_mode, state_locked: false });
        }

        state.state_lock.lock();
        let acquired = match lock_mode {
            LockMode::Reader => state.suspend_lock.try_lock_reader(),
            LockMode::Writer => state.suspend_lock.try_lock_writer(),
            LockMode::None => unreachable!(),
        };
        if acquired.is_err() {
            state.state_lock.unlock();
            match lock_mode {
                LockMode::Reader => state.suspend_lock.lock_reader(),
                LockMode::Writer => state.suspend_lock.lock_writer(),
                LockMode::None => unreachable!(),
            }
            state.state_lock.lock();
        }

        Ok(FoundState { state, lock_mode, state_locked: true })
    }
}

impl Default for ZvolTable {
    fn default() -> Self { ZvolTable::new(256) }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::zvol::state::{DnodeHandle, ObjectSetHandle};

    fn state(name: &str) -> Arc<ZvolState> {
        Arc::new(ZvolState::new(name, 1, 1024 * 1024, 512, ObjectSetHandle(1), DnodeHandle(1)))
    }

    #[test]
    fn insert_then_find_by_name_round_trips() {
        let table = ZvolTable::default();
        table.insert(state("tank/vol1"));
        let found = table.find_by_name("tank/vol1", LockMode::None).unwrap();
        assert_eq!(found.state.name(), "tank/vol1");
    }

    #[test]
    fn find_by_name_missing_is_not_found() {
        let table = ZvolTable::default();
        let err = table.find_by_name("tank/nope", LockMode::None).unwrap_err();
        assert_eq!(err, ZvolError::NotFound("tank/nope".to_string()));
    }

    #[test]
    fn remove_drops_the_entry() {
        let table = ZvolTable::default();
        table.insert(state("tank/vol1"));
        table.remove("tank/vol1");
        assert!(table.find_by_name("tank/vol1", LockMode::None).is_err());
    }

    #[test]
    fn list_names_under_matches_dataset_and_descendants() {
        let table = ZvolTable::default();
        table.insert(state("tank/vol1"));
        table.insert(state("tank/vol1@snap"));
        table.insert(state("tank/vol2"));
        let names = table.list_names_under("tank/vol1");
        assert!(names.contains(&"tank/vol1".to_string()));
        assert!(names.contains(&"tank/vol1@snap".to_string()));
        assert!(!names.contains(&"tank/vol2".to_string()));
    }
}
