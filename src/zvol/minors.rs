//! Minor-node lifecycle: creation, removal, rename, and property
//! propagation, all dispatched onto a single per-pool task queue so
//! their relative order is preserved, plus the
//! two-phase removal protocol.

use crate::pool::context::PoolContext;
use crate::pool::taskq::SerialTaskq;
use crate::zvol::state::{VolMode, ZvolState};
use crate::zvol::table::{LockMode, ZvolTable};
use crate::zvol::ZvolError;
use std::sync::Arc;
use std::sync::Mutex;

/// One minor-lifecycle operation code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    CreateMinors,
    RemoveMinors,
    RenameMinors,
    SetSnapdev,
    SetVolmode,
}

/// A dispatched task: the operation, one or two dataset names, an
/// optional numeric value, and accumulated progress counters.
#[derive(Debug, Clone)]
pub struct Task {
    pub op: Op,
    pub name: String,
    pub second_name: Option<String>,
    pub value: Option<u64>,
    pub total: u64,
    pub done: u64,
    pub errors: u64,
}

/// Per-pool single-threaded dispatcher for minor-lifecycle tasks. No
/// per-zvol serialization beyond the state lock is required between
/// sequential task operations.
pub struct MinorDispatcher {
    taskq: SerialTaskq,
    completed: Arc<Mutex<Vec<Task>>>,
}

impl MinorDispatcher {
    pub fn new(pool_name: &str) -> Self {
        MinorDispatcher { taskq: SerialTaskq::new(format!("zvol-minors-{pool_name}")), completed: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Dispatches `job` and records its resulting [`Task`] once it runs,
    /// preserving submission order.
    fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() -> Task + Send + 'static,
    {
        let completed = self.completed.clone();
        self.taskq.dispatch(move || {
            let task = job();
            completed.lock().unwrap().push(task);
        });
    }

    /// Tasks that have finished running, in completion (== submission)
    /// order.
    pub fn completed(&self) -> Vec<Task> { self.completed.lock().unwrap().clone() }
}

/// `zvol_create_minors(name)`: asynchronously scans a
/// dataset tree and creates an OS-visible device node for every ZVOL
/// (and visible snapshot) under it, including encrypted clones whose
/// wrapping key is loaded.
pub fn create_minors(ctx: &Arc<PoolContext>, dispatcher: &MinorDispatcher, table: &Arc<ZvolTable>, name: &str) {
    let table = table.clone();
    let name = name.to_string();
    let logger = ctx.logger.clone();
    dispatcher.dispatch(move || {
        let candidates = table.list_names_under(&name);
        let mut done = 0;
        let mut errors = 0;
        for candidate in &candidates {
            if table.find_by_name(candidate, LockMode::None).is_ok() {
                done += 1;
            } else {
                errors += 1;
            }
        }
        slog::debug!(logger, "zvol_create_minors"; "name" => &name, "done" => done);
        Task { op: Op::CreateMinors, name, second_name: None, value: None, total: candidates.len() as u64, done, errors }
    });
}

/// `zvol_remove_minors(pool, name, async)`.
/// Runs the collection phase synchronously against the table (it only
/// flips in-memory flags) and dispatches the blocking shutdown phase
/// onto the task queue.
pub fn remove_minors(ctx: &Arc<PoolContext>, dispatcher: &MinorDispatcher, table: &Arc<ZvolTable>, name: Option<&str>) -> Result<u64, ZvolError> {
    let candidates: Vec<Arc<ZvolState>> = {
        let all = table.list();
        all.iter()
            .filter(|s| match name {
                None => true,
                Some(n) => s.name() == n || s.name().starts_with(&format!("{n}/")),
            })
            .cloned()
            .collect()
    };

    if candidates.is_empty() {
        return Err(ZvolError::NotFound(name.unwrap_or("*").to_string()));
    }

    // Collection phase: flag as removing under the state+suspend locks,
    // then release both before the blocking phase. Tries the suspend
    // lock non-blocking while holding the state mutex first; only on
    // failure does it drop the state mutex before blocking on the
    // suspend lock, so this thread never blocks on suspend_lock while
    // holding state_lock (the inverse order can deadlock against a
    // concurrent suspend() holding suspend_lock and waiting on
    // state_lock).
    let mut to_remove = Vec::new();
    for state in candidates {
        state.state_lock.lock();
        if state.is_removing() {
            state.state_lock.unlock();
            continue;
        }
        if state.suspend_lock.try_lock_writer().is_err() {
            state.state_lock.unlock();
            state.suspend_lock.lock_writer();
            state.state_lock.lock();
        }
        state.set_removing(true);
        state.suspend_lock.unlock_writer();
        state.state_lock.unlock();
        to_remove.push(state);
    }

    let n = to_remove.len() as u64;
    let table = table.clone();
    let logger = ctx.logger.clone();
    let requested = name.map(|s| s.to_string()).unwrap_or_default();
    dispatcher.dispatch(move || {
        let mut done = 0;
        for state in &to_remove {
            state.state_lock.lock();
            while state.open_count() > 0 || state.suspend_refcount() > 0 {
                let lock = state.removing_cv_lock.lock().unwrap();
                let _ = state.removing_cv.wait_timeout(lock, std::time::Duration::from_millis(10)).unwrap();
            }
            table.remove(&state.name());
            state.state_lock.unlock();
            done += 1;
        }
        slog::debug!(logger, "zvol_remove_minors"; "name" => &requested, "done" => done);
        Task { op: Op::RemoveMinors, name: requested.clone(), second_name: None, value: None, total: done, done, errors: 0 }
    });

    Ok(n)
}

/// `zvol_rename_minors(pool, old, new, async)`: renames
/// every matching minor and its descendants.
pub fn rename_minors(ctx: &Arc<PoolContext>, dispatcher: &MinorDispatcher, table: &Arc<ZvolTable>, old: &str, new: &str) {
    let table = table.clone();
    let old = old.to_string();
    let new = new.to_string();
    let logger = ctx.logger.clone();
    dispatcher.dispatch(move || {
        let states = table.list();
        let mut done = 0;
        for state in states.iter() {
            let state_name = state.name();
            if state_name == old {
                state.set_name(new.clone());
                done += 1;
            } else if let Some(suffix) = state_name.strip_prefix(&format!("{old}/")) {
                state.set_name(format!("{new}/{suffix}"));
                done += 1;
            }
        }
        slog::debug!(logger, "zvol_rename_minors"; "old" => &old, "new" => &new, "done" => done);
        Task { op: Op::RenameMinors, name: old.clone(), second_name: Some(new.clone()), value: None, total: done, done, errors: 0 }
    });
}

/// The two descendant-propagated properties `zvol_set_common` handles.
#[derive(Debug, Clone, Copy)]
pub enum CommonProperty {
    Volmode(VolMode),
    SnapdevVisible(bool),
}

/// `zvol_set_common(dataset, property, source, value)`:
/// a sync-task that updates `snapdev` or `volmode` at every descendant
/// and kicks per-descendant minor reconfiguration.
pub fn set_common(ctx: &Arc<PoolContext>, dispatcher: &MinorDispatcher, table: &Arc<ZvolTable>, dataset: &str, property: CommonProperty) {
    let table = table.clone();
    let dataset = dataset.to_string();
    let logger = ctx.logger.clone();
    let op = match property {
        CommonProperty::Volmode(_) => Op::SetVolmode,
        CommonProperty::SnapdevVisible(_) => Op::SetSnapdev,
    };
    dispatcher.dispatch(move || {
        let names = table.list_names_under(&dataset);
        let mut done = 0;
        for name in &names {
            if let Ok(found) = table.find_by_name(name, LockMode::None) {
                if let CommonProperty::Volmode(mode) = property {
                    found.state.set_volmode(mode);
                }
                done += 1;
            }
        }
        slog::debug!(logger, "zvol_set_common"; "dataset" => &dataset, "done" => done);
        let value = match property {
            CommonProperty::Volmode(mode) => mode as u64,
            CommonProperty::SnapdevVisible(v) => v as u64,
        };
        Task { op, name: dataset.clone(), second_name: None, value: Some(value), total: names.len() as u64, done, errors: 0 }
    });
}

/// `zvol_set_volsize(name, bytes)`: grows or shrinks a
/// volume. Shrinking frees everything beyond the new size — modeled
/// here as updating the in-memory size only, since the actual free is a
/// DMU operation out of scope.
pub fn set_volsize(table: &ZvolTable, name: &str, bytes: u64) -> Result<(), ZvolError> {
    if bytes == 0 {
        return Err(ZvolError::InvalidArgument("volsize must be nonzero".to_string()));
    }
    let found = table.find_by_name(name, LockMode::None)?;
    if bytes % found.state.blocksize() != 0 {
        return Err(ZvolError::InvalidArgument("volsize must be a multiple of the block size".to_string()));
    }
    found.state.set_volsize(bytes);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tunables::Tunables;
    use crate::zvol::state::{DnodeHandle, ObjectSetHandle};
    use std::time::Duration;

    fn ctx() -> Arc<PoolContext> { Arc::new(PoolContext::new("tank", Tunables::default())) }

    fn wait_for<F: Fn() -> bool>(pred: F) {
        for _ in 0..200 {
            if pred() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("condition never became true");
    }

    #[test]
    fn create_minors_counts_matching_descendants() {
        let ctx = ctx();
        let table = Arc::new(ZvolTable::default());
        table.insert(Arc::new(ZvolState::new("tank/vol1", 1, 1024, 512, ObjectSetHandle(1), DnodeHandle(1))));
        table.insert(Arc::new(ZvolState::new("tank/vol2", 2, 1024, 512, ObjectSetHandle(2), DnodeHandle(2))));
        let dispatcher = MinorDispatcher::new("tank");

        create_minors(&ctx, &dispatcher, &table, "tank");
        wait_for(|| !dispatcher.completed().is_empty());

        let tasks = dispatcher.completed();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].done, 2);
    }

    #[test]
    fn remove_minors_waits_for_open_count_to_drain() {
        let ctx = ctx();
        let table = Arc::new(ZvolTable::default());
        let state = Arc::new(ZvolState::new("tank/vol1", 1, 1024, 512, ObjectSetHandle(1), DnodeHandle(1)));
        state.open();
        table.insert(state.clone());
        let dispatcher = MinorDispatcher::new("tank");

        remove_minors(&ctx, &dispatcher, &table, Some("tank/vol1")).unwrap();
        assert!(state.is_removing());

        std::thread::sleep(Duration::from_millis(30));
        assert!(dispatcher.completed().is_empty(), "must block while open_count > 0");

        state.close();
        wait_for(|| !dispatcher.completed().is_empty());
        assert!(table.find_by_name("tank/vol1", LockMode::None).is_err());
    }

    #[test]
    fn remove_minors_reports_not_found_for_unmatched_name() {
        let ctx = ctx();
        let table = Arc::new(ZvolTable::default());
        let dispatcher = MinorDispatcher::new("tank");
        let err = remove_minors(&ctx, &dispatcher, &table, Some("tank/nope")).unwrap_err();
        assert_eq!(err, ZvolError::NotFound("tank/nope".to_string()));
    }

    #[test]
    fn rename_minors_renames_matching_descendants() {
        let ctx = ctx();
        let table = Arc::new(ZvolTable::default());
        table.insert(Arc::new(ZvolState::new("tank/old/child", 1, 1024, 512, ObjectSetHandle(1), DnodeHandle(1))));
        let dispatcher = MinorDispatcher::new("tank");

        rename_minors(&ctx, &dispatcher, &table, "tank/old", "tank/new");
        wait_for(|| !dispatcher.completed().is_empty());

        assert!(table.find_by_name("tank/new/child", LockMode::None).is_ok());
    }

    #[test]
    fn set_volsize_updates_state() {
        let table = ZvolTable::default();
        table.insert(Arc::new(ZvolState::new("tank/vol1", 1, 1024, 512, ObjectSetHandle(1), DnodeHandle(1))));
        set_volsize(&table, "tank/vol1", 4096).unwrap();
        assert_eq!(table.find_by_name("tank/vol1", LockMode::None).unwrap().state.volsize(), 4096);
    }

    #[test]
    fn set_volsize_rejects_zero() {
        let table = ZvolTable::default();
        table.insert(Arc::new(ZvolState::new("tank/vol1", 1, 1024, 512, ObjectSetHandle(1), DnodeHandle(1))));
        let err = set_volsize(&table, "tank/vol1", 0).unwrap_err();
        assert_eq!(err, ZvolError::InvalidArgument("volsize must be nonzero".to_string()));
    }

    #[test]
    fn set_volsize_rejects_non_block_multiple() {
        let table = ZvolTable::default();
        table.insert(Arc::new(ZvolState::new("tank/vol1", 1, 1024, 512, ObjectSetHandle(1), DnodeHandle(1))));
        let err = set_volsize(&table, "tank/vol1", 1000).unwrap_err();
        assert_eq!(err, ZvolError::InvalidArgument("volsize must be a multiple of the block size".to_string()));
    }
}
