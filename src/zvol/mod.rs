//! The ZVOL engine: the block-device personality over a
//! dataset — a name table of live volumes, suspend/resume, ZIL replay,
//! block-clone, and asynchronous minor-node lifecycle management.

pub mod clone;
pub mod minors;
pub mod range_lock;
pub mod state;
pub mod suspend;
pub mod table;
pub mod zil;

use crate::pool::context::PoolContext;
use crate::zvol::clone::{CommitClone, ReadSourceBlocks};
use crate::zvol::minors::{CommonProperty, MinorDispatcher};
use crate::zvol::state::{ObjectSetHandle, VolMode, ZvolState};
use crate::zvol::table::{LockMode, ZvolTable};
use std::sync::Arc;

quick_error::quick_error! {
    #[derive(Debug, PartialEq, Eq, Clone)]
    pub enum ZvolError {
        NotFound(name: String) {
            display("no such volume: {}", name)
        }
        AlreadyExists(name: String) {
            display("volume already exists: {}", name)
        }
        Busy {
            display("volume is busy")
        }
        Removing {
            display("volume is being removed")
        }
        Io {
            display("I/O error")
        }
        InvalidArgument(reason: String) {
            display("invalid argument: {}", reason)
        }
        Unsupported {
            display("operation not supported")
        }
    }
}

impl ZvolError {
    /// Maps each variant to a POSIX-ish code.
    pub fn as_errno(&self) -> i32 {
        match self {
            ZvolError::NotFound(_) => libc::ENOENT,
            ZvolError::AlreadyExists(_) => libc::EEXIST,
            ZvolError::Busy => libc::EBUSY,
            ZvolError::Removing => libc::ENXIO,
            ZvolError::Io => libc::EIO,
            ZvolError::InvalidArgument(_) => libc::EINVAL,
            ZvolError::Unsupported => libc::ENOTSUP,
        }
    }
}

/// Top-level handle onto one pool's ZVOL subsystem: the name table plus
/// the per-pool minor-lifecycle dispatcher.
pub struct ZvolEngine {
    ctx: Arc<PoolContext>,
    table: Arc<ZvolTable>,
    dispatcher: MinorDispatcher,
}

impl ZvolEngine {
    pub fn new(ctx: Arc<PoolContext>) -> Self {
        let dispatcher = MinorDispatcher::new(&ctx.name);
        ZvolEngine { ctx, table: Arc::new(ZvolTable::default()), dispatcher }
    }

    pub fn table(&self) -> &Arc<ZvolTable> { &self.table }

    /// Registers a freshly-created volume in the name table (the
    /// counterpart of the dataset-open step in a dataset's lifecycle;
    /// creation of the backing object-set/dnode stays out of scope).
    pub fn insert(&self, name: impl Into<String>, guid: u64, volsize: u64, blocksize: u64, object_set: ObjectSetHandle, dnode: state::DnodeHandle) -> Result<Arc<ZvolState>, ZvolError> {
        let name = name.into();
        if self.table.find_by_name(&name, LockMode::None).is_ok() {
            return Err(ZvolError::AlreadyExists(name));
        }
        let state = Arc::new(ZvolState::new(name, guid, volsize, blocksize, object_set, dnode));
        self.table.insert(state.clone());
        Ok(state)
    }

    pub fn create_minors(&self, name: &str) { minors::create_minors(&self.ctx, &self.dispatcher, &self.table, name) }

    pub fn remove_minors(&self, name: Option<&str>) -> Result<u64, ZvolError> { minors::remove_minors(&self.ctx, &self.dispatcher, &self.table, name) }

    pub fn rename_minors(&self, old: &str, new: &str) { minors::rename_minors(&self.ctx, &self.dispatcher, &self.table, old, new) }

    pub fn set_volmode(&self, dataset: &str, mode: VolMode) {
        minors::set_common(&self.ctx, &self.dispatcher, &self.table, dataset, CommonProperty::Volmode(mode))
    }

    pub fn set_snapdev(&self, dataset: &str, visible: bool) {
        minors::set_common(&self.ctx, &self.dispatcher, &self.table, dataset, CommonProperty::SnapdevVisible(visible))
    }

    pub fn set_volsize(&self, name: &str, bytes: u64) -> Result<(), ZvolError> { minors::set_volsize(&self.table, name, bytes) }

    /// Completed minor-lifecycle tasks, in submission order.
    pub fn completed_tasks(&self) -> Vec<minors::Task> { self.dispatcher.completed() }

    /// `zvol_suspend(name)`: looks the volume
    /// up taking the suspend lock as writer, then drives the suspend
    /// protocol. Returns the state with the suspend lock still held by
    /// the caller; pair with [`ZvolEngine::resume`].
    pub fn suspend(&self, name: &str) -> Result<Arc<ZvolState>, ZvolError> {
        let found = self.table.find_by_name(name, LockMode::Writer)?;
        suspend::suspend(&found.state)?;
        Ok(found.state)
    }

    /// `zvol_resume(zv)`.
    pub fn resume(&self, state: &Arc<ZvolState>) { suspend::resume(state) }

    /// `zvol_clone_range(src, src_off, dst, dst_off, len)`, looked up by
    /// name. See [`clone::clone_range`] for the chunking/dirty-wait
    /// semantics.
    #[allow(clippy::too_many_arguments)]
    pub fn clone_range(
        &self,
        src_name: &str,
        src_off: u64,
        dst_name: &str,
        dst_off: u64,
        len: u64,
        wait_dirty: bool,
        read_source: &ReadSourceBlocks,
        commit: &CommitClone,
        sync_always: bool,
    ) -> Result<u64, ZvolError> {
        let src = self.table.find_by_name(src_name, LockMode::None)?.state;
        let dst = self.table.find_by_name(dst_name, LockMode::None)?.state;
        clone::clone_range(
            &self.ctx.txg,
            &src,
            src_off,
            &dst,
            dst_off,
            len,
            *self.ctx.tunables.zvol_max_blocks_per_record(),
            wait_dirty,
            read_source,
            commit,
            sync_always,
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tunables::Tunables;
    use crate::zvol::state::DnodeHandle;

    fn engine() -> ZvolEngine { ZvolEngine::new(Arc::new(PoolContext::new("tank", Tunables::default()))) }

    #[test]
    fn insert_then_lookup_round_trips() {
        let engine = engine();
        engine.insert("tank/vol1", 1, 1024, 512, ObjectSetHandle(1), DnodeHandle(1)).unwrap();
        let found = engine.table().find_by_name("tank/vol1", LockMode::None).unwrap();
        assert_eq!(found.state.guid(), 1);
    }

    #[test]
    fn insert_rejects_duplicate_name() {
        let engine = engine();
        engine.insert("tank/vol1", 1, 1024, 512, ObjectSetHandle(1), DnodeHandle(1)).unwrap();
        let err = engine.insert("tank/vol1", 2, 1024, 512, ObjectSetHandle(2), DnodeHandle(2)).unwrap_err();
        assert_eq!(err, ZvolError::AlreadyExists("tank/vol1".to_string()));
    }

    #[test]
    fn suspend_then_resume_releases_suspend_lock() {
        let engine = engine();
        engine.insert("tank/vol1", 1, 1024, 512, ObjectSetHandle(1), DnodeHandle(1)).unwrap();
        let state = engine.suspend("tank/vol1").unwrap();
        assert_eq!(state.suspend_refcount(), 1);
        engine.resume(&state);
        assert_eq!(state.suspend_refcount(), 0);
        // Suspend lock was released: a second suspend succeeds promptly.
        let state2 = engine.suspend("tank/vol1").unwrap();
        engine.resume(&state2);
    }

    #[test]
    fn set_volsize_rejects_unknown_volume() {
        let engine = engine();
        let err = engine.set_volsize("tank/nope", 4096).unwrap_err();
        assert_eq!(err, ZvolError::NotFound("tank/nope".to_string()));
    }

    #[test]
    fn clone_range_rejects_unknown_source() {
        let engine = engine();
        engine.insert("tank/vol2", 2, 1024, 512, ObjectSetHandle(2), DnodeHandle(2)).unwrap();
        let err = engine
            .clone_range("tank/nope", 0, "tank/vol2", 0, 512, false, &|_, _| crate::zvol::clone::SourceBlocks { blocks: vec![], dirty_in_open_txg: false }, &|_, _| {}, false)
            .unwrap_err();
        assert_eq!(err, ZvolError::NotFound("tank/nope".to_string()));
    }

    #[test]
    fn clone_range_copies_block_pointers_between_named_volumes() {
        let engine = engine();
        engine.insert("tank/vol1", 1, 1024 * 1024, 512, ObjectSetHandle(1), DnodeHandle(1)).unwrap();
        engine.insert("tank/vol2", 2, 1024 * 1024, 512, ObjectSetHandle(2), DnodeHandle(2)).unwrap();
        let committed = std::sync::Mutex::new(Vec::new());
        let done = engine
            .clone_range(
                "tank/vol1",
                0,
                "tank/vol2",
                0,
                512,
                false,
                &|off, len| crate::zvol::clone::SourceBlocks {
                    blocks: vec![crate::zvol::zil::ClonedBlock { blkptr: off, block_size: len as u32 }],
                    dirty_in_open_txg: false,
                },
                &|off, blocks| committed.lock().unwrap().push((off, blocks.to_vec())),
                false,
            )
            .unwrap();
        assert_eq!(done, 512);
        assert_eq!(committed.lock().unwrap().len(), 1);
    }
}
