//! A top-level vdev: a direct child of the root, owner of metaslabs and
//! parent of one or more leaves. Full vdev-tree
//! topology is out of scope; this carries just enough to
//! drive TRIM: its metaslabs in index order, its leaves, and the
//! logical-to-physical [`Translator`] the fan-out step needs.

use crate::pool::leaf::Leaf;
use crate::pool::metaslab::Metaslab;
use crate::pool::topology::Translator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct TopLevelVdev {
    id: usize,
    metaslabs: Vec<Arc<Metaslab>>,
    leaves: Vec<Arc<Leaf>>,
    translator: Box<dyn Translator>,
    /// Set while the vdev is being removed; TRIM and autotrim workers
    /// must observe it and exit promptly.
    removing: AtomicBool,
    /// Set while a raidz expansion is in progress; same exit contract.
    expanding: AtomicBool,
}

impl TopLevelVdev {
    pub fn new(
        id: usize,
        metaslabs: Vec<Arc<Metaslab>>,
        leaves: Vec<Arc<Leaf>>,
        translator: Box<dyn Translator>,
    ) -> Self {
        TopLevelVdev {
            id,
            metaslabs,
            leaves,
            translator,
            removing: AtomicBool::new(false),
            expanding: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> usize { self.id }

    pub fn metaslabs(&self) -> &[Arc<Metaslab>] { &self.metaslabs }

    pub fn leaves(&self) -> &[Arc<Leaf>] { &self.leaves }

    pub fn translator(&self) -> &dyn Translator { self.translator.as_ref() }

    pub fn is_removing(&self) -> bool { self.removing.load(Ordering::Acquire) }

    pub fn set_removing(&self, v: bool) { self.removing.store(v, Ordering::Release); }

    pub fn is_expanding(&self) -> bool { self.expanding.load(Ordering::Acquire) }

    pub fn set_expanding(&self, v: bool) { self.expanding.store(v, Ordering::Release); }

    /// True if TRIM/autotrim workers must exit at their next check.
    pub fn exit_wanted(&self) -> bool { self.is_removing() || self.is_expanding() }

    pub fn leaf_index(&self, guid: u64) -> Option<usize> {
        self.leaves.iter().position(|l| l.guid() == guid)
    }
}
