//! The pool substrate: the DMU/SPA collaborator that TRIM, ZVOL and the
//! crypto engine all sit on top of. Only the slice of it
//! these three engines actually touch is modeled here — metaslabs,
//! leaves, range trees, txg sync, taskqs, iostats and events. The real
//! allocator, B-tree, ZAP implementation, and block-pointer format are
//! out of scope and are represented only by the narrow
//! interfaces these modules expose.

pub mod context;
pub mod events;
pub mod iostats;
pub mod leaf;
pub mod metaslab;
pub mod rangetree;
pub mod taskq;
pub mod topology;
pub mod txg;
pub mod vdev;

pub use context::PoolContext;
pub use leaf::{Leaf, TrimState, Zap};
pub use metaslab::Metaslab;
pub use rangetree::RangeTree;
pub use vdev::TopLevelVdev;
