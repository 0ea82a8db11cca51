//! Configuration tunables, gathered on one builder struct the way
//! `zpool::vdev::Vdev`/`Disk` are assembled in libzetta.

use derive_builder::Builder;
use getset::Getters;

/// The default bound used when TRIM issues I/O faster than the operator's
/// configured rate, expressed as bytes per millisecond-bucket in
/// `trim_ranges`'s pacing check.
pub const TRIM_EXTENT_BYTES_MAX_DEFAULT: u64 = 128 * 1024 * 1024;
pub const TRIM_EXTENT_BYTES_MIN_DEFAULT: u64 = 32 * 1024;
pub const TRIM_TXG_BATCH_DEFAULT: u32 = 32;
pub const TRIM_QUEUE_LIMIT_DEFAULT: u64 = 10;
pub const ZVOL_VOLMODE_DEFAULT_DEFAULT: &str = "geom";
pub const ZVOL_MAX_BLOCKS_PER_RECORD_DEFAULT: u64 = 16;
/// Bounds the probability of a 96-bit IV collision across all IVs ever
/// issued under one key to below 1-in-1e12.
pub const ZFS_KEY_MAX_SALT_USES_DEFAULT: u64 = 400_000_000;

#[derive(Debug, Clone, Getters, Builder)]
#[builder(setter(into))]
#[get = "pub"]
pub struct Tunables {
    /// Upper bound on a single TRIM I/O.
    #[builder(default = "TRIM_EXTENT_BYTES_MAX_DEFAULT")]
    trim_extent_bytes_max: u64,
    /// Ranges smaller than this are skipped unless `secure`.
    #[builder(default = "TRIM_EXTENT_BYTES_MIN_DEFAULT")]
    trim_extent_bytes_min: u64,
    /// If true, never load never-written metaslabs during manual TRIM.
    #[builder(default = "true")]
    trim_metaslab_skip: bool,
    /// Autotrim interleave-group count.
    #[builder(default = "TRIM_TXG_BATCH_DEFAULT")]
    trim_txg_batch: u32,
    /// Per-leaf in-flight TRIM cap.
    #[builder(default = "TRIM_QUEUE_LIMIT_DEFAULT")]
    trim_queue_limit: u64,
    /// Suppress OS minor creation entirely.
    #[builder(default = "false")]
    zvol_inhibit_dev: bool,
    /// Worker-pool size for zvol minor-lifecycle taskqs; 0 means
    /// "size to all CPUs" the way the original auto-sizes its taskqs.
    #[builder(default = "0")]
    zvol_threads: usize,
    /// Default volmode for ZVOL_VOLMODE_DEFAULT datasets.
    #[builder(default = "ZVOL_VOLMODE_DEFAULT_DEFAULT.to_string()")]
    zvol_volmode: String,
    /// Blocks per `TX_CLONE_RANGE` log record.
    #[builder(default = "ZVOL_MAX_BLOCKS_PER_RECORD_DEFAULT")]
    zvol_max_blocks_per_record: u64,
    /// Whether `zvol_clone_range` waits for a dirty source chunk to sync
    /// rather than shortening the range; see DESIGN.md for the
    /// open-question decision.
    #[builder(default = "true")]
    zvol_clone_range_wait_dirty: bool,
    /// Bound on the crypto engine's salt-use counter.
    #[builder(default = "ZFS_KEY_MAX_SALT_USES_DEFAULT")]
    zfs_key_max_salt_uses: u64,
}

impl Tunables {
    pub fn builder() -> TunablesBuilder { TunablesBuilder::default() }
}

impl Default for Tunables {
    fn default() -> Self { Tunables::builder().build().expect("default tunables always build") }
}
