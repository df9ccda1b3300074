//! Engine configuration.

use std::time::Duration;

/// Tunable knobs for [`crate::Engine`].
///
/// All fields are public; start from [`Config::default()`] and override what
/// the deployment needs:
///
/// ```rust
/// use engine::Config;
///
/// let config = Config {
///     memtable_flush_threshold: 1_000,
///     ..Config::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of WAL appends since the last flush that triggers a memtable
    /// flush.
    pub memtable_flush_threshold: usize,

    /// Wall-clock interval after which a write triggers a checkpoint
    /// (flush + WAL truncation).
    pub checkpoint_interval: Duration,

    /// Number of live SSTables above which a flush triggers a full
    /// compaction.
    pub max_sstables: usize,

    /// Largest accepted key, in bytes.
    pub max_key_bytes: usize,

    /// Largest accepted value, in bytes.
    pub max_value_bytes: usize,

    /// Whether every WAL append is followed by `fsync`.
    ///
    /// Durability requires `true` (the default): a write is only
    /// acknowledged once it is on stable storage. Turning this off is an
    /// escape hatch for tests and benchmarks.
    pub wal_sync: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memtable_flush_threshold: 10_000,
            checkpoint_interval: Duration::from_secs(60),
            max_sstables: 10,
            max_key_bytes: 64 * 1024,
            max_value_bytes: 10 * 1024 * 1024,
            wal_sync: true,
        }
    }
}
