use crate::{Config, Engine};
use std::fs;
use std::path::Path;

/// Default test configuration: no fsync per append (tests exercise logic,
/// not disk durability) and the stock thresholds.
pub fn test_config() -> Config {
    Config {
        wal_sync: false,
        ..Config::default()
    }
}

/// Test configuration with a small flush threshold.
pub fn flushy_config(threshold: usize) -> Config {
    Config {
        memtable_flush_threshold: threshold,
        wal_sync: false,
        ..Config::default()
    }
}

pub fn open_engine(dir: &Path) -> Engine {
    Engine::open(dir, test_config()).unwrap()
}

/// Number of SSTable data files currently on disk.
pub fn count_sst_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|ext| ext == "dat")
                .unwrap_or(false)
        })
        .count()
}
