//! File naming and shared constants for SSTable file pairs.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Filename prefix shared by both files of a table pair.
pub const FILE_PREFIX: &str = "sst_";
/// Suffix of the data file.
pub const DATA_SUFFIX: &str = ".dat";
/// Suffix of the index file.
pub const INDEX_SUFFIX: &str = ".idx";

/// Path of the data file for `file_id` inside `dir`.
pub fn data_path(dir: &Path, file_id: i64) -> PathBuf {
    dir.join(format!("{FILE_PREFIX}{file_id}{DATA_SUFFIX}"))
}

/// Path of the index file for `file_id` inside `dir`.
pub fn index_path(dir: &Path, file_id: i64) -> PathBuf {
    dir.join(format!("{FILE_PREFIX}{file_id}{INDEX_SUFFIX}"))
}

/// Extracts the file id from an SSTable filename (`sst_<id>.dat` or
/// `sst_<id>.idx`). Returns `None` for anything else.
pub fn parse_file_id(file_name: &str) -> Option<i64> {
    let rest = file_name.strip_prefix(FILE_PREFIX)?;
    let id = rest
        .strip_suffix(DATA_SUFFIX)
        .or_else(|| rest.strip_suffix(INDEX_SUFFIX))?;
    id.parse().ok()
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}
