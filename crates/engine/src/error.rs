//! Error types for the storage engine.
//!
//! Every failure surfaced by the public API falls into one of five buckets.
//! Errors from the lower crates (`wal`, `sstable`) are folded into the same
//! buckets at the boundary so callers never match on internal types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for engine operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Any filesystem or I/O failure: read, write, fsync, rename, open.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Decoded on-disk bytes failed integrity checks.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// Another process holds the data directory lock.
    #[error("data directory is locked by another process: {0}")]
    Locked(PathBuf),

    /// The caller passed an unusable argument (empty key, oversized
    /// key/value, mismatched batch lengths).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted on a closed engine.
    #[error("engine is closed")]
    Closed,
}

impl From<wal::WalError> for StoreError {
    fn from(e: wal::WalError) -> Self {
        match e {
            wal::WalError::Io(io) => StoreError::Io(io),
            wal::WalError::Corrupt(msg) => StoreError::Corrupt(msg),
        }
    }
}

impl From<sstable::TableError> for StoreError {
    fn from(e: sstable::TableError) -> Self {
        match e {
            sstable::TableError::Io(io) => StoreError::Io(io),
            sstable::TableError::Corrupt(msg) => StoreError::Corrupt(msg),
        }
    }
}
