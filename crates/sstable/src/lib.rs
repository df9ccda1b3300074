//! # SSTable — Sorted String Table
//!
//! Immutable, on-disk storage files for the CoveKV storage engine.
//!
//! When the engine flushes its memtable, the epoch's entries are written as
//! an SSTable: a pair of files identified by a monotonically increasing
//! 64-bit file id. SSTables are *write-once, read-many*: once created they
//! are never modified, only superseded by compaction and then deleted.
//!
//! ## File layout
//!
//! All integers are big-endian.
//!
//! ```text
//! sst_<id>.dat                       sst_<id>.idx
//! ┌───────────────────────────┐      ┌─────────────────────────────┐
//! │ key_len   (i32)           │      │ file_id       (i64)         │
//! │ key bytes                 │      │ creation_time (i64)         │
//! │ val_len   (i32)           │      │ entry_count   (i32)         │
//! │ val bytes                 │      │ data_size     (i64)         │
//! │ ... sorted by key ...     │      ├─────────────────────────────┤
//! └───────────────────────────┘      │ key_len (i32) | key         │
//!                                    │ offset  (i64)               │
//!                                    │ ... one per entry ...       │
//!                                    └─────────────────────────────┘
//! ```
//!
//! A `val_len` of zero marks a tombstone (or an empty value; the two are
//! deliberately conflated on disk and the engine layer decides which one it
//! wrote). The whole index is loaded into memory on open, so a point lookup
//! costs one map probe plus one seek-and-read in the data file.

mod format;
mod table;

pub use format::{data_path, index_path, now_millis, parse_file_id};
pub use table::{SSTable, TableError};

#[cfg(test)]
mod tests;
