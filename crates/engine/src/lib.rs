//! # Engine — CoveKV Storage Core
//!
//! The central orchestrator that ties together the [`wal`], [`memtable`],
//! and [`sstable`] crates into a durable, log-structured key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! ┌─────────────────────────────────────────────────┐
//! │                    ENGINE                       │
//! │                                                 │
//! │ write.rs → WAL append (fsync) → memtable update │
//! │              |                                  │
//! │              |  (write count / interval hit?)   │
//! │              v                                  │
//! │           flush() → new SSTable via manager     │
//! │              |                                  │
//! │              |  (table count over limit?)       │
//! │              v                                  │
//! │           compact() → single merged SSTable     │
//! │                                                 │
//! │ read.rs → deleted set → memtable → SSTables     │
//! │            (newest match wins)                  │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module       | Purpose                                             |
//! |--------------|-----------------------------------------------------|
//! | `lib.rs`     | `Engine` struct, open/close, stats                  |
//! | [`config`]   | Tunable knobs with defaults                         |
//! | [`error`]    | `StoreError` taxonomy                               |
//! | `flock`      | Exclusive data-directory lock                       |
//! | `manager`    | Live SSTable set, manifest, compaction, merge       |
//! | `read`       | `read()`, `read_key_range()`                        |
//! | `write`      | `put()`, `delete()`, `batch_put()`, flush, checkpoint |
//!
//! ## Crash Safety
//!
//! Every mutation is appended to the WAL and fsynced **before** the memtable
//! update and before the call returns. The WAL is truncated only at a
//! checkpoint, after the flushed SSTable and the manifest naming it are
//! durable. Dropping an engine without [`Engine::close`] loses nothing: the
//! next open replays the WAL.
//!
//! ## Concurrency
//!
//! Many readers, one writer. The engine's mutable state (memtable, deleted
//! set, WAL position, counters) sits behind one `RwLock`; the SSTable
//! manager keeps its own. Reads take the read lock and see a consistent
//! snapshot; writers serialize on the write lock, which also makes WAL
//! append order the linearization order.
//!
//! ## Directory layout
//!
//! ```text
//! <data_dir>/
//!   kvstore.lock      exclusive lock file
//!   wal.log           append-only WAL
//!   sst_manifest      ordered list of live SSTable ids
//!   sst_<id>.dat      SSTable data file
//!   sst_<id>.idx      SSTable index file
//! ```

mod config;
mod error;
mod flock;
mod manager;
mod read;
mod write;

pub use config::Config;
pub use error::{Result, StoreError};

use flock::DirLock;
use manager::SSTableManager;
use memtable::Memtable;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};
use wal::{Wal, WalOp};

/// Lock filename inside the data directory.
pub const LOCK_FILE: &str = "kvstore.lock";
/// WAL filename inside the data directory.
pub const WAL_FILE: &str = "wal.log";

/// A point-in-time snapshot of store internals, for operators and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Live entries in the memtable.
    pub memtable_size: usize,
    /// Keys deleted in the current epoch.
    pub deleted_count: usize,
    /// Live SSTables.
    pub sstable_count: usize,
    /// Entries across all SSTables (including shadowed ones).
    pub total_entries: usize,
    /// Bytes across all SSTable data files.
    pub total_bytes: u64,
    /// Current WAL length in bytes.
    pub wal_bytes: u64,
}

/// Lifecycle of the engine. `read`/`write`/`stats` are only legal in `Open`;
/// `close()` transitions to `Closed` and is a no-op afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Closed,
}

/// Mutable engine state guarded by the single reader-writer lock.
struct EngineState {
    status: Status,
    memtable: Memtable,
    wal: Wal,
    /// WAL appends since the last flush.
    write_count: usize,
    last_checkpoint: Instant,
}

impl EngineState {
    fn ensure_open(&self) -> Result<()> {
        match self.status {
            Status::Open => Ok(()),
            Status::Closed => Err(StoreError::Closed),
        }
    }
}

/// The durable key-value store.
///
/// All methods take `&self`; the engine is `Send + Sync` and is meant to be
/// shared across threads (e.g. in an `Arc`).
pub struct Engine {
    dir: PathBuf,
    config: Config,
    manager: SSTableManager,
    state: RwLock<EngineState>,
    /// Held for the engine's entire lifetime; releasing it early would let a
    /// second process open the same directory.
    _lock: DirLock,
}

impl Engine {
    /// Opens the store in `dir`, creating the directory if needed.
    ///
    /// # Startup
    ///
    /// 1. Acquire the exclusive lock file ([`StoreError::Locked`] if another
    ///    process holds it).
    /// 2. Load the manifest and every listed SSTable.
    /// 3. Replay the WAL into the memtable and deleted set.
    ///
    /// No implicit flush happens; replayed data stays in the memtable and the
    /// WAL is retained until the next threshold-triggered checkpoint.
    pub fn open<P: AsRef<Path>>(dir: P, config: Config) -> Result<Engine> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let lock_path = dir.join(LOCK_FILE);
        let lock = DirLock::acquire(&lock_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::WouldBlock {
                StoreError::Locked(lock_path.clone())
            } else {
                StoreError::Io(e)
            }
        })?;

        let manager = SSTableManager::open(&dir, config.max_sstables)?;

        let wal = Wal::open(dir.join(WAL_FILE), config.wal_sync)?;
        let mut memtable = Memtable::new();
        let replayed = wal.replay(|rec| match rec.op {
            WalOp::Put => memtable.put(rec.key, rec.value),
            WalOp::Delete => memtable.delete(&rec.key),
        })?;
        if replayed > 0 {
            info!(
                records = replayed,
                live = memtable.len(),
                deleted = memtable.deleted_len(),
                "recovered memtable from wal"
            );
        }

        info!(dir = %dir.display(), "engine open");
        Ok(Engine {
            dir,
            config,
            manager,
            state: RwLock::new(EngineState {
                status: Status::Open,
                memtable,
                wal,
                write_count: 0,
                last_checkpoint: Instant::now(),
            }),
            _lock: lock,
        })
    }

    /// The data directory this engine owns.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The configuration the engine was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Snapshot of store internals.
    pub fn stats(&self) -> Result<StoreStats> {
        let state = self.state.read();
        state.ensure_open()?;
        let sst = self.manager.stats();
        Ok(StoreStats {
            memtable_size: state.memtable.len(),
            deleted_count: state.memtable.deleted_len(),
            sstable_count: sst.sstable_count,
            total_entries: sst.total_entries,
            total_bytes: sst.total_bytes,
            wal_bytes: state.wal.size(),
        })
    }

    /// Flushes the memtable, syncs the WAL, and marks the engine closed.
    ///
    /// Idempotent: closing a closed engine is a no-op. Every other operation
    /// on a closed engine fails with [`StoreError::Closed`].
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.write();
        if state.status == Status::Closed {
            return Ok(());
        }

        self.flush_locked(&mut state)?;
        state.wal.sync()?;
        state.status = Status::Closed;
        self.manager.close();

        debug!(dir = %self.dir.display(), "engine closed");
        Ok(())
    }
}

// No flush on drop: an engine dropped without `close()` is the crash path,
// and the WAL replay on the next open recovers every acknowledged write.

#[cfg(test)]
mod tests;
