//! Write path: `put()`, `delete()`, `batch_put()`, `flush()`, `compact()`,
//! and the checkpoint policy.
//!
//! Every mutation is appended to the WAL (and fsynced) before the memtable
//! is touched; a failed append leaves the in-memory state exactly as it was.
//! Flushes are triggered by the write counter, checkpoints by wall-clock
//! interval, both on the writer's own thread. There is no background timer.

use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;
use wal::WalOp;

use crate::error::{Result, StoreError};
use crate::{Engine, EngineState};

impl Engine {
    /// Stores `value` under `key`.
    ///
    /// The write is durable (in the WAL) before this returns. May trigger a
    /// flush and, past the checkpoint interval, a checkpoint.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidArgument`] for an empty or oversized key/value;
    /// [`StoreError::Io`] if the WAL append fails (the memtable is then left
    /// untouched); [`StoreError::Closed`] after `close()`.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.check_value(value)?;

        let mut state = self.state.write();
        state.ensure_open()?;

        state.wal.append(WalOp::Put, key, value)?;
        state.memtable.put(key.to_vec(), value.to_vec());
        state.write_count += 1;

        self.maybe_flush(&mut state)?;
        self.maybe_checkpoint(&mut state)?;
        Ok(())
    }

    /// Deletes `key`. The key does not need to exist; the delete is
    /// remembered so it shadows older SSTable versions.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.check_key(key)?;

        let mut state = self.state.write();
        state.ensure_open()?;

        state.wal.append(WalOp::Delete, key, b"")?;
        state.memtable.delete(key);
        state.write_count += 1;

        self.maybe_flush(&mut state)?;
        Ok(())
    }

    /// Stores `keys[i] -> values[i]` for every `i`, under one exclusive
    /// section: no other writer interleaves, and readers see either none or
    /// all of the batch applied to the memtable.
    ///
    /// Arguments are validated up front, so an `InvalidArgument` error means
    /// nothing was written. An I/O error mid-batch leaves the already
    /// appended prefix durable in the WAL (per-record framing, like single
    /// puts); `Ok` means every element succeeded.
    pub fn batch_put(&self, keys: Vec<Vec<u8>>, values: Vec<Vec<u8>>) -> Result<()> {
        if keys.len() != values.len() {
            return Err(StoreError::InvalidArgument(format!(
                "batch length mismatch: {} keys, {} values",
                keys.len(),
                values.len()
            )));
        }
        for key in &keys {
            self.check_key(key)?;
        }
        for value in &values {
            self.check_value(value)?;
        }

        let mut state = self.state.write();
        state.ensure_open()?;

        for (key, value) in keys.into_iter().zip(values) {
            state.wal.append(WalOp::Put, &key, &value)?;
            state.memtable.put(key, value);
            state.write_count += 1;
            self.maybe_flush(&mut state)?;
        }

        self.maybe_checkpoint(&mut state)?;
        Ok(())
    }

    /// Forces the current memtable (live entries and pending deletes) into a
    /// new SSTable. A no-op when there is nothing buffered.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.write();
        state.ensure_open()?;
        self.flush_locked(&mut state)
    }

    /// Merges all SSTables into one. Runs under the engine's exclusive
    /// section so no write interleaves with the rewrite.
    pub fn compact(&self) -> Result<()> {
        let state = self.state.write();
        state.ensure_open()?;
        self.manager.compact()
    }

    /// Reduces the SSTable count to at most `target_count` by merging
    /// consecutive groups of tables. Gentler than [`Engine::compact`]:
    /// tombstones survive, and read amplification shrinks without rewriting
    /// everything into one file.
    pub fn merge(&self, target_count: usize) -> Result<()> {
        let state = self.state.write();
        state.ensure_open()?;
        self.manager.merge(target_count)
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidArgument("key must not be empty".into()));
        }
        if key.len() > self.config.max_key_bytes {
            return Err(StoreError::InvalidArgument(format!(
                "key too large: {} bytes (max {})",
                key.len(),
                self.config.max_key_bytes
            )));
        }
        Ok(())
    }

    fn check_value(&self, value: &[u8]) -> Result<()> {
        if value.len() > self.config.max_value_bytes {
            return Err(StoreError::InvalidArgument(format!(
                "value too large: {} bytes (max {})",
                value.len(),
                self.config.max_value_bytes
            )));
        }
        Ok(())
    }

    fn maybe_flush(&self, state: &mut EngineState) -> Result<()> {
        if state.write_count >= self.config.memtable_flush_threshold {
            self.flush_locked(state)?;
        }
        Ok(())
    }

    fn maybe_checkpoint(&self, state: &mut EngineState) -> Result<()> {
        if state.last_checkpoint.elapsed() >= self.config.checkpoint_interval {
            self.checkpoint_locked(state)?;
        }
        Ok(())
    }

    /// Converts the epoch's buffered state into one SSTable: live keys keep
    /// their value, deleted keys become tombstones. On success the memtable
    /// is cleared and the write counter reset; on failure both are left
    /// intact; the WAL still protects the data and a later write retries.
    pub(crate) fn flush_locked(&self, state: &mut EngineState) -> Result<()> {
        if state.memtable.is_empty() {
            return Ok(());
        }

        let mut entries: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for (key, value) in state.memtable.entries() {
            entries.insert(key.to_vec(), value.to_vec());
        }
        for key in state.memtable.deleted_keys() {
            entries.insert(key.to_vec(), Vec::new());
        }

        self.manager.create_sstable(&entries)?;

        state.memtable.clear();
        state.write_count = 0;
        debug!(entries = entries.len(), "flushed memtable to sstable");
        Ok(())
    }

    /// Flush, then truncate the WAL. Ordering matters: the WAL may only be
    /// truncated once the flushed SSTable and the manifest naming it are
    /// durable, which `flush_locked` guarantees before returning.
    fn checkpoint_locked(&self, state: &mut EngineState) -> Result<()> {
        self.flush_locked(state)?;
        state.wal.truncate()?;
        state.last_checkpoint = Instant::now();
        debug!("checkpoint complete");
        Ok(())
    }
}
