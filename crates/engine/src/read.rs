//! Read path: `read()` and `read_key_range()`.
//!
//! Point lookups consult the deleted set, then the memtable, then the
//! SSTables newest to oldest. Range reads start from the manager's merged
//! range and overlay the memtable on top: memtable entries overwrite,
//! deleted keys disappear.

use std::collections::BTreeMap;

use crate::error::Result;
use crate::Engine;

impl Engine {
    /// Looks up the live value for `key`.
    ///
    /// Returns `None` for a key that was never written, was deleted, or is
    /// shadowed by a newer tombstone in any layer.
    pub fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let state = self.state.read();
        state.ensure_open()?;

        if state.memtable.is_deleted(key) {
            return Ok(None);
        }
        if let Some(value) = state.memtable.get(key) {
            return Ok(Some(value.to_vec()));
        }
        self.manager.get(key)
    }

    /// All live entries with `start <= key < end`, in ascending key order.
    ///
    /// `start >= end` yields an empty map.
    pub fn read_key_range(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        let state = self.state.read();
        state.ensure_open()?;

        let mut result = self.manager.get_range(start, end)?;

        // The memtable is newer than every SSTable: its entries overwrite,
        // its pending deletes win.
        for (key, value) in state.memtable.range(start, end) {
            result.insert(key.to_vec(), value.to_vec());
        }
        for key in state.memtable.deleted_range(start, end) {
            result.remove(key);
        }

        Ok(result)
    }
}
