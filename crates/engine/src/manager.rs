//! SSTable manager: the ordered set of live tables, the manifest that makes
//! them durable, and the compaction policy.
//!
//! ## Manifest
//!
//! `sst_manifest` is a binary file: `i32 count` followed by `count` big-endian
//! `i64` file ids, oldest table first. Every update writes the whole manifest
//! to `sst_manifest.tmp`, fsyncs it, renames it over the live manifest, and
//! fsyncs the directory, so a crash at any point leaves either the old or
//! the new manifest intact. SSTable files written but never referenced by a
//! durable manifest are orphans; the startup sweep removes them.
//!
//! ## Ordering invariant
//!
//! The in-memory list order, the manifest order, and ascending
//! `creation_time` are all the same order. Point reads probe newest → oldest
//! and stop at the first table containing the key; a tombstone hit means
//! "absent", shadowing anything older.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::RwLock;
use sstable::{now_millis, parse_file_id, SSTable};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};

/// Manifest filename inside the data directory.
pub const MANIFEST_FILE: &str = "sst_manifest";
const MANIFEST_TMP_FILE: &str = "sst_manifest.tmp";

/// Aggregate numbers over the live SSTables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SstableStats {
    pub sstable_count: usize,
    pub total_entries: usize,
    pub total_bytes: u64,
}

pub(crate) struct SSTableManager {
    dir: PathBuf,
    /// Compaction trigger: a flush that pushes the list past this length
    /// compacts immediately.
    max_tables: usize,
    inner: RwLock<ManagerInner>,
}

struct ManagerInner {
    /// Live tables, oldest first.
    tables: Vec<SSTable>,
    /// Highest file id ever handed out; ids must stay monotonic even when
    /// several tables are created within one millisecond.
    last_file_id: i64,
}

impl SSTableManager {
    /// Reads the manifest and loads every listed table.
    ///
    /// Ids whose files are missing or corrupt are excluded with a warning;
    /// the store still opens. On-disk `sst_*` files not listed in the
    /// manifest are leftovers from an interrupted flush or compaction and are
    /// removed.
    pub fn open(dir: &Path, max_tables: usize) -> Result<Self> {
        let listed = read_manifest(&dir.join(MANIFEST_FILE))?;

        let mut tables = Vec::with_capacity(listed.len());
        let mut last_file_id = 0i64;
        for &id in &listed {
            last_file_id = last_file_id.max(id);
            match SSTable::load(dir, id) {
                Ok(table) => tables.push(table),
                Err(e) => {
                    warn!(file_id = id, error = %e, "failed to load sstable, excluding it");
                }
            }
        }
        tables.sort_by_key(SSTable::creation_time);

        sweep_orphans(dir, &listed);

        if !tables.is_empty() {
            info!(count = tables.len(), "loaded sstables from manifest");
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            max_tables,
            inner: RwLock::new(ManagerInner {
                tables,
                last_file_id,
            }),
        })
    }

    /// Builds a new SSTable from `entries`, appends it to the live list, and
    /// persists the manifest. Triggers a full compaction when the list grows
    /// past `max_tables`.
    ///
    /// Empty input is a no-op.
    pub fn create_sstable(&self, entries: &BTreeMap<Vec<u8>, Vec<u8>>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.write();
        let file_id = alloc_file_id(&mut inner);
        let table = SSTable::create(&self.dir, file_id, entries)?;
        inner.tables.push(table);
        self.save_manifest(&inner)?;

        if inner.tables.len() > self.max_tables {
            info!(
                count = inner.tables.len(),
                max = self.max_tables,
                "sstable count over limit, compacting"
            );
            self.compact_locked(&mut inner)?;
        }

        Ok(())
    }

    /// Point lookup across all tables, newest first.
    ///
    /// The first table containing the key decides the outcome: a value wins,
    /// a tombstone means the key is absent (and shadows older tables).
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let inner = self.inner.read();
        for table in inner.tables.iter().rev() {
            if let Some(slot) = table.get(key)? {
                return Ok(if slot.is_empty() { None } else { Some(slot) });
            }
        }
        Ok(None)
    }

    /// Live entries with `start <= key < end` across all tables, newest
    /// winning, tombstones resolved.
    pub fn get_range(&self, start: &[u8], end: &[u8]) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        let inner = self.inner.read();
        let mut out = BTreeMap::new();
        for table in &inner.tables {
            overlay(&mut out, table.get_range(start, end)?);
        }
        Ok(out)
    }

    /// Every live entry across all tables, newest winning.
    pub fn get_all(&self) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        let inner = self.inner.read();
        let mut out = BTreeMap::new();
        for table in &inner.tables {
            overlay(&mut out, table.get_all()?);
        }
        Ok(out)
    }

    /// Merges every live table into a single one.
    pub fn compact(&self) -> Result<()> {
        let mut inner = self.inner.write();
        self.compact_locked(&mut inner)
    }

    /// Reduces the list to at most `target_count` tables by merging
    /// consecutive groups.
    ///
    /// Unlike a full compaction, tombstones are retained: a tombstone in one
    /// group may still shadow an older version of the key in an earlier
    /// group.
    pub fn merge(&self, target_count: usize) -> Result<()> {
        let target_count = target_count.max(1);
        let mut inner = self.inner.write();
        if inner.tables.len() <= target_count {
            return Ok(());
        }

        info!(
            current = inner.tables.len(),
            target = target_count,
            "merging sstables"
        );

        // Merge each consecutive group's entries first; the live list is not
        // touched until every new table exists, so an error mid-merge leaves
        // the store serving the old tables.
        let group_size = inner.tables.len().div_ceil(target_count);
        let mut group_entries = Vec::with_capacity(target_count);
        let mut start = 0;
        while start < inner.tables.len() {
            let group = &inner.tables[start..(start + group_size).min(inner.tables.len())];
            start += group_size;

            let mut entries = BTreeMap::new();
            for table in group {
                // oldest first, newer entries overwrite; tombstones kept
                overlay_raw(&mut entries, table.get_all()?);
            }
            if !entries.is_empty() {
                group_entries.push(entries);
            }
        }

        let mut merged_tables = Vec::with_capacity(group_entries.len());
        for entries in &group_entries {
            let file_id = alloc_file_id(&mut inner);
            match SSTable::create(&self.dir, file_id, entries) {
                Ok(table) => merged_tables.push(table),
                Err(e) => {
                    // Abandon the merge; the files created so far are
                    // unreferenced and removed right away.
                    for table in merged_tables {
                        let _ = table.delete();
                    }
                    return Err(e.into());
                }
            }
        }

        let old = std::mem::replace(&mut inner.tables, merged_tables);
        self.save_manifest(&inner)?;

        for table in old {
            let id = table.file_id();
            if let Err(e) = table.delete() {
                warn!(file_id = id, error = %e, "failed to delete superseded sstable");
            }
        }

        debug!(count = inner.tables.len(), "merge complete");
        Ok(())
    }

    /// Aggregate statistics over the live tables.
    pub fn stats(&self) -> SstableStats {
        let inner = self.inner.read();
        let mut stats = SstableStats {
            sstable_count: inner.tables.len(),
            total_entries: 0,
            total_bytes: 0,
        };
        for table in &inner.tables {
            stats.total_entries += table.entry_count();
            stats.total_bytes += table.data_size();
        }
        stats
    }

    /// Releases every table handle. Deletes nothing.
    pub fn close(&self) {
        self.inner.write().tables.clear();
    }

    fn compact_locked(&self, inner: &mut ManagerInner) -> Result<()> {
        if inner.tables.len() <= 1 {
            return Ok(());
        }

        info!(count = inner.tables.len(), "compacting sstables");

        // Newest-wins merge of everything, then purge tombstones: a full
        // compaction leaves no older table a tombstone could shadow.
        let mut merged = BTreeMap::new();
        for table in &inner.tables {
            overlay_raw(&mut merged, table.get_all()?);
        }
        merged.retain(|_, v| !v.is_empty());

        let new_table = if merged.is_empty() {
            None
        } else {
            let file_id = alloc_file_id(inner);
            Some(SSTable::create(&self.dir, file_id, &merged)?)
        };

        // Commit point: swap the list and persist the manifest before any
        // old file is unlinked.
        let old = std::mem::replace(&mut inner.tables, new_table.into_iter().collect());
        self.save_manifest(inner)?;

        for table in old {
            let id = table.file_id();
            if let Err(e) = table.delete() {
                warn!(file_id = id, error = %e, "failed to delete superseded sstable");
            }
        }

        debug!(
            entries = inner.tables.first().map_or(0, SSTable::entry_count),
            "compaction complete"
        );
        Ok(())
    }

    /// Atomically replaces the manifest with the current table list.
    fn save_manifest(&self, inner: &ManagerInner) -> Result<()> {
        let tmp_path = self.dir.join(MANIFEST_TMP_FILE);
        let manifest_path = self.dir.join(MANIFEST_FILE);

        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut out = BufWriter::new(file);
            out.write_i32::<BigEndian>(inner.tables.len() as i32)?;
            for table in &inner.tables {
                out.write_i64::<BigEndian>(table.file_id())?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }

        fs::rename(&tmp_path, &manifest_path)?;
        #[cfg(unix)]
        File::open(&self.dir)?.sync_all()?;

        Ok(())
    }
}

/// Next file id: wall-clock millis, bumped past the last id so that two
/// tables created in the same millisecond still get distinct, increasing ids.
fn alloc_file_id(inner: &mut ManagerInner) -> i64 {
    let now = now_millis();
    let id = if now > inner.last_file_id {
        now
    } else {
        inner.last_file_id + 1
    };
    inner.last_file_id = id;
    id
}

/// Applies `layer` (a newer table's raw entries) onto `out`, resolving
/// tombstones: an empty value removes the key from the result.
fn overlay(out: &mut BTreeMap<Vec<u8>, Vec<u8>>, layer: BTreeMap<Vec<u8>, Vec<u8>>) {
    for (key, value) in layer {
        if value.is_empty() {
            out.remove(&key);
        } else {
            out.insert(key, value);
        }
    }
}

/// Applies `layer` onto `out` keeping tombstones as entries, so a later purge
/// or merge still sees them.
fn overlay_raw(out: &mut BTreeMap<Vec<u8>, Vec<u8>>, layer: BTreeMap<Vec<u8>, Vec<u8>>) {
    for (key, value) in layer {
        out.insert(key, value);
    }
}

/// Parses the manifest: `i32 count` then `count` i64 file ids. A missing
/// manifest is an empty store.
fn read_manifest(path: &Path) -> Result<Vec<i64>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);

    let count = reader
        .read_i32::<BigEndian>()
        .map_err(|e| manifest_read_error(e, "manifest shorter than its header"))?;
    if count < 0 {
        return Err(StoreError::Corrupt(format!(
            "manifest lists a negative table count {count}"
        )));
    }

    let mut ids = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = reader
            .read_i64::<BigEndian>()
            .map_err(|e| manifest_read_error(e, "manifest truncated mid entry"))?;
        ids.push(id);
    }
    Ok(ids)
}

/// A short read means a corrupt manifest; anything else is a real I/O error.
fn manifest_read_error(e: io::Error, what: &str) -> StoreError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        StoreError::Corrupt(what.into())
    } else {
        StoreError::Io(e)
    }
}

/// Deletes `sst_*` data/index files whose id is not in the manifest, plus any
/// stale manifest temp file. Failures are logged and ignored; orphans are
/// only garbage.
fn sweep_orphans(dir: &Path, listed: &[i64]) {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name == MANIFEST_TMP_FILE {
            let _ = fs::remove_file(&path);
            continue;
        }
        if let Some(id) = parse_file_id(name) {
            if !listed.contains(&id) {
                info!(file_id = id, file = name, "removing orphaned sstable file");
                if let Err(e) = fs::remove_file(&path) {
                    warn!(file = name, error = %e, "failed to remove orphaned file");
                }
            }
        }
    }
}
