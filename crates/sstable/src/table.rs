use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::format::{data_path, index_path, now_millis};

/// Maximum key size we'll allocate during reads (64 MiB). Prevents OOM on
/// corrupt length fields.
const MAX_KEY_BYTES: i32 = 64 * 1024 * 1024;
/// Maximum value size we'll allocate during reads (64 MiB).
const MAX_VALUE_BYTES: i32 = 64 * 1024 * 1024;

/// Errors raised by SSTable creation, loading, and reads.
#[derive(Debug, Error)]
pub enum TableError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// On-disk bytes failed integrity checks (bad length field, file-id
    /// mismatch, index pointing at the wrong key).
    #[error("corrupt sstable: {0}")]
    Corrupt(String),
}

/// One immutable sorted table: a data file plus a fully memory-resident
/// key index.
///
/// Readers share the table through `&self`; the persistent data-file handle
/// is wrapped in a `Mutex` so point reads can seek through a shared
/// reference. Deletion consumes the table, guaranteeing no reader can
/// observe a half-removed pair.
pub struct SSTable {
    file_id: i64,
    creation_time: i64,
    entry_count: usize,
    data_size: u64,
    data_path: PathBuf,
    index_path: PathBuf,
    /// key -> byte offset of the entry in the data file.
    index: BTreeMap<Vec<u8>, u64>,
    /// Persistent read handle for the data file.
    data: Mutex<BufReader<File>>,
}

impl SSTable {
    /// Writes a new table pair for `entries` and returns the opened table.
    ///
    /// Entries are written in ascending key order (the `BTreeMap` input
    /// guarantees it). An empty value encodes a tombstone. Both files are
    /// fsynced before this returns; making the pair *live* is the caller's
    /// job (the manifest update is the commit point).
    pub fn create(
        dir: &Path,
        file_id: i64,
        entries: &BTreeMap<Vec<u8>, Vec<u8>>,
    ) -> Result<SSTable, TableError> {
        if entries.is_empty() {
            return Err(TableError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot create an sstable with no entries",
            )));
        }

        let creation_time = now_millis();
        let data_path = data_path(dir, file_id);
        let index_path = index_path(dir, file_id);

        // Data file: sorted entries, offsets recorded as we go.
        let mut index = BTreeMap::new();
        let mut offset = 0u64;
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&data_path)?;
            let mut out = BufWriter::new(file);

            for (key, value) in entries {
                index.insert(key.clone(), offset);
                out.write_i32::<BigEndian>(key.len() as i32)?;
                out.write_all(key)?;
                out.write_i32::<BigEndian>(value.len() as i32)?;
                out.write_all(value)?;
                offset += 8 + key.len() as u64 + value.len() as u64;
            }

            out.flush()?;
            out.get_ref().sync_all()?;
        }
        let data_size = offset;

        // Index file: header then (key, offset) pairs in key order.
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&index_path)?;
            let mut out = BufWriter::new(file);

            out.write_i64::<BigEndian>(file_id)?;
            out.write_i64::<BigEndian>(creation_time)?;
            out.write_i32::<BigEndian>(entries.len() as i32)?;
            out.write_i64::<BigEndian>(data_size as i64)?;

            for (key, entry_offset) in &index {
                out.write_i32::<BigEndian>(key.len() as i32)?;
                out.write_all(key)?;
                out.write_i64::<BigEndian>(*entry_offset as i64)?;
            }

            out.flush()?;
            out.get_ref().sync_all()?;
        }

        debug!(file_id, entries = entries.len(), "created sstable");

        let data = File::open(&data_path)?;
        Ok(SSTable {
            file_id,
            creation_time,
            entry_count: entries.len(),
            data_size,
            data_path,
            index_path,
            index,
            data: Mutex::new(BufReader::new(data)),
        })
    }

    /// Opens an existing table pair, loading the whole index into memory.
    ///
    /// The file id stored in the index header must match the id derived from
    /// the filename; a mismatch is `Corrupt`.
    pub fn load(dir: &Path, file_id: i64) -> Result<SSTable, TableError> {
        let data_path = data_path(dir, file_id);
        let index_path = index_path(dir, file_id);

        let mut idx = BufReader::new(File::open(&index_path)?);

        let stored_id = idx.read_i64::<BigEndian>()?;
        if stored_id != file_id {
            return Err(TableError::Corrupt(format!(
                "file id mismatch: index header says {stored_id}, filename says {file_id}"
            )));
        }
        let creation_time = idx.read_i64::<BigEndian>()?;
        let entry_count = idx.read_i32::<BigEndian>()?;
        if entry_count < 0 {
            return Err(TableError::Corrupt(format!(
                "negative entry count {entry_count}"
            )));
        }
        let data_size = idx.read_i64::<BigEndian>()?;
        if data_size < 0 {
            return Err(TableError::Corrupt(format!("negative data size {data_size}")));
        }

        let mut index = BTreeMap::new();
        for _ in 0..entry_count {
            let key_len = idx.read_i32::<BigEndian>()?;
            if key_len <= 0 || key_len > MAX_KEY_BYTES {
                return Err(TableError::Corrupt(format!(
                    "index key length {key_len} out of range"
                )));
            }
            let mut key = vec![0u8; key_len as usize];
            idx.read_exact(&mut key)?;
            let offset = idx.read_i64::<BigEndian>()?;
            if offset < 0 || offset as u64 >= data_size as u64 {
                return Err(TableError::Corrupt(format!(
                    "index offset {offset} outside data file"
                )));
            }
            index.insert(key, offset as u64);
        }

        let data = File::open(&data_path)?;
        debug!(file_id, entries = index.len(), "loaded sstable");

        Ok(SSTable {
            file_id,
            creation_time,
            entry_count: entry_count as usize,
            data_size: data_size as u64,
            data_path,
            index_path,
            index,
            data: Mutex::new(BufReader::new(data)),
        })
    }

    /// Point lookup.
    ///
    /// Returns the raw stored bytes: `Some(vec![])` means the table holds a
    /// tombstone (or empty value) for the key, `None` means the key is not
    /// in this table at all. Callers above this layer decide what an empty
    /// slot means.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TableError> {
        let offset = match self.index.get(key) {
            Some(&o) => o,
            None => return Ok(None),
        };
        let (stored_key, value) = self.read_entry_at(offset)?;
        if stored_key != key {
            return Err(TableError::Corrupt(format!(
                "index offset {offset} points at a different key"
            )));
        }
        Ok(Some(value))
    }

    /// All entries with `start <= key < end`, in ascending key order.
    ///
    /// Tombstones are included (as empty values); an inverted range is empty.
    pub fn get_range(
        &self,
        start: &[u8],
        end: &[u8],
    ) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, TableError> {
        let end = if end < start { start } else { end };
        let bounds: (Bound<&[u8]>, Bound<&[u8]>) = (Bound::Included(start), Bound::Excluded(end));
        self.collect_entries(self.index.range::<[u8], _>(bounds))
    }

    /// Every entry in the table, in ascending key order, tombstones included.
    pub fn get_all(&self) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, TableError> {
        self.collect_entries(self.index.iter())
    }

    /// Index probe only, no disk access.
    #[must_use]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.index.contains_key(key)
    }

    /// Keys in ascending order (index only).
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> {
        self.index.keys().map(Vec::as_slice)
    }

    /// Removes both files from disk, consuming the table.
    ///
    /// Only the manager calls this, and only after the superseding manifest
    /// is durable.
    pub fn delete(self) -> Result<(), TableError> {
        // Release the read handle before unlinking; harmless on unix,
        // required on windows.
        drop(self.data);
        fs::remove_file(&self.data_path)?;
        fs::remove_file(&self.index_path)?;
        debug!(file_id = self.file_id, "deleted sstable");
        Ok(())
    }

    #[must_use]
    pub fn file_id(&self) -> i64 {
        self.file_id
    }

    #[must_use]
    pub fn creation_time(&self) -> i64 {
        self.creation_time
    }

    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Size of the data file in bytes.
    #[must_use]
    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    fn collect_entries<'a, I>(&self, picks: I) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, TableError>
    where
        I: Iterator<Item = (&'a Vec<u8>, &'a u64)>,
    {
        let mut out = BTreeMap::new();
        for (key, &offset) in picks {
            let (stored_key, value) = self.read_entry_at(offset)?;
            if &stored_key != key {
                return Err(TableError::Corrupt(format!(
                    "index offset {offset} points at a different key"
                )));
            }
            out.insert(stored_key, value);
        }
        Ok(out)
    }

    /// Decodes the entry starting at `offset` in the data file.
    fn read_entry_at(&self, offset: u64) -> Result<(Vec<u8>, Vec<u8>), TableError> {
        let mut data = self
            .data
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        data.seek(SeekFrom::Start(offset))?;

        let key_len = data.read_i32::<BigEndian>()?;
        if key_len <= 0 || key_len > MAX_KEY_BYTES {
            return Err(TableError::Corrupt(format!(
                "entry key length {key_len} out of range"
            )));
        }
        let mut key = vec![0u8; key_len as usize];
        data.read_exact(&mut key)?;

        let val_len = data.read_i32::<BigEndian>()?;
        if val_len < 0 || val_len > MAX_VALUE_BYTES {
            return Err(TableError::Corrupt(format!(
                "entry value length {val_len} out of range"
            )));
        }
        let mut value = vec![0u8; val_len as usize];
        data.read_exact(&mut value)?;

        Ok((key, value))
    }
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("file_id", &self.file_id)
            .field("creation_time", &self.creation_time)
            .field("entry_count", &self.entry_count)
            .field("data_size", &self.data_size)
            .finish()
    }
}
