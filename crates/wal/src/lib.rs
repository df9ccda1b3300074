//! # WAL — Write-Ahead Log
//!
//! Provides crash-safe durability for the CoveKV storage engine.
//!
//! Every mutation (`PUT` or `DELETE`) is serialized into a binary record and
//! appended to the WAL **before** the corresponding in-memory update. Each
//! append is followed by `fsync`, so a record is durable on disk before the
//! write is acknowledged. On restart the WAL is replayed to reconstruct the
//! memtable and deleted-key set, guaranteeing that no acknowledged write is
//! lost.
//!
//! ## Binary Record Format
//!
//! All integers are big-endian; records are contiguous with no framing:
//!
//! ```text
//! [timestamp: i64][op_len: u16][op: UTF-8 "PUT"|"DELETE"]
//! [key_len: i32][key][val_len: i32][val]
//! ```
//!
//! `val_len` is always `0` for `DELETE`.
//!
//! ## Replay Semantics
//!
//! - A truncated record at the tail (crash mid-append) ends replay
//!   silently; every fully written record before it is still delivered.
//! - Any other malformed record (bad op string, absurd length field) is
//!   logged and skipped best-effort by advancing the scan position past the
//!   bytes consumed so far.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{Wal, WalOp};
//!
//! let mut wal = Wal::open("wal.log", true).unwrap();
//! wal.append(WalOp::Put, b"hello", b"world").unwrap();
//! wal.replay(|rec| println!("{:?}", rec)).unwrap();
//! ```

use byteorder::{BigEndian, WriteBytesExt};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;

/// Safety cap for decoded key/value length fields (64 MiB). A corrupt length
/// prefix must not cause a multi-gigabyte allocation during replay.
const MAX_FIELD_BYTES: i32 = 64 * 1024 * 1024;

/// The mutation kind carried by a WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalOp {
    Put,
    Delete,
}

impl WalOp {
    /// The on-disk spelling of the operation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WalOp::Put => "PUT",
            WalOp::Delete => "DELETE",
        }
    }

    fn parse(s: &str) -> Option<WalOp> {
        match s {
            "PUT" => Some(WalOp::Put),
            "DELETE" => Some(WalOp::Delete),
            _ => None,
        }
    }
}

/// A fully decoded WAL record, as delivered to the replay handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub op: WalOp,
    pub key: Vec<u8>,
    /// Empty for `DELETE`.
    pub value: Vec<u8>,
    /// Milliseconds since the Unix epoch at the time the record was appended.
    pub timestamp: i64,
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A record failed structural validation in a non-recoverable way.
    #[error("corrupt wal record: {0}")]
    Corrupt(String),
}

/// Append-only write-ahead log.
///
/// The file handle is opened in append mode and kept for the lifetime of the
/// value. Appends are serialized by the caller (the engine holds its write
/// lock across `append`); replay opens its own read-only view of the file.
pub struct Wal {
    path: PathBuf,
    file: File,
    /// If true, every append is followed by `fsync`.
    sync: bool,
    /// Byte length of the log, which is also the offset of the next record.
    position: u64,
}

impl Wal {
    /// Opens (or creates) the WAL file in append mode.
    ///
    /// # Arguments
    ///
    /// * `path` - file system path for the WAL (created if it does not exist).
    /// * `sync` - if true, every `append` call is followed by `fsync`.
    ///   Durability requires `true`; `false` is for tests and benchmarks.
    pub fn open<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let position = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            sync,
            position,
        })
    }

    /// Serializes one mutation and appends it to the log, forcing the bytes
    /// and file metadata to stable storage before returning.
    ///
    /// Returns the byte offset at which the record begins. On failure the log
    /// may contain a partial record at the tail; replay tolerates that, and
    /// the caller must not apply the mutation to the memtable.
    pub fn append(&mut self, op: WalOp, key: &[u8], value: &[u8]) -> Result<u64, WalError> {
        let value = match op {
            WalOp::Put => value,
            WalOp::Delete => &[],
        };

        let op_str = op.as_str();
        let mut buf = Vec::with_capacity(18 + op_str.len() + key.len() + value.len());
        buf.write_i64::<BigEndian>(now_millis())?;
        buf.write_u16::<BigEndian>(op_str.len() as u16)?;
        buf.extend_from_slice(op_str.as_bytes());
        buf.write_i32::<BigEndian>(key.len() as i32)?;
        buf.extend_from_slice(key);
        buf.write_i32::<BigEndian>(value.len() as i32)?;
        buf.extend_from_slice(value);

        self.file.write_all(&buf)?;
        if self.sync {
            self.file.sync_all()?;
        }

        let offset = self.position;
        self.position += buf.len() as u64;
        Ok(offset)
    }

    /// Replays every decodable record in file order, calling `apply` for each.
    ///
    /// Returns the number of records delivered. See the module docs for the
    /// treatment of truncated tails and malformed records.
    pub fn replay<F>(&self, mut apply: F) -> Result<usize, WalError>
    where
        F: FnMut(WalRecord),
    {
        let data = fs::read(&self.path)?;
        let mut pos = 0usize;
        let mut count = 0usize;

        while pos < data.len() {
            match decode_record(&data[pos..]) {
                Decoded::Record { record, len } => {
                    apply(record);
                    pos += len;
                    count += 1;
                }
                Decoded::Truncated => {
                    warn!(
                        offset = pos,
                        "truncated record at wal tail, ending replay"
                    );
                    break;
                }
                Decoded::Malformed { reason, consumed } => {
                    warn!(offset = pos, reason, "skipping malformed wal record");
                    pos += consumed.max(1);
                }
            }
        }

        Ok(count)
    }

    /// Replaces the log with an empty file.
    ///
    /// Callers must only truncate after a successful flush whose effects are
    /// durable (the flushed SSTable and manifest have been fsynced).
    pub fn truncate(&mut self) -> Result<(), WalError> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.position = 0;
        Ok(())
    }

    /// Current log length in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.position
    }

    /// Forces any pending bytes to stable storage.
    ///
    /// Every `append` already syncs; this exists for the engine's shutdown
    /// path, which syncs before releasing the file handle.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.file.sync_all()?;
        Ok(())
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

enum Decoded {
    Record { record: WalRecord, len: usize },
    /// Ran out of bytes mid-record: a partial append at the tail.
    Truncated,
    /// Structurally invalid bytes; `consumed` is how far the decoder got.
    Malformed {
        reason: &'static str,
        consumed: usize,
    },
}

/// Attempts to decode one record from the head of `buf`.
fn decode_record(buf: &[u8]) -> Decoded {
    let mut pos = 0usize;

    let Some(timestamp) = take_i64(buf, &mut pos) else {
        return Decoded::Truncated;
    };

    let Some(op_len) = take_u16(buf, &mut pos) else {
        return Decoded::Truncated;
    };
    // "PUT" and "DELETE" are the only valid op strings; anything longer is
    // garbage, not a record from a newer version.
    if op_len == 0 || op_len > 16 {
        return Decoded::Malformed {
            reason: "op length out of range",
            consumed: pos,
        };
    }
    let Some(op_bytes) = take_bytes(buf, &mut pos, op_len as usize) else {
        return Decoded::Truncated;
    };
    let op = match std::str::from_utf8(op_bytes).ok().and_then(WalOp::parse) {
        Some(op) => op,
        None => {
            return Decoded::Malformed {
                reason: "unknown operation",
                consumed: pos,
            }
        }
    };

    let Some(key_len) = take_i32(buf, &mut pos) else {
        return Decoded::Truncated;
    };
    if key_len <= 0 || key_len > MAX_FIELD_BYTES {
        return Decoded::Malformed {
            reason: "key length out of range",
            consumed: pos,
        };
    }
    let Some(key) = take_bytes(buf, &mut pos, key_len as usize) else {
        return Decoded::Truncated;
    };
    let key = key.to_vec();

    let Some(val_len) = take_i32(buf, &mut pos) else {
        return Decoded::Truncated;
    };
    if val_len < 0 || val_len > MAX_FIELD_BYTES {
        return Decoded::Malformed {
            reason: "value length out of range",
            consumed: pos,
        };
    }
    let Some(value) = take_bytes(buf, &mut pos, val_len as usize) else {
        return Decoded::Truncated;
    };
    let value = value.to_vec();

    Decoded::Record {
        record: WalRecord {
            op,
            key,
            value,
            timestamp,
        },
        len: pos,
    }
}

fn take_bytes<'a>(buf: &'a [u8], pos: &mut usize, n: usize) -> Option<&'a [u8]> {
    let out = buf.get(*pos..*pos + n)?;
    *pos += n;
    Some(out)
}

fn take_i64(buf: &[u8], pos: &mut usize) -> Option<i64> {
    take_bytes(buf, pos, 8).map(|b| i64::from_be_bytes(b.try_into().unwrap()))
}

fn take_i32(buf: &[u8], pos: &mut usize) -> Option<i32> {
    take_bytes(buf, pos, 4).map(|b| i32::from_be_bytes(b.try_into().unwrap()))
}

fn take_u16(buf: &[u8], pos: &mut usize) -> Option<u16> {
    take_bytes(buf, pos, 2).map(|b| u16::from_be_bytes(b.try_into().unwrap()))
}
