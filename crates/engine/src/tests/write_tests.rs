use super::helpers::{count_sst_files, flushy_config, open_engine};
use crate::{Config, Engine, StoreError};
use anyhow::Result;
use tempfile::tempdir;

// --------------------- Basic put / read / delete ---------------------

#[test]
fn put_and_read() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    engine.put(b"name", b"alice")?;
    assert_eq!(engine.read(b"name")?, Some(b"alice".to_vec()));
    Ok(())
}

#[test]
fn read_missing_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());
    assert!(engine.read(b"nope")?.is_none());
    Ok(())
}

#[test]
fn overwrite_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    engine.put(b"k", b"v1")?;
    engine.put(b"k", b"v2")?;
    assert_eq!(engine.read(b"k")?, Some(b"v2".to_vec()));
    Ok(())
}

#[test]
fn delete_removes_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    engine.put(b"k", b"v")?;
    engine.delete(b"k")?;
    assert!(engine.read(b"k")?.is_none());
    Ok(())
}

#[test]
fn delete_of_absent_key_succeeds() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    engine.delete(b"never-existed")?;
    assert!(engine.read(b"never-existed")?.is_none());
    Ok(())
}

#[test]
fn put_after_delete_resurrects() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    engine.put(b"k", b"v1")?;
    engine.delete(b"k")?;
    engine.put(b"k", b"v2")?;
    assert_eq!(engine.read(b"k")?, Some(b"v2".to_vec()));
    Ok(())
}

// --------------------- Argument validation ---------------------

#[test]
fn put_rejects_empty_key() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    let result = engine.put(b"", b"v");
    assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
}

#[test]
fn delete_rejects_empty_key() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    assert!(matches!(
        engine.delete(b""),
        Err(StoreError::InvalidArgument(_))
    ));
}

#[test]
fn put_rejects_oversized_key() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    let big_key = vec![b'k'; engine.config().max_key_bytes + 1];
    let result = engine.put(&big_key, b"v");
    assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
}

#[test]
fn put_rejects_oversized_value() {
    let dir = tempdir().unwrap();
    let engine = Engine::open(
        dir.path(),
        Config {
            max_value_bytes: 16,
            wal_sync: false,
            ..Config::default()
        },
    )
    .unwrap();

    let result = engine.put(b"k", &vec![b'v'; 17]);
    assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
    // Nothing was written.
    assert!(engine.read(b"k").unwrap().is_none());
}

#[test]
fn put_accepts_max_sized_key() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    let max_key = vec![b'k'; engine.config().max_key_bytes];
    engine.put(&max_key, b"v")?;
    assert_eq!(engine.read(&max_key)?, Some(b"v".to_vec()));
    Ok(())
}

// --------------------- Batch put ---------------------

#[test]
fn batch_put_stores_every_pair() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    let keys = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
    let values = vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()];
    engine.batch_put(keys, values)?;

    assert_eq!(engine.read(b"a")?, Some(b"1".to_vec()));
    assert_eq!(engine.read(b"b")?, Some(b"2".to_vec()));
    assert_eq!(engine.read(b"c")?, Some(b"3".to_vec()));
    Ok(())
}

#[test]
fn batch_put_rejects_length_mismatch() {
    let dir = tempdir().unwrap();
    let engine = open_engine(dir.path());

    let result = engine.batch_put(vec![b"a".to_vec()], vec![]);
    assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
}

#[test]
fn batch_put_validates_before_writing_anything() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    // Second key is empty: the whole batch must be rejected up front.
    let keys = vec![b"good".to_vec(), Vec::new()];
    let values = vec![b"1".to_vec(), b"2".to_vec()];
    assert!(matches!(
        engine.batch_put(keys, values),
        Err(StoreError::InvalidArgument(_))
    ));

    assert!(engine.read(b"good")?.is_none());
    assert_eq!(engine.stats()?.wal_bytes, 0);
    Ok(())
}

#[test]
fn batch_put_crossing_flush_threshold_flushes() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(dir.path(), flushy_config(5))?;

    let keys: Vec<_> = (0..8u32).map(|i| format!("k{i}").into_bytes()).collect();
    let values: Vec<_> = (0..8u32).map(|i| format!("v{i}").into_bytes()).collect();
    engine.batch_put(keys, values)?;

    assert!(engine.stats()?.sstable_count >= 1);
    for i in 0..8u32 {
        assert_eq!(
            engine.read(format!("k{i}").as_bytes())?,
            Some(format!("v{i}").into_bytes())
        );
    }
    Ok(())
}

// --------------------- Flush mechanics ---------------------

#[test]
fn exactly_threshold_writes_trigger_one_flush() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(dir.path(), flushy_config(10))?;

    for i in 0..9u32 {
        engine.put(format!("k{i}").as_bytes(), b"v")?;
    }
    assert_eq!(engine.stats()?.sstable_count, 0);
    assert_eq!(engine.stats()?.memtable_size, 9);

    // The 10th write hits the threshold and flushes everything.
    engine.put(b"k9", b"v")?;
    let stats = engine.stats()?;
    assert_eq!(stats.sstable_count, 1);
    assert_eq!(stats.memtable_size, 0);

    // The 11th write observes the flushed state and lands in a fresh epoch.
    engine.put(b"k10", b"v")?;
    let stats = engine.stats()?;
    assert_eq!(stats.sstable_count, 1);
    assert_eq!(stats.memtable_size, 1);
    Ok(())
}

#[test]
fn deletes_count_toward_the_flush_threshold() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(dir.path(), flushy_config(4))?;

    engine.put(b"a", b"1")?;
    engine.put(b"b", b"2")?;
    engine.delete(b"a")?;
    engine.delete(b"zz")?;

    // 4 writes -> flush happened; the tombstones went to the SSTable.
    let stats = engine.stats()?;
    assert_eq!(stats.sstable_count, 1);
    assert_eq!(stats.memtable_size, 0);
    assert_eq!(stats.deleted_count, 0);

    assert!(engine.read(b"a")?.is_none());
    assert_eq!(engine.read(b"b")?, Some(b"2".to_vec()));
    Ok(())
}

#[test]
fn manual_flush_persists_and_clears_memtable() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    engine.put(b"k", b"v")?;
    engine.flush()?;

    let stats = engine.stats()?;
    assert_eq!(stats.memtable_size, 0);
    assert_eq!(stats.sstable_count, 1);
    assert_eq!(count_sst_files(dir.path()), 1);

    // Still readable, now from the SSTable.
    assert_eq!(engine.read(b"k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn flush_with_empty_memtable_is_noop() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    engine.flush()?;
    assert_eq!(engine.stats()?.sstable_count, 0);
    assert_eq!(count_sst_files(dir.path()), 0);
    Ok(())
}

#[test]
fn flush_of_only_deletes_writes_tombstones() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    // First epoch: a value, flushed.
    engine.put(b"k", b"v")?;
    engine.flush()?;

    // Second epoch: only a delete. The flush must still produce an SSTable,
    // otherwise the older table would resurrect the key.
    engine.delete(b"k")?;
    engine.flush()?;

    assert_eq!(engine.stats()?.sstable_count, 2);
    assert!(engine.read(b"k")?.is_none());
    Ok(())
}

// --------------------- Checkpoint ---------------------

#[test]
fn checkpoint_truncates_wal_after_interval() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(
        dir.path(),
        Config {
            checkpoint_interval: std::time::Duration::ZERO,
            wal_sync: false,
            ..Config::default()
        },
    )?;

    engine.put(b"k", b"v")?;

    // Interval zero: the put itself checkpointed.
    let stats = engine.stats()?;
    assert_eq!(stats.wal_bytes, 0);
    assert_eq!(stats.sstable_count, 1);
    assert_eq!(engine.read(b"k")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn wal_grows_until_checkpoint() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    let before = engine.stats()?.wal_bytes;
    engine.put(b"k", b"v")?;
    assert!(engine.stats()?.wal_bytes > before);
    Ok(())
}

// --------------------- Stats ---------------------

#[test]
fn stats_reflect_memtable_and_deletes() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    engine.put(b"a", b"1")?;
    engine.put(b"b", b"2")?;
    engine.delete(b"c")?;

    let stats = engine.stats()?;
    assert_eq!(stats.memtable_size, 2);
    assert_eq!(stats.deleted_count, 1);
    assert_eq!(stats.sstable_count, 0);
    assert!(stats.wal_bytes > 0);
    Ok(())
}

// --------------------- Close ---------------------

#[test]
fn close_flushes_and_rejects_further_ops() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    engine.put(b"k", b"v")?;
    engine.close()?;

    assert_eq!(count_sst_files(dir.path()), 1);
    assert!(matches!(engine.read(b"k"), Err(StoreError::Closed)));
    assert!(matches!(engine.put(b"x", b"y"), Err(StoreError::Closed)));
    assert!(matches!(engine.delete(b"k"), Err(StoreError::Closed)));
    assert!(matches!(engine.stats(), Err(StoreError::Closed)));
    assert!(matches!(engine.compact(), Err(StoreError::Closed)));
    Ok(())
}

#[test]
fn close_is_idempotent() -> Result<()> {
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    engine.put(b"k", b"v")?;
    engine.close()?;
    engine.close()?;
    Ok(())
}

// --------------------- Empty value conflation ---------------------

#[test]
fn empty_value_reads_as_absent_after_flush() -> Result<()> {
    // An empty value and a tombstone share the same on-disk encoding
    // (val_len = 0). In the memtable the empty value is still served; once
    // flushed it is indistinguishable from a delete.
    let dir = tempdir()?;
    let engine = open_engine(dir.path());

    engine.put(b"k", b"")?;
    assert_eq!(engine.read(b"k")?, Some(Vec::new()));

    engine.flush()?;
    assert!(engine.read(b"k")?.is_none());
    Ok(())
}

// --------------------- Concurrency smoke ---------------------

#[test]
fn concurrent_readers_and_writer() -> Result<()> {
    use std::sync::Arc;

    let dir = tempdir()?;
    let engine = Arc::new(Engine::open(dir.path(), flushy_config(50))?);

    for i in 0..100u32 {
        engine.put(format!("seed{i}").as_bytes(), b"v")?;
    }

    let mut handles = Vec::new();
    for t in 0..4 {
        let engine = Arc::clone(&engine);
        handles.push(std::thread::spawn(move || {
            for i in 0..100u32 {
                let key = format!("seed{i}");
                let _ = engine.read(key.as_bytes()).unwrap();
                if t == 0 {
                    engine
                        .put(format!("w{i}").as_bytes(), b"x")
                        .unwrap();
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    for i in 0..100u32 {
        assert!(engine.read(format!("seed{i}").as_bytes())?.is_some());
        assert!(engine.read(format!("w{i}").as_bytes())?.is_some());
    }
    Ok(())
}
