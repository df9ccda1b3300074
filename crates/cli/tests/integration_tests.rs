//! End-to-end scenarios driven through the public engine API, the way a
//! front-end (REPL, network server) would use it.

use anyhow::Result;
use engine::{Config, Engine};
use tempfile::tempdir;

fn config() -> Config {
    Config {
        wal_sync: false,
        ..Config::default()
    }
}

#[test]
fn basic_persistence_across_close_and_reopen() -> Result<()> {
    let dir = tempdir()?;

    {
        let engine = Engine::open(dir.path(), config())?;
        engine.put(b"k1", b"v1")?;
        engine.close()?;
    }

    let engine = Engine::open(dir.path(), config())?;
    assert_eq!(engine.read(b"k1")?, Some(b"v1".to_vec()));
    Ok(())
}

#[test]
fn delete_shadows_flushed_sstable_across_reopen() -> Result<()> {
    let dir = tempdir()?;

    {
        let engine = Engine::open(dir.path(), config())?;
        engine.put(b"x", b"1")?;
        engine.flush()?; // "x" now lives in an SSTable
        engine.delete(b"x")?;
        assert!(engine.read(b"x")?.is_none());
        engine.close()?;
    }

    let engine = Engine::open(dir.path(), config())?;
    assert!(engine.read(b"x")?.is_none());
    Ok(())
}

#[test]
fn range_overlay_returns_exactly_the_window() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(dir.path(), config())?;

    engine.put(b"a", b"1")?;
    engine.put(b"b", b"2")?;
    engine.put(b"c", b"3")?;
    engine.put(b"d", b"4")?;

    let range = engine.read_key_range(b"b", b"d")?;
    let pairs: Vec<_> = range.into_iter().collect();
    assert_eq!(
        pairs,
        vec![
            (b"b".to_vec(), b"2".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ]
    );
    Ok(())
}

#[test]
fn flush_threshold_spills_to_sstables_with_all_keys_readable() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(
        dir.path(),
        Config {
            memtable_flush_threshold: 1_000,
            wal_sync: false,
            ..Config::default()
        },
    )?;

    for i in 0..=1_000u32 {
        engine.put(format!("k{i}").as_bytes(), format!("v{i}").as_bytes())?;
    }

    assert!(engine.stats()?.sstable_count >= 1);
    assert_eq!(engine.read(b"k0")?, Some(b"v0".to_vec()));
    assert_eq!(engine.read(b"k1000")?, Some(b"v1000".to_vec()));
    Ok(())
}

#[test]
fn crash_without_close_recovers_from_wal() -> Result<()> {
    let dir = tempdir()?;

    {
        let engine = Engine::open(dir.path(), config())?;
        engine.put(b"p", b"v")?;
        // dropped without close(): simulated crash
    }

    let engine = Engine::open(dir.path(), config())?;
    assert_eq!(engine.read(b"p")?, Some(b"v".to_vec()));
    Ok(())
}

#[test]
fn newest_wins_across_sstables_and_compactions() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(dir.path(), config())?;

    engine.put(b"k", b"a")?;
    engine.flush()?;
    engine.put(b"k", b"b")?;
    engine.flush()?;
    assert_eq!(engine.read(b"k")?, Some(b"b".to_vec()));

    engine.compact()?;
    assert_eq!(engine.stats()?.sstable_count, 1);
    assert_eq!(engine.read(b"k")?, Some(b"b".to_vec()));
    Ok(())
}

#[test]
fn interleaved_workload_ends_in_expected_state() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::open(
        dir.path(),
        Config {
            memtable_flush_threshold: 64,
            wal_sync: false,
            ..Config::default()
        },
    )?;

    for i in 0..500u32 {
        engine.put(format!("key{i:04}").as_bytes(), format!("v{i}").as_bytes())?;
    }
    for i in (0..500u32).step_by(2) {
        engine.delete(format!("key{i:04}").as_bytes())?;
    }
    engine.compact()?;

    for i in 0..500u32 {
        let key = format!("key{i:04}");
        let got = engine.read(key.as_bytes())?;
        if i % 2 == 0 {
            assert!(got.is_none(), "{key} should be deleted");
        } else {
            assert_eq!(got, Some(format!("v{i}").into_bytes()), "{key} wrong value");
        }
    }

    let range = engine.read_key_range(b"key0000", b"key0500")?;
    assert_eq!(range.len(), 250);
    Ok(())
}
