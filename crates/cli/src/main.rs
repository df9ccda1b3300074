//! # CLI — CoveKV Interactive Shell
//!
//! A REPL-style command-line interface for the CoveKV storage engine. Reads
//! commands from stdin, executes them against the engine, and prints results
//! to stdout. Designed for both interactive use and scripted testing (pipe
//! commands via stdin).
//!
//! ## Commands
//!
//! ```text
//! PUT key value        Insert or update a key-value pair
//! GET key              Look up a key (prints value or "(nil)")
//! DEL key              Delete a key
//! RANGE start end      Range scan (inclusive start, exclusive end)
//! BATCH k1 v1 k2 v2 …  Put several pairs in one exclusive section
//! FLUSH                Force the memtable into an SSTable
//! COMPACT              Merge all SSTables into one
//! MERGE n              Merge SSTables down to at most n tables
//! STATS                Print store statistics
//! EXIT / QUIT          Close the store and leave
//! ```
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! COVE_DIR              Data directory            (default: "data")
//! COVE_FLUSH_THRESHOLD  Flush threshold in writes (default: 10000)
//! COVE_CHECKPOINT_SECS  Checkpoint interval       (default: 60)
//! COVE_MAX_SSTABLES     Compaction trigger        (default: 10)
//! COVE_WAL_SYNC         fsync every WAL append    (default: "true")
//! ```

use anyhow::Result;
use engine::{Config, Engine};
use std::io::{self, BufRead, Write};
use std::time::Duration;

/// Reads a configuration value from the environment, falling back to `default`.
fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn config_from_env() -> (String, Config) {
    let dir = env_or("COVE_DIR", "data");
    let flush_threshold: usize = env_or("COVE_FLUSH_THRESHOLD", "10000")
        .parse()
        .unwrap_or(10_000);
    let checkpoint_secs: u64 = env_or("COVE_CHECKPOINT_SECS", "60").parse().unwrap_or(60);
    let max_sstables: usize = env_or("COVE_MAX_SSTABLES", "10").parse().unwrap_or(10);
    let wal_sync: bool = env_or("COVE_WAL_SYNC", "true").parse().unwrap_or(true);

    let config = Config {
        memtable_flush_threshold: flush_threshold,
        checkpoint_interval: Duration::from_secs(checkpoint_secs),
        max_sstables,
        wal_sync,
        ..Config::default()
    };
    (dir, config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let (dir, config) = config_from_env();
    let engine = Engine::open(&dir, config)?;

    println!(
        "CoveKV started (dir={}, flush_threshold={}, max_sstables={})",
        dir,
        engine.config().memtable_flush_threshold,
        engine.config().max_sstables
    );
    println!("Commands: PUT key value | GET key | DEL key | RANGE start end");
    println!("          BATCH k v [k v ...] | FLUSH | COMPACT | MERGE n | STATS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "PUT" => match (parts.next(), parts.next()) {
                    (Some(k), Some(v)) => {
                        let rest: Vec<&str> = parts.collect();
                        let value = if rest.is_empty() {
                            v.to_string()
                        } else {
                            format!("{} {}", v, rest.join(" "))
                        };
                        match engine.put(k.as_bytes(), value.as_bytes()) {
                            Ok(()) => println!("OK"),
                            Err(e) => println!("ERR put failed: {e}"),
                        }
                    }
                    _ => println!("ERR usage: PUT key value"),
                },
                "GET" => match parts.next() {
                    Some(k) => match engine.read(k.as_bytes()) {
                        Ok(Some(v)) => println!("{}", String::from_utf8_lossy(&v)),
                        Ok(None) => println!("(nil)"),
                        Err(e) => println!("ERR read failed: {e}"),
                    },
                    None => println!("ERR usage: GET key"),
                },
                "DEL" => match parts.next() {
                    Some(k) => match engine.delete(k.as_bytes()) {
                        Ok(()) => println!("OK"),
                        Err(e) => println!("ERR delete failed: {e}"),
                    },
                    None => println!("ERR usage: DEL key"),
                },
                "RANGE" => match (parts.next(), parts.next()) {
                    (Some(start), Some(end)) => {
                        match engine.read_key_range(start.as_bytes(), end.as_bytes()) {
                            Ok(result) if result.is_empty() => println!("(empty)"),
                            Ok(result) => {
                                let count = result.len();
                                for (k, v) in result {
                                    println!(
                                        "{} -> {}",
                                        String::from_utf8_lossy(&k),
                                        String::from_utf8_lossy(&v)
                                    );
                                }
                                println!("({count} entries)");
                            }
                            Err(e) => println!("ERR range failed: {e}"),
                        }
                    }
                    _ => println!("ERR usage: RANGE start end"),
                },
                "BATCH" => {
                    let rest: Vec<&str> = parts.collect();
                    if rest.is_empty() || rest.len() % 2 != 0 {
                        println!("ERR usage: BATCH k v [k v ...]");
                    } else {
                        let keys: Vec<Vec<u8>> = rest
                            .iter()
                            .step_by(2)
                            .map(|k| k.as_bytes().to_vec())
                            .collect();
                        let values: Vec<Vec<u8>> = rest
                            .iter()
                            .skip(1)
                            .step_by(2)
                            .map(|v| v.as_bytes().to_vec())
                            .collect();
                        let count = keys.len();
                        match engine.batch_put(keys, values) {
                            Ok(()) => println!("OK ({count} pairs)"),
                            Err(e) => println!("ERR batch failed: {e}"),
                        }
                    }
                }
                "FLUSH" => match engine.flush() {
                    Ok(()) => println!("OK"),
                    Err(e) => println!("ERR flush failed: {e}"),
                },
                "COMPACT" => match engine.compact() {
                    Ok(()) => match engine.stats() {
                        Ok(stats) => println!("OK (sstables={})", stats.sstable_count),
                        Err(_) => println!("OK"),
                    },
                    Err(e) => println!("ERR compact failed: {e}"),
                },
                "MERGE" => match parts.next().and_then(|n| n.parse::<usize>().ok()) {
                    Some(target) => match engine.merge(target) {
                        Ok(()) => match engine.stats() {
                            Ok(stats) => println!("OK (sstables={})", stats.sstable_count),
                            Err(_) => println!("OK"),
                        },
                        Err(e) => println!("ERR merge failed: {e}"),
                    },
                    None => println!("ERR usage: MERGE n"),
                },
                "STATS" => match engine.stats() {
                    Ok(stats) => println!("{stats:?}"),
                    Err(e) => println!("ERR stats failed: {e}"),
                },
                "EXIT" | "QUIT" => {
                    engine.close()?;
                    println!("bye");
                    break;
                }
                other => println!("unknown command: {other}"),
            }
        }

        print!("> ");
        io::stdout().flush().ok();
    }

    // EOF without EXIT still shuts down cleanly; close() is idempotent.
    engine.close()?;
    Ok(())
}
