//! Multi-threaded write path tests
//!
//! Validates seqNo assignment, per-document linearisation and version
//! conflicts with concurrent writers.

use seqstore_core::{Index, ResultKind, VersionType};
use seqstore_engine::invariants;
use seqstore_engine::{Engine, EngineConfig};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn open_engine(config: EngineConfig) -> (TempDir, Arc<Engine>) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::create(temp_dir.path().join("shard"), config).unwrap();
    engine.skip_translog_recovery().unwrap();
    (temp_dir, Arc::new(engine))
}

// ============================================================================
// External versions
// ============================================================================

/// Version 5 and version 3 race on the same document: 5 always ends up
/// stored, and 3 only succeeds if it was sequenced before 5.
#[test]
fn test_concurrent_external_versions() {
    for _ in 0..20 {
        let (_dir, engine) = open_engine(EngineConfig::for_testing());
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [5i64, 3]
            .into_iter()
            .map(|version| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let op = Index::primary("doc", json!({ "v": version }))
                        .with_version(version, VersionType::External);
                    engine.index(op).unwrap()
                })
            })
            .collect();
        let mut results = handles.into_iter().map(|h| h.join().unwrap());
        let five = results.next().unwrap();
        let three = results.next().unwrap();

        assert!(five.is_success());
        match three.kind {
            ResultKind::Conflict => {}
            ResultKind::Success => assert!(three.seq_no < five.seq_no),
            other => panic!("unexpected result {other:?}"),
        }
        let stored = engine.get("doc").unwrap().unwrap();
        assert_eq!(stored.version, 5);
        assert_eq!(stored.source, json!({ "v": 5 }));
    }
}

#[test]
fn test_external_lower_version_conflicts() {
    let (_dir, engine) = open_engine(EngineConfig::for_testing());
    engine
        .index(Index::primary("doc", json!({})).with_version(5, VersionType::External))
        .unwrap();
    let three = engine
        .index(Index::primary("doc", json!({})).with_version(3, VersionType::External))
        .unwrap();
    assert_eq!(three.kind, ResultKind::Conflict);
    assert_eq!(three.version, 5);
    assert_eq!(engine.get("doc").unwrap().unwrap().version, 5);
}

// ============================================================================
// SeqNo assignment
// ============================================================================

#[test]
fn test_concurrent_writers_get_contiguous_seq_nos() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 50;
    let (_dir, engine) = open_engine(EngineConfig::for_testing());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..PER_THREAD)
                    .map(|i| {
                        let op = Index::primary(format!("t{t}-{i}"), json!({ "t": t, "i": i }));
                        engine.index(op).unwrap().seq_no
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seq_nos: Vec<i64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    seq_nos.sort_unstable();
    let expected: Vec<i64> = (0..(THREADS * PER_THREAD) as i64).collect();
    assert_eq!(seq_nos, expected);

    let last = (THREADS * PER_THREAD) as i64 - 1;
    assert_eq!(engine.seq_no_stats().local_checkpoint, last);
    engine.refresh().unwrap();
    assert_eq!(engine.doc_count(), THREADS * PER_THREAD);
}

#[test]
fn test_same_document_updates_are_linearised() {
    const THREADS: usize = 6;
    const PER_THREAD: usize = 40;
    let (_dir, engine) = open_engine(EngineConfig::for_testing());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..PER_THREAD {
                    let result = engine
                        .index(Index::primary("hot", json!({ "t": t, "i": i })))
                        .unwrap();
                    assert!(result.is_success());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = (THREADS * PER_THREAD) as i64;
    let got = engine.get("hot").unwrap().unwrap();
    assert_eq!(got.version, total);
    assert_eq!(got.seq_no, total - 1);
    invariants::audit(&engine).unwrap();
}

// ============================================================================
// Refresh / flush under load
// ============================================================================

#[test]
fn test_refresh_and_flush_during_writes() {
    let (_dir, engine) = open_engine(EngineConfig::for_testing());
    let stop = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut i = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    engine
                        .index(Index::primary(format!("t{t}-{}", i % 25), json!({ "i": i })))
                        .unwrap();
                    i += 1;
                }
                i
            })
        })
        .collect();

    let maintenance = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for round in 0..10 {
                engine.refresh().unwrap();
                if round % 3 == 0 {
                    engine.flush(false).unwrap();
                }
                thread::yield_now();
            }
        })
    };

    maintenance.join().unwrap();
    stop.store(true, Ordering::Relaxed);
    let written: u64 = writers.into_iter().map(|h| h.join().unwrap()).sum();

    let stats = engine.seq_no_stats();
    assert_eq!(stats.max_seq_no, written as i64 - 1);
    assert_eq!(stats.local_checkpoint, stats.max_seq_no);

    let info = engine.flush(true).unwrap().unwrap();
    assert_eq!(info.max_seq_no, stats.max_seq_no);
    invariants::audit(&engine).unwrap();
}

#[test]
fn test_concurrent_gets_see_own_writes() {
    let (_dir, engine) = open_engine(EngineConfig::for_testing());
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..30 {
                    let id = format!("t{t}");
                    let result = engine.index(Index::primary(id.as_str(), json!({ "i": i }))).unwrap();
                    let got = engine.get(&id).unwrap().unwrap();
                    assert_eq!(got.version, result.version);
                    assert_eq!(got.source, json!({ "i": i }));
                    if i % 10 == 0 {
                        engine.refresh().unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}
