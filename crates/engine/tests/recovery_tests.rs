//! Translog recovery tests
//!
//! Simulates restarts by dropping an engine and reopening the shard
//! directory, then checks that replay reproduces the pre-restart state.

use seqstore_core::{Delete, Error, GetResult, Index, NoOp, Origin};
use seqstore_engine::invariants;
use seqstore_engine::{Engine, EngineConfig, EngineState};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn snapshot_docs(engine: &Engine, ids: &[String]) -> BTreeMap<String, Option<GetResult>> {
    ids.iter()
        .map(|id| (id.clone(), engine.get(id).unwrap()))
        .collect()
}

fn write_workload(engine: &Engine, range: std::ops::Range<usize>) -> Vec<String> {
    let mut ids = Vec::new();
    for i in range {
        let id = format!("doc-{}", i % 7);
        if i % 5 == 4 {
            engine.delete(Delete::primary(id.as_str())).unwrap();
        } else {
            engine
                .index(Index::primary(id.as_str(), json!({ "i": i })))
                .unwrap();
        }
        ids.push(id);
    }
    ids.sort();
    ids.dedup();
    ids
}

/// Routes recovery logs to the test harness output
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn reopen(path: &Path, config: EngineConfig) -> Engine {
    init_logging();
    let engine = Engine::open(path, config).unwrap();
    assert_eq!(engine.state(), EngineState::Recovering);
    engine
}

#[test]
fn test_restart_replays_unflushed_operations() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shard");

    let (ids, before, stats_before) = {
        let engine = Engine::create(&path, EngineConfig::for_testing()).unwrap();
        engine.skip_translog_recovery().unwrap();
        let ids = write_workload(&engine, 0..50);
        let before = snapshot_docs(&engine, &ids);
        (ids, before, engine.seq_no_stats())
    };

    let engine = reopen(&path, EngineConfig::for_testing());
    let stats = engine.recover_from_translog(i64::MAX).unwrap();
    assert_eq!(stats.from_seq_no, 0);
    assert_eq!(stats.operations_recovered, 50);
    assert_eq!(stats.local_checkpoint, 49);
    assert_eq!(engine.state(), EngineState::Open);

    assert_eq!(snapshot_docs(&engine, &ids), before);
    let stats_after = engine.seq_no_stats();
    assert_eq!(stats_after.max_seq_no, stats_before.max_seq_no);
    assert_eq!(stats_after.local_checkpoint, stats_before.local_checkpoint);
    assert_eq!(engine.persisted_local_checkpoint(), 49);
}

#[test]
fn test_restart_after_flush_replays_only_tail() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shard");

    let (ids, before) = {
        let engine = Engine::create(&path, EngineConfig::for_testing()).unwrap();
        engine.skip_translog_recovery().unwrap();
        let mut ids = write_workload(&engine, 0..30);
        engine.flush(false).unwrap();
        ids.extend(write_workload(&engine, 30..45));
        ids.sort();
        ids.dedup();
        let before = snapshot_docs(&engine, &ids);
        (ids, before)
    };

    let engine = reopen(&path, EngineConfig::for_testing());
    let stats = engine.recover_from_translog(i64::MAX).unwrap();
    assert_eq!(stats.from_seq_no, 30);
    assert_eq!(stats.operations_recovered, 15);
    assert_eq!(snapshot_docs(&engine, &ids), before);
    invariants::audit(&engine).unwrap();
}

#[test]
fn test_recovery_up_to_bound() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shard");
    {
        let engine = Engine::create(&path, EngineConfig::for_testing()).unwrap();
        engine.skip_translog_recovery().unwrap();
        for i in 0..10 {
            engine
                .index(Index::primary(format!("doc-{i}"), json!({ "i": i })))
                .unwrap();
        }
    }

    let engine = reopen(&path, EngineConfig::for_testing());
    let stats = engine.recover_from_translog(4).unwrap();
    assert_eq!(stats.operations_recovered, 5);
    assert_eq!(stats.local_checkpoint, 4);
    assert!(engine.get("doc-4").unwrap().is_some());
    assert!(engine.get("doc-5").unwrap().is_none());
}

#[test]
fn test_recovery_preserves_gaps_and_noops() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shard");
    {
        let engine = Engine::create(&path, EngineConfig::for_testing()).unwrap();
        engine.skip_translog_recovery().unwrap();
        engine.index(Index::replica("a", json!({}), 0, 1, 1)).unwrap();
        engine.no_op(NoOp::new(1, 1, Origin::Replica, "gap")).unwrap();
        engine.index(Index::replica("d", json!({}), 3, 1, 1)).unwrap();
    }

    let engine = reopen(&path, EngineConfig::for_testing());
    let stats = engine.recover_from_translog(i64::MAX).unwrap();
    assert_eq!(stats.operations_recovered, 3);
    assert_eq!(stats.local_checkpoint, 1);
    assert_eq!(stats.max_seq_no, 3);
    assert!(engine.get("d").unwrap().is_some());
}

#[test]
fn test_recovery_only_once() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::create(temp_dir.path().join("shard"), EngineConfig::for_testing()).unwrap();
    engine.recover_from_translog(i64::MAX).unwrap();

    let err = engine.recover_from_translog(i64::MAX).unwrap_err();
    assert!(matches!(err, Error::IllegalState(_)));
    assert!(engine.skip_translog_recovery().is_err());
    assert_eq!(engine.state(), EngineState::Open);
}

#[test]
fn test_repeated_restarts() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shard");
    {
        let engine = Engine::create(&path, EngineConfig::for_testing()).unwrap();
        engine.skip_translog_recovery().unwrap();
    }

    for round in 0..3 {
        let engine = reopen(&path, EngineConfig::for_testing());
        engine.recover_from_translog(i64::MAX).unwrap();
        engine
            .index(Index::primary(format!("round-{round}"), json!({ "round": round })))
            .unwrap();
        if round == 1 {
            engine.flush(false).unwrap();
        }
    }

    let engine = reopen(&path, EngineConfig::for_testing());
    engine.recover_from_translog(i64::MAX).unwrap();
    for round in 0..3 {
        let got = engine.get(&format!("round-{round}")).unwrap().unwrap();
        assert_eq!(got.seq_no, round);
    }
    assert_eq!(engine.doc_count(), 3);
}

// ============================================================================
// Standard durability
// ============================================================================

#[test]
fn test_standard_mode_background_sync() {
    let temp_dir = TempDir::new().unwrap();
    let config = EngineConfig::for_testing()
        .with_durability("standard")
        .with_sync(10, 1000);
    let engine = Engine::create(temp_dir.path().join("shard"), config).unwrap();
    engine.skip_translog_recovery().unwrap();

    for i in 0..20 {
        engine
            .index(Index::primary(format!("doc-{i}"), json!({ "i": i })))
            .unwrap();
    }
    assert_eq!(engine.seq_no_stats().local_checkpoint, 19);

    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.persisted_local_checkpoint() < 19 {
        assert!(Instant::now() < deadline, "background sync never caught up");
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_standard_mode_restart_after_sync() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shard");
    let config = EngineConfig::for_testing()
        .with_durability("standard")
        .with_sync(60_000, 100_000);

    let before = {
        let engine = Engine::create(&path, config.clone()).unwrap();
        engine.skip_translog_recovery().unwrap();
        for i in 0..10 {
            engine
                .index(Index::primary(format!("doc-{i}"), json!({ "i": i })))
                .unwrap();
        }
        engine.sync_translog().unwrap();
        assert_eq!(engine.persisted_local_checkpoint(), 9);
        engine.get("doc-9").unwrap()
    };

    let engine = reopen(&path, config);
    let stats = engine.recover_from_translog(i64::MAX).unwrap();
    assert_eq!(stats.operations_recovered, 10);
    assert_eq!(engine.get("doc-9").unwrap(), before);
}

#[test]
fn test_replay_in_small_batches_matches_pre_restart_state() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shard");
    let config = EngineConfig::for_testing().with_recovery_batch_ops(7);

    let (ids, before) = {
        let engine = Engine::create(&path, config.clone()).unwrap();
        engine.skip_translog_recovery().unwrap();
        let ids = write_workload(&engine, 0..60);
        (ids.clone(), snapshot_docs(&engine, &ids))
    };

    let engine = reopen(&path, config);
    let stats = engine.recover_from_translog(i64::MAX).unwrap();
    assert_eq!(stats.operations_recovered, 60);
    assert_eq!(stats.batches, 9);
    assert_eq!(stats.local_checkpoint, 59);
    assert_eq!(snapshot_docs(&engine, &ids), before);
    invariants::check_at_most_one_record_per_seq_no(&engine.storage_index().records()).unwrap();
    invariants::audit(&engine).unwrap();
}

// ============================================================================
// Committed seqNos above the local checkpoint
// ============================================================================

#[test]
fn test_committed_seq_no_above_checkpoint_not_refilled() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shard");
    {
        let engine = Engine::create(&path, EngineConfig::for_testing()).unwrap();
        engine.skip_translog_recovery().unwrap();
        engine.index(Index::replica("late", json!({ "n": 1 }), 1, 1, 1)).unwrap();
        engine.flush(true).unwrap();
    }

    let engine = reopen(&path, EngineConfig::for_testing());
    assert_eq!(engine.seq_no_stats().local_checkpoint, -1);
    assert_eq!(engine.seq_no_stats().max_seq_no, 1);
    engine.recover_from_translog(0).unwrap();

    let filled = engine.promote_to_primary(2).unwrap();
    assert_eq!(filled, 1);
    let stats = engine.seq_no_stats();
    assert_eq!(stats.local_checkpoint, 1);
    assert_eq!(stats.max_seq_no, 1);

    let records = engine.storage_index().records();
    let mut seq_nos = records.seq_nos();
    seq_nos.sort_unstable();
    assert_eq!(seq_nos, vec![0, 1]);
    invariants::check_at_most_one_record_per_seq_no(&records).unwrap();
    assert_eq!(engine.get("late").unwrap().unwrap().seq_no, 1);
}

#[test]
fn test_committed_records_skipped_on_full_replay() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("shard");
    {
        let engine = Engine::create(&path, EngineConfig::for_testing()).unwrap();
        engine.skip_translog_recovery().unwrap();
        engine.index(Index::replica("a", json!({}), 0, 1, 1)).unwrap();
        engine.index(Index::replica("c", json!({}), 2, 1, 1)).unwrap();
        engine.index(Index::replica("d", json!({}), 3, 1, 1)).unwrap();
        engine.flush(true).unwrap();
    }

    let engine = reopen(&path, EngineConfig::for_testing());
    let stats = engine.recover_from_translog(i64::MAX).unwrap();
    assert_eq!(stats.from_seq_no, 1);
    assert_eq!(stats.operations_recovered, 0);
    assert_eq!(stats.local_checkpoint, 0);

    assert_eq!(engine.promote_to_primary(2).unwrap(), 1);
    assert_eq!(engine.seq_no_stats().local_checkpoint, 3);
    invariants::check_at_most_one_record_per_seq_no(&engine.storage_index().records()).unwrap();
    invariants::audit(&engine).unwrap();
}
