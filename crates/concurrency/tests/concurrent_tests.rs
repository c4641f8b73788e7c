//! Concurrent/Multi-threaded Tests for seqstore-concurrency
//!
//! These tests exercise the tracker and version map under real thread
//! interleavings:
//!
//! 1. **Unique seqNos** - concurrent generation never hands out a seqNo twice
//! 2. **Checkpoint convergence** - out-of-order marks from many threads close every gap
//! 3. **Waiters** - refresh-style waiters wake once their target is processed
//! 4. **Per-id linearisation** - version map read-modify-write under the id lock
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test concurrent_tests
//! ```

use proptest::prelude::*;
use rand::seq::SliceRandom;
use seqstore_concurrency::{LiveVersionMap, LocalCheckpointTracker, VersionValue};
use seqstore_core::NO_OPS_PERFORMED;
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

// ============================================================================
// Test Helpers
// ============================================================================

fn new_tracker() -> Arc<LocalCheckpointTracker> {
    Arc::new(LocalCheckpointTracker::new(NO_OPS_PERFORMED, NO_OPS_PERFORMED).unwrap())
}

// ============================================================================
// SECTION 1: SeqNo generation
// ============================================================================

mod generation {
    use super::*;

    #[test]
    fn test_concurrent_generation_is_unique_and_dense() {
        let tracker = new_tracker();
        let threads = 8;
        let per_thread = 500;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    (0..per_thread)
                        .map(|_| tracker.generate_seq_no())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for seq_no in handle.join().unwrap() {
                assert!(seen.insert(seq_no), "seq_no {} handed out twice", seq_no);
            }
        }
        let total = (threads * per_thread) as i64;
        assert_eq!(seen.len() as i64, total);
        assert_eq!(tracker.max_seq_no(), total - 1);
        assert!((0..total).all(|s| seen.contains(&s)));
    }
}

// ============================================================================
// SECTION 2: Checkpoint convergence
// ============================================================================

mod convergence {
    use super::*;

    #[test]
    fn test_generate_then_mark_from_many_threads() {
        let tracker = new_tracker();
        let threads = 6;
        let per_thread = 400;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..per_thread {
                        let seq_no = tracker.generate_seq_no();
                        tracker.mark_seq_no_as_processed(seq_no);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let total = (threads * per_thread) as i64;
        assert_eq!(tracker.processed_checkpoint(), total - 1);
        assert!(tracker.pending_blocks() <= 1);
    }

    #[test]
    fn test_replica_marks_in_random_order() {
        let tracker = new_tracker();
        let mut seq_nos: Vec<i64> = (0..5_000).collect();
        seq_nos.shuffle(&mut rand::thread_rng());
        let chunks: Vec<Vec<i64>> = seq_nos.chunks(1_250).map(|c| c.to_vec()).collect();

        let handles: Vec<_> = chunks
            .into_iter()
            .map(|chunk| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    for seq_no in chunk {
                        tracker.advance_max_seq_no(seq_no);
                        tracker.mark_seq_no_as_processed(seq_no);
                        tracker.mark_seq_no_as_persisted(seq_no);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.processed_checkpoint(), 4_999);
        assert_eq!(tracker.persisted_checkpoint(), 4_999);
        assert_eq!(tracker.max_seq_no(), 4_999);
    }
}

// ============================================================================
// SECTION 3: Waiters
// ============================================================================

mod waiters {
    use super::*;

    #[test]
    fn test_many_waiters_released_by_one_mark() {
        let tracker = new_tracker();
        for seq_no in 1..=10 {
            tracker.mark_seq_no_as_processed(seq_no);
        }

        let waiters: Vec<_> = (0..4)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || tracker.wait_until_processed(i * 3))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(tracker.processed_checkpoint(), NO_OPS_PERFORMED);
        tracker.mark_seq_no_as_processed(0);

        for waiter in waiters {
            assert!(waiter.join().unwrap().is_ok());
        }
        assert_eq!(tracker.processed_checkpoint(), 10);
    }

    #[test]
    fn test_close_releases_blocked_waiters() {
        let tracker = new_tracker();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || tracker.wait_until_processed(100))
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        tracker.close();

        for waiter in waiters {
            assert!(waiter.join().unwrap().is_err());
        }
    }
}

// ============================================================================
// SECTION 4: Version map
// ============================================================================

mod version_map {
    use super::*;

    #[test]
    fn test_read_modify_write_under_lock_is_linear() {
        let map = Arc::new(LiveVersionMap::new());
        let tracker = new_tracker();
        let threads = 8;
        let per_thread = 100;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let map = Arc::clone(&map);
                let tracker = Arc::clone(&tracker);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..per_thread {
                        let guard = map.acquire_lock("hot");
                        let current = map.get_under_lock("hot", &guard).map(|v| v.version).unwrap_or(0);
                        let seq_no = tracker.generate_seq_no();
                        map.put_index_under_lock("hot", VersionValue::index(current + 1, seq_no, 1, None), &guard);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let guard = map.acquire_lock("hot");
        let value = map.get_under_lock("hot", &guard).unwrap();
        assert_eq!(value.version, (threads * per_thread) as i64);
    }
}

// ============================================================================
// SECTION 5: Properties
// ============================================================================

proptest! {
    /// Any permutation of marks over 0..n ends at checkpoint n - 1.
    #[test]
    fn prop_any_mark_order_reaches_checkpoint(
        order in (1usize..3_000).prop_flat_map(|n| Just((0..n as i64).collect::<Vec<_>>()).prop_shuffle())
    ) {
        let tracker = LocalCheckpointTracker::new(NO_OPS_PERFORMED, NO_OPS_PERFORMED).unwrap();
        let n = order.len() as i64;
        for seq_no in &order {
            tracker.mark_seq_no_as_processed(*seq_no);
        }
        prop_assert_eq!(tracker.processed_checkpoint(), n - 1);
        prop_assert_eq!(tracker.max_seq_no(), n - 1);
    }

    /// With one seqNo withheld the checkpoint stops right below it.
    #[test]
    fn prop_gap_holds_checkpoint(n in 2i64..2_000, gap_seed in any::<prop::sample::Index>()) {
        let gap = gap_seed.index(n as usize) as i64;
        let tracker = LocalCheckpointTracker::new(NO_OPS_PERFORMED, NO_OPS_PERFORMED).unwrap();
        for seq_no in (0..n).rev().filter(|s| *s != gap) {
            tracker.mark_seq_no_as_processed(seq_no);
        }
        prop_assert_eq!(tracker.processed_checkpoint(), gap - 1);
        prop_assert!(!tracker.has_processed(gap));
        tracker.mark_seq_no_as_processed(gap);
        prop_assert_eq!(tracker.processed_checkpoint(), n - 1);
    }
}
