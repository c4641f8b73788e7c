//! Local checkpoint tracking
//!
//! The tracker is the single source of seqNos on a primary and the record
//! of which seqNos have been processed (applied to the index) and persisted
//! (fsynced in the translog) on every copy.
//!
//! A checkpoint is the highest N such that every seqNo in `0..=N` has been
//! marked. Marks arrive in any order from many threads; marks above the
//! checkpoint are held in a sparse bitset of 1024-bit blocks and a block is
//! dropped once the checkpoint has moved past it.
//!
//! ## Waiting
//!
//! [`LocalCheckpointTracker::wait_until_processed`] blocks until the
//! processed checkpoint reaches a seqNo. It only returns once every lower
//! seqNo is processed, so callers use it where no gap can remain, such as
//! after gap filling on promotion. Refresh and flush must not wait on the
//! max seqNo (a replica may hold gaps), so the engine tracks its in-flight
//! writes separately for them. Waiters are woken on every checkpoint
//! advance and when the tracker is closed; a closed tracker fails the wait
//! instead of hanging.

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use seqstore_core::{SeqNo, SeqNoStats, NO_OPS_PERFORMED};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Number of seqNos per bitset block
pub const BIT_SET_SIZE: i64 = 1024;

const WORDS_PER_BLOCK: usize = (BIT_SET_SIZE as usize) / 64;

/// Checkpoint tracker errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckpointError {
    /// The tracker was closed while (or before) waiting
    #[error("checkpoint tracker is closed")]
    Closed,

    /// Inconsistent starting point
    #[error("invalid initial state: max_seq_no={max_seq_no}, local_checkpoint={local_checkpoint}")]
    InvalidInitialState {
        /// Supplied max seqNo
        max_seq_no: SeqNo,
        /// Supplied local checkpoint
        local_checkpoint: SeqNo,
    },
}

// ============================================================================
// Sparse bitset
// ============================================================================

#[derive(Default)]
struct SeqNoBitSet {
    blocks: FxHashMap<i64, Box<[u64; WORDS_PER_BLOCK]>>,
}

impl SeqNoBitSet {
    fn split(seq_no: SeqNo) -> (i64, usize, u64) {
        let block = seq_no / BIT_SET_SIZE;
        let bit = (seq_no % BIT_SET_SIZE) as usize;
        (block, bit / 64, 1u64 << (bit % 64))
    }

    fn set(&mut self, seq_no: SeqNo) {
        let (block, word, mask) = Self::split(seq_no);
        let words = self
            .blocks
            .entry(block)
            .or_insert_with(|| Box::new([0u64; WORDS_PER_BLOCK]));
        words[word] |= mask;
    }

    fn get(&self, seq_no: SeqNo) -> bool {
        let (block, word, mask) = Self::split(seq_no);
        self.blocks
            .get(&block)
            .map(|words| words[word] & mask != 0)
            .unwrap_or(false)
    }

    /// Drop every block that lies entirely below `seq_no`.
    fn drop_below(&mut self, seq_no: SeqNo) {
        let keep_from = seq_no / BIT_SET_SIZE;
        self.blocks.retain(|block, _| *block >= keep_from);
    }

    fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

struct Checkpoint {
    checkpoint: SeqNo,
    pending: SeqNoBitSet,
}

impl Checkpoint {
    fn new(checkpoint: SeqNo) -> Self {
        Checkpoint {
            checkpoint,
            pending: SeqNoBitSet::default(),
        }
    }

    fn contains(&self, seq_no: SeqNo) -> bool {
        seq_no <= self.checkpoint || self.pending.get(seq_no)
    }

    /// Mark `seq_no`; returns true if the checkpoint advanced.
    fn mark(&mut self, seq_no: SeqNo) -> bool {
        if seq_no <= self.checkpoint {
            return false;
        }
        self.pending.set(seq_no);
        if seq_no != self.checkpoint + 1 {
            return false;
        }
        while self.pending.get(self.checkpoint + 1) {
            self.checkpoint += 1;
        }
        self.pending.drop_below(self.checkpoint + 1);
        true
    }
}

// ============================================================================
// LocalCheckpointTracker
// ============================================================================

/// Tracks seqNo generation and the processed / persisted checkpoints of a shard
pub struct LocalCheckpointTracker {
    /// Next seqNo to hand out; `max_seq_no == next_seq_no - 1`
    next_seq_no: AtomicI64,
    processed: Mutex<Checkpoint>,
    persisted: Mutex<Checkpoint>,
    processed_advanced: Condvar,
    closed: AtomicBool,
}

impl LocalCheckpointTracker {
    /// Create a tracker resuming from a commit.
    ///
    /// # Arguments
    /// * `max_seq_no` - Highest seqNo known to exist (`NO_OPS_PERFORMED` for a new shard)
    /// * `local_checkpoint` - Checkpoint recorded in the commit
    ///
    /// # Errors
    /// Returns `InvalidInitialState` if either value is below `NO_OPS_PERFORMED`
    /// or the checkpoint exceeds the max seqNo.
    pub fn new(max_seq_no: SeqNo, local_checkpoint: SeqNo) -> Result<Self, CheckpointError> {
        if max_seq_no < NO_OPS_PERFORMED
            || local_checkpoint < NO_OPS_PERFORMED
            || local_checkpoint > max_seq_no
        {
            return Err(CheckpointError::InvalidInitialState {
                max_seq_no,
                local_checkpoint,
            });
        }
        Ok(LocalCheckpointTracker {
            next_seq_no: AtomicI64::new(max_seq_no + 1),
            processed: Mutex::new(Checkpoint::new(local_checkpoint)),
            persisted: Mutex::new(Checkpoint::new(local_checkpoint)),
            processed_advanced: Condvar::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Hand out the next seqNo. Primary only; never blocks, never reuses.
    pub fn generate_seq_no(&self) -> SeqNo {
        self.next_seq_no.fetch_add(1, Ordering::SeqCst)
    }

    /// Move the seqNo counter past a seqNo assigned elsewhere.
    pub fn advance_max_seq_no(&self, seq_no: SeqNo) {
        self.next_seq_no.fetch_max(seq_no + 1, Ordering::SeqCst);
    }

    /// Highest seqNo generated or seen.
    pub fn max_seq_no(&self) -> SeqNo {
        self.next_seq_no.load(Ordering::SeqCst) - 1
    }

    /// Record that `seq_no` has been applied to the index.
    ///
    /// Idempotent; marks may arrive in any order.
    pub fn mark_seq_no_as_processed(&self, seq_no: SeqNo) {
        self.advance_max_seq_no(seq_no);
        let advanced = self.processed.lock().mark(seq_no);
        if advanced {
            self.processed_advanced.notify_all();
        }
    }

    /// Record that `seq_no` is durable in the translog.
    pub fn mark_seq_no_as_persisted(&self, seq_no: SeqNo) {
        self.advance_max_seq_no(seq_no);
        self.persisted.lock().mark(seq_no);
    }

    /// Highest N with every seqNo in `0..=N` processed.
    pub fn processed_checkpoint(&self) -> SeqNo {
        self.processed.lock().checkpoint
    }

    /// Highest N with every seqNo in `0..=N` persisted.
    pub fn persisted_checkpoint(&self) -> SeqNo {
        self.persisted.lock().checkpoint
    }

    /// True if `seq_no` has been marked processed.
    pub fn has_processed(&self, seq_no: SeqNo) -> bool {
        if seq_no >= self.next_seq_no.load(Ordering::SeqCst) {
            return false;
        }
        self.processed.lock().contains(seq_no)
    }

    /// Block until the processed checkpoint reaches `seq_no`.
    ///
    /// # Errors
    /// Returns `CheckpointError::Closed` if the tracker is or becomes closed.
    pub fn wait_until_processed(&self, seq_no: SeqNo) -> Result<(), CheckpointError> {
        let mut state = self.processed.lock();
        while state.checkpoint < seq_no {
            if self.closed.load(Ordering::SeqCst) {
                return Err(CheckpointError::Closed);
            }
            self.processed_advanced.wait(&mut state);
        }
        Ok(())
    }

    /// Like [`wait_until_processed`](Self::wait_until_processed) with a deadline.
    ///
    /// Returns `Ok(false)` if the timeout elapsed first.
    pub fn wait_until_processed_for(&self, seq_no: SeqNo, timeout: Duration) -> Result<bool, CheckpointError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.processed.lock();
        while state.checkpoint < seq_no {
            if self.closed.load(Ordering::SeqCst) {
                return Err(CheckpointError::Closed);
            }
            if self
                .processed_advanced
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return Ok(state.checkpoint >= seq_no);
            }
        }
        Ok(true)
    }

    /// Wake every waiter with an error; later waits fail immediately.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Taking the lock orders the flag store before any waiter re-checks it.
        let _state = self.processed.lock();
        self.processed_advanced.notify_all();
        tracing::debug!(target: "seqstore::checkpoint", "checkpoint tracker closed");
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Snapshot of max seqNo and processed checkpoint, with the caller's global checkpoint.
    pub fn stats(&self, global_checkpoint: SeqNo) -> SeqNoStats {
        SeqNoStats {
            max_seq_no: self.max_seq_no(),
            local_checkpoint: self.processed_checkpoint(),
            global_checkpoint,
        }
    }

    /// Number of bitset blocks held above the processed checkpoint.
    pub fn pending_blocks(&self) -> usize {
        self.processed.lock().pending.block_count()
    }
}

impl std::fmt::Debug for LocalCheckpointTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCheckpointTracker")
            .field("max_seq_no", &self.max_seq_no())
            .field("processed_checkpoint", &self.processed_checkpoint())
            .field("persisted_checkpoint", &self.persisted_checkpoint())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn empty() -> LocalCheckpointTracker {
        LocalCheckpointTracker::new(NO_OPS_PERFORMED, NO_OPS_PERFORMED).unwrap()
    }

    #[test]
    fn test_new_rejects_inconsistent_state() {
        assert!(LocalCheckpointTracker::new(-3, -1).is_err());
        assert!(LocalCheckpointTracker::new(5, 6).is_err());
        assert!(LocalCheckpointTracker::new(5, 3).is_ok());
    }

    #[test]
    fn test_generate_is_sequential() {
        let tracker = empty();
        assert_eq!(tracker.generate_seq_no(), 0);
        assert_eq!(tracker.generate_seq_no(), 1);
        assert_eq!(tracker.max_seq_no(), 1);
        assert_eq!(tracker.processed_checkpoint(), NO_OPS_PERFORMED);
    }

    #[test]
    fn test_resume_from_commit() {
        let tracker = LocalCheckpointTracker::new(10, 7).unwrap();
        assert_eq!(tracker.generate_seq_no(), 11);
        assert_eq!(tracker.processed_checkpoint(), 7);
        assert!(tracker.has_processed(7));
        assert!(!tracker.has_processed(8));
    }

    #[test]
    fn test_out_of_order_marks() {
        let tracker = empty();
        tracker.mark_seq_no_as_processed(2);
        tracker.mark_seq_no_as_processed(1);
        assert_eq!(tracker.processed_checkpoint(), NO_OPS_PERFORMED);
        assert!(tracker.has_processed(2));
        tracker.mark_seq_no_as_processed(0);
        assert_eq!(tracker.processed_checkpoint(), 2);
        assert_eq!(tracker.max_seq_no(), 2);
    }

    #[test]
    fn test_marks_are_idempotent() {
        let tracker = empty();
        tracker.mark_seq_no_as_processed(0);
        tracker.mark_seq_no_as_processed(0);
        tracker.mark_seq_no_as_processed(1);
        assert_eq!(tracker.processed_checkpoint(), 1);
    }

    #[test]
    fn test_processed_and_persisted_are_independent() {
        let tracker = empty();
        tracker.mark_seq_no_as_processed(0);
        assert_eq!(tracker.persisted_checkpoint(), NO_OPS_PERFORMED);
        tracker.mark_seq_no_as_persisted(0);
        assert_eq!(tracker.persisted_checkpoint(), 0);
    }

    #[test]
    fn test_advance_max_seq_no_skips_counter() {
        let tracker = empty();
        tracker.advance_max_seq_no(41);
        assert_eq!(tracker.generate_seq_no(), 42);
        tracker.advance_max_seq_no(3);
        assert_eq!(tracker.max_seq_no(), 42);
    }

    #[test]
    fn test_blocks_dropped_behind_checkpoint() {
        let tracker = empty();
        let end = BIT_SET_SIZE * 3;
        for seq_no in (0..end).rev() {
            tracker.mark_seq_no_as_processed(seq_no);
        }
        assert_eq!(tracker.processed_checkpoint(), end - 1);
        assert!(tracker.pending_blocks() <= 1);
        assert!(tracker.has_processed(5));
    }

    #[test]
    fn test_wait_until_processed_wakes() {
        let tracker = Arc::new(empty());
        let waiter = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || tracker.wait_until_processed(1))
        };
        tracker.mark_seq_no_as_processed(1);
        tracker.mark_seq_no_as_processed(0);
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }

    #[test]
    fn test_wait_fails_on_close() {
        let tracker = Arc::new(empty());
        let waiter = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || tracker.wait_until_processed(5))
        };
        thread::sleep(Duration::from_millis(20));
        tracker.close();
        assert_eq!(waiter.join().unwrap(), Err(CheckpointError::Closed));
        assert_eq!(tracker.wait_until_processed(3), Err(CheckpointError::Closed));
    }

    #[test]
    fn test_wait_for_times_out() {
        let tracker = empty();
        let reached = tracker
            .wait_until_processed_for(0, Duration::from_millis(10))
            .unwrap();
        assert!(!reached);
        tracker.mark_seq_no_as_processed(0);
        assert!(tracker
            .wait_until_processed_for(0, Duration::from_millis(10))
            .unwrap());
    }

    #[test]
    fn test_stats() {
        let tracker = empty();
        tracker.mark_seq_no_as_processed(0);
        tracker.mark_seq_no_as_processed(3);
        let stats = tracker.stats(-1);
        assert_eq!(stats.max_seq_no, 3);
        assert_eq!(stats.local_checkpoint, 0);
        assert_eq!(stats.global_checkpoint, -1);
    }
}
