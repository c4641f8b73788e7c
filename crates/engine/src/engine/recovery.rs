//! Translog recovery, promotion and gap filling.

use super::Engine;
use crate::config::GapFillPolicy;
use crate::state::EngineState;
use seqstore_core::{Error, NoOp, Operation, Origin, PrimaryTerm, Result, SeqNo};
use seqstore_durability::TranslogSnapshot;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::{info, warn};

/// Summary of a local translog replay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryStats {
    /// First seqNo replayed (commit local checkpoint + 1)
    pub from_seq_no: SeqNo,
    /// Upper bound requested
    pub to_seq_no: SeqNo,
    /// Operations applied
    pub operations_recovered: usize,
    /// Operations already reflected and skipped
    pub operations_skipped: usize,
    /// Processed checkpoint after replay
    pub local_checkpoint: SeqNo,
    /// Max seqNo after replay
    pub max_seq_no: SeqNo,
    /// Sorted batches applied
    pub batches: usize,
}

impl Engine {
    /// Replay the local translog above the commit's local checkpoint, up to
    /// `max_seq_no` (`i64::MAX` for everything), then open the engine.
    ///
    /// Only valid in `Recovering`. Corruption fails the engine.
    pub fn recover_from_translog(&self, max_seq_no: SeqNo) -> Result<RecoveryStats> {
        let _recovery = self
            .recovery_lock
            .try_lock()
            .ok_or_else(|| Error::illegal_state("translog recovery already running"))?;
        self.lifecycle.ensure_open()?;
        if self.state() != EngineState::Recovering {
            return Err(Error::illegal_state(format!(
                "translog recovery requires a recovering engine, engine is {}",
                self.state()
            )));
        }

        let start = Instant::now();
        let result = self.replay_translog(max_seq_no);
        let stats = self.check_fatal(result)?;
        let refreshed = self.refresh_internal();
        self.check_fatal(refreshed)?;
        self.lifecycle.transition(EngineState::Open)?;

        info!(
            target: "seqstore::engine",
            from_seq_no = stats.from_seq_no,
            recovered = stats.operations_recovered,
            skipped = stats.operations_skipped,
            batches = stats.batches,
            local_checkpoint = stats.local_checkpoint,
            max_seq_no = stats.max_seq_no,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Translog recovery complete"
        );
        Ok(stats)
    }

    /// Apply the translog range in batches of `recovery_batch_ops`, each
    /// sorted by seqNo.
    ///
    /// The snapshot yields the newest generation first. Sequenced writes
    /// resolve against the stored seqNo of each document, so applying
    /// batches in that order converges to the same live documents as a
    /// fully sorted replay, and memory stays bounded by the batch size.
    fn replay_translog(&self, max_seq_no: SeqNo) -> Result<RecoveryStats> {
        let from_seq_no = self.recovery_start.saturating_add(1);
        let mut stats = RecoveryStats {
            from_seq_no,
            to_seq_no: max_seq_no,
            ..RecoveryStats::default()
        };

        if from_seq_no <= max_seq_no {
            let batch_size = self.config.recovery_batch_ops;
            let mut snapshot = self.translog.new_snapshot(from_seq_no, max_seq_no)?;
            let mut batch = Vec::with_capacity(batch_size.min(snapshot.total_operations() as usize));
            loop {
                let next = snapshot.next_operation()?;
                let done = next.is_none();
                if let Some(op) = next {
                    batch.push(op);
                }
                if batch.len() >= batch_size || (done && !batch.is_empty()) {
                    batch.sort_by_key(Operation::seq_no);
                    for op in batch.drain(..) {
                        self.replay_operation(op, &mut stats)?;
                    }
                    stats.batches += 1;
                }
                if done {
                    break;
                }
            }
        }

        stats.local_checkpoint = self.tracker.processed_checkpoint();
        stats.max_seq_no = self.tracker.max_seq_no();
        Ok(stats)
    }

    fn replay_operation(&self, op: Operation, stats: &mut RecoveryStats) -> Result<()> {
        let seq_no = op.seq_no();
        if self.tracker.has_processed(seq_no) {
            stats.operations_skipped += 1;
            return Ok(());
        }
        match op.with_origin(Origin::LocalTranslogRecovery) {
            Operation::Index(index) => {
                let result = self.index_sequenced(index)?;
                if let Some(failure) = result.failure {
                    warn!(target: "seqstore::engine", seq_no, %failure, "Replayed document rejected");
                }
            }
            Operation::Delete(delete) => {
                self.delete_sequenced(delete)?;
            }
            Operation::NoOp(noop) => {
                self.no_op_inner(noop)?;
            }
        }
        // Everything left in the translog after open was synced.
        self.tracker.mark_seq_no_as_persisted(seq_no);
        stats.operations_recovered += 1;
        Ok(())
    }

    /// Open without replaying the translog (the copy is a peer-recovery
    /// target and will receive operations from the primary).
    pub fn skip_translog_recovery(&self) -> Result<()> {
        let _recovery = self
            .recovery_lock
            .try_lock()
            .ok_or_else(|| Error::illegal_state("translog recovery already running"))?;
        self.lifecycle.transition(EngineState::Open)?;
        info!(target: "seqstore::engine", "Skipped translog recovery");
        Ok(())
    }

    /// Operations with `from_seq_no <= seq_no <= to_seq_no` from the
    /// translog, for peer recovery and change capture.
    ///
    /// # Errors
    ///
    /// `IllegalState` if `from_seq_no` is below the retention floor.
    pub fn new_changes_snapshot(&self, from_seq_no: SeqNo, to_seq_no: SeqNo) -> Result<TranslogSnapshot> {
        self.lifecycle.ensure_open()?;
        let floor = self.retention.min_retained_seq_no();
        if from_seq_no < floor {
            return Err(Error::illegal_state(format!(
                "history below seqNo {} is no longer retained, requested from {}",
                floor, from_seq_no
            )));
        }
        let snapshot = self.translog.new_snapshot(from_seq_no, to_seq_no).map_err(Error::from);
        self.check_fatal(snapshot)
    }

    // ========================================================================
    // Promotion
    // ========================================================================

    /// Become primary for `primary_term`.
    ///
    /// The term must increase. The translog rolls to a generation stamped
    /// with the new term, then gaps are filled per `gap_fill`. Returns the
    /// number of NoOps written.
    pub fn promote_to_primary(&self, primary_term: PrimaryTerm) -> Result<usize> {
        self.lifecycle.ensure_fully_open("promotion")?;
        let current = self.primary_term();
        if primary_term <= current {
            return Err(Error::invalid_input(format!(
                "primary term must increase: current {}, requested {}",
                current, primary_term
            )));
        }

        let result = self
            .translog
            .set_primary_term(primary_term)
            .and_then(|_| self.translog.roll_generation())
            .map_err(Error::from);
        self.check_fatal(result)?;
        self.primary_term.store(primary_term, Ordering::SeqCst);
        info!(target: "seqstore::engine", from = current, to = primary_term, "Promoted to primary");

        match self.config.gap_fill {
            GapFillPolicy::OnPromotion => self.fill_seq_no_gaps(primary_term),
            GapFillPolicy::Never => Ok(0),
        }
    }

    /// Write a NoOp for every seqNo between the processed checkpoint and the
    /// max seqNo that was never processed. Returns how many were written.
    pub fn fill_seq_no_gaps(&self, primary_term: PrimaryTerm) -> Result<usize> {
        self.lifecycle.ensure_fully_open("gap fill")?;
        if primary_term < self.primary_term() {
            return Err(Error::invalid_input(format!(
                "stale primary term {} for gap fill, current is {}",
                primary_term,
                self.primary_term()
            )));
        }

        let max_seq_no = self.tracker.max_seq_no();
        let mut filled = 0;
        let mut seq_no = self.tracker.processed_checkpoint().saturating_add(1);
        while seq_no <= max_seq_no {
            if !self.tracker.has_processed(seq_no) {
                self.no_op(NoOp::new(seq_no, primary_term, Origin::Primary, "filling gaps"))?;
                filled += 1;
            }
            seq_no += 1;
        }
        // Every seqNo up to max is now processed, by a NoOp or by the write
        // that was already in flight for it.
        if self.tracker.wait_until_processed(max_seq_no).is_err() {
            // The tracker only closes when the engine fails or closes.
            self.lifecycle.ensure_open()?;
            return Err(Error::illegal_state("checkpoint tracker closed during gap fill"));
        }
        if filled > 0 {
            let synced = self.translog.sync().map_err(Error::from);
            self.check_fatal(synced)?;
            info!(target: "seqstore::engine", filled, max_seq_no, "Filled seqNo gaps");
        }
        Ok(filled)
    }
}
