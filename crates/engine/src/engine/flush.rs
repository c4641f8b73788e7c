//! Refresh, flush and history retention.
//!
//! # Flush
//!
//! 1. Refresh (waits for operations admitted before the call)
//! 2. Prune index tombstones below the retention floor
//! 3. Roll the translog generation
//! 4. Commit the index; user data is computed after the state is captured
//! 5. Recompute the safe commit and delete unreferenced older commits
//! 6. Sync the translog and prune generations no longer required

use super::Engine;
use crate::commit_policy::{
    CommitInfo, CommitRef, HISTORY_UUID_KEY, LOCAL_CHECKPOINT_KEY, MAX_SEQ_NO_KEY,
    MIN_RETAINED_SEQ_NO_KEY, TRANSLOG_GENERATION_KEY,
};
use crate::retention::{HistoryRetentionLock, RecoveryRetention, RetentionLease};
use seqstore_core::{now_micros, Error, Result, SeqNo};
use seqstore_durability::TranslogError;
use seqstore_storage::UserData;
use std::sync::atomic::Ordering;
use tracing::{debug, info};

impl Engine {
    // ========================================================================
    // Refresh
    // ========================================================================

    /// Make every write admitted before this call visible to searches.
    pub fn refresh(&self) -> Result<()> {
        self.lifecycle.ensure_open()?;
        let result = self.refresh_internal();
        self.check_fatal(result)
    }

    pub(crate) fn refresh_internal(&self) -> Result<()> {
        let _refresh = self.refresh_lock.lock();
        self.inflight.wait_for_admitted();
        self.version_map.before_refresh();
        self.index.refresh()?;
        self.version_map.after_refresh();

        let gc_before = now_micros().saturating_sub(self.config.gc_deletes_ms.saturating_mul(1000));
        self.version_map
            .prune_tombstones(gc_before, self.tracker.processed_checkpoint());
        Ok(())
    }

    // ========================================================================
    // Flush
    // ========================================================================

    /// Durably commit the index and trim history no longer needed.
    ///
    /// Returns `None` if nothing changed since the last commit and `force`
    /// is false.
    pub fn flush(&self, force: bool) -> Result<Option<CommitInfo>> {
        self.lifecycle.ensure_fully_open("flush")?;
        let result = self.flush_inner(force);
        self.check_fatal(result)
    }

    fn flush_inner(&self, force: bool) -> Result<Option<CommitInfo>> {
        let _flush = self.flush_lock.lock();
        self.refresh_internal()?;

        let local_checkpoint = self.tracker.processed_checkpoint();
        if !force && !self.has_unflushed_changes(local_checkpoint) {
            debug!(target: "seqstore::engine", "Flush skipped, nothing changed");
            self.sync_translog_inner()?;
            return Ok(None);
        }

        let floor = self.update_retention_floor();
        self.index.prune_tombstones(floor);

        let translog_generation = self.translog.roll_generation()?;
        let point = self.index.commit(&|| {
            let mut user_data = UserData::new();
            user_data.insert(MAX_SEQ_NO_KEY.into(), self.tracker.max_seq_no().to_string());
            user_data.insert(LOCAL_CHECKPOINT_KEY.into(), local_checkpoint.to_string());
            user_data.insert(HISTORY_UUID_KEY.into(), self.history_uuid.clone());
            user_data.insert(MIN_RETAINED_SEQ_NO_KEY.into(), floor.to_string());
            user_data.insert(TRANSLOG_GENERATION_KEY.into(), translog_generation.to_string());
            user_data
        })?;
        self.committed_translog_generation
            .store(translog_generation, Ordering::SeqCst);

        self.translog.sync()?;
        self.revisit_commits()?;
        self.prune_translog()?;

        let info = CommitInfo::from(&point);
        info!(
            target: "seqstore::engine",
            generation = info.generation,
            max_seq_no = info.max_seq_no,
            local_checkpoint = info.local_checkpoint,
            min_retained_seq_no = info.min_retained_seq_no,
            translog_generation,
            docs = info.doc_count,
            "Flushed"
        );
        Ok(Some(info))
    }

    fn has_unflushed_changes(&self, local_checkpoint: SeqNo) -> bool {
        if self.index.has_uncommitted_changes() {
            return true;
        }
        match self.commit_policy.last_commit() {
            Some(last) => {
                let last = CommitInfo::from(&last);
                last.local_checkpoint != local_checkpoint
                    || last.max_seq_no != self.tracker.max_seq_no()
            }
            None => true,
        }
    }

    /// True once the uncommitted part of the translog exceeds `flush_threshold_bytes`.
    pub fn should_periodically_flush(&self) -> bool {
        self.translog_stats().uncommitted_size_in_bytes > self.config.flush_threshold_bytes
    }

    /// Flush if `should_periodically_flush`.
    pub fn maybe_flush(&self) -> Result<Option<CommitInfo>> {
        if self.should_periodically_flush() {
            self.flush(false)
        } else {
            Ok(None)
        }
    }

    // ========================================================================
    // Translog / global checkpoint
    // ========================================================================

    /// Record a new global checkpoint; lower values are ignored.
    pub fn update_global_checkpoint(&self, global_checkpoint: SeqNo) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.translog.update_global_checkpoint(global_checkpoint);
        Ok(())
    }

    /// Fsync the translog, persisting the global checkpoint, and release
    /// commits the new checkpoint makes obsolete.
    pub fn sync_translog(&self) -> Result<()> {
        self.lifecycle.ensure_open()?;
        let result = self.sync_translog_inner();
        self.check_fatal(result)
    }

    fn sync_translog_inner(&self) -> Result<()> {
        self.translog.sync()?;
        if self.state() == crate::EngineState::Open {
            self.revisit_commits()?;
        }
        Ok(())
    }

    fn revisit_commits(&self) -> Result<()> {
        let global_checkpoint = self.translog.last_synced_global_checkpoint();
        let deletable = self
            .commit_policy
            .on_commits(self.index.list_commits(), global_checkpoint);
        for generation in deletable {
            self.index.delete_commit(generation)?;
        }
        self.update_retention_floor();
        Ok(())
    }

    fn update_retention_floor(&self) -> SeqNo {
        self.retention.update(
            self.translog.last_synced_global_checkpoint(),
            self.commit_policy.safe_commit_checkpoint(),
        )
    }

    /// Drop translog generations holding only operations below both the
    /// safe commit and the retention floor.
    fn prune_translog(&self) -> Result<()> {
        let floor = self.retention.min_retained_seq_no();
        let safe = self.commit_policy.safe_commit_checkpoint().saturating_add(1);
        let min_required = floor.min(safe);
        let min_generation = self.translog.min_generation_for_seq_no(min_required);
        match self.translog.prune_generations(min_generation, min_required) {
            Ok(pruned) => {
                if pruned > 0 {
                    debug!(target: "seqstore::translog", pruned, min_generation, min_required, "Pruned translog");
                }
                Ok(())
            }
            Err(e @ TranslogError::RequiredOperationsDropped { .. }) => {
                Err(Error::invariant(e.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Commits
    // ========================================================================

    /// Reference the safe commit: the newest commit whose local checkpoint
    /// is at or below the persisted global checkpoint.
    pub fn acquire_safe_commit(&self) -> Result<CommitRef> {
        self.lifecycle.ensure_open()?;
        self.commit_policy.acquire_safe_commit()
    }

    /// Reference the newest commit.
    pub fn acquire_last_commit(&self) -> Result<CommitRef> {
        self.lifecycle.ensure_open()?;
        self.commit_policy.acquire_last_commit()
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Lowest seqNo whose history is still retained.
    pub fn min_retained_seq_no(&self) -> SeqNo {
        self.retention.min_retained_seq_no()
    }

    /// Retain history from `retaining_seq_no` for the lease holder.
    pub fn add_retention_lease(&self, id: &str, retaining_seq_no: SeqNo, source: &str) -> Result<RetentionLease> {
        self.lifecycle.ensure_open()?;
        self.retention.add_lease(id, retaining_seq_no, source)
    }

    /// Move a lease forward.
    pub fn renew_retention_lease(&self, id: &str, retaining_seq_no: SeqNo) -> Result<RetentionLease> {
        self.lifecycle.ensure_open()?;
        self.retention.renew_lease(id, retaining_seq_no)
    }

    /// Drop a lease.
    pub fn remove_retention_lease(&self, id: &str) -> Result<()> {
        self.lifecycle.ensure_open()?;
        self.retention.remove_lease(id)
    }

    /// All retention leases.
    pub fn retention_leases(&self) -> Vec<RetentionLease> {
        self.retention.leases()
    }

    /// Freeze the retention floor while the lock is held.
    pub fn acquire_history_retention_lock(&self) -> Result<HistoryRetentionLock> {
        self.lifecycle.ensure_open()?;
        Ok(self.retention.acquire_lock())
    }

    /// Keep history from `from_seq_no` while a peer recovery runs.
    pub fn start_recovery_retention(&self, from_seq_no: SeqNo) -> Result<RecoveryRetention> {
        self.lifecycle.ensure_open()?;
        self.retention.start_recovery(from_seq_no)
    }

    // ========================================================================
    // Mapping
    // ========================================================================

    /// Add fields to the mapping; returns how many were new.
    pub fn update_mapping(&self, fields: &[String]) -> Result<usize> {
        self.lifecycle.ensure_open()?;
        let result = self.index.update_mapping(fields).map_err(Error::from);
        self.check_fatal(result)
    }
}
