//! History retention
//!
//! The retention floor is the lowest seqNo whose history (translog
//! operations and index tombstones) must be kept:
//!
//! ```text
//! floor = min(global_checkpoint + 1 - retention_operations,
//!             safe_commit_local_checkpoint + 1,
//!             min lease retaining_seq_no,
//!             min in-progress recovery start)
//! ```
//!
//! The floor only moves forward, and does not move at all while a
//! [`HistoryRetentionLock`] is held.

use parking_lot::Mutex;
use seqstore_core::{now_micros, Error, Result, SeqNo};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// A peer's claim on history at and above `retaining_seq_no`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionLease {
    /// Lease id, unique per shard
    pub id: String,
    /// Lowest seqNo the holder still needs
    pub retaining_seq_no: SeqNo,
    /// Last add or renew, microseconds since epoch
    pub timestamp_micros: u64,
    /// Free-form origin of the lease
    pub source: String,
}

struct RetentionState {
    floor: SeqNo,
    leases: BTreeMap<String, RetentionLease>,
    recoveries: BTreeMap<u64, SeqNo>,
    next_recovery: u64,
    locks: usize,
}

/// Tracks leases and computes the retention floor
pub struct RetentionPolicy {
    retention_operations: u64,
    state: Arc<Mutex<RetentionState>>,
}

impl RetentionPolicy {
    /// Policy starting at `initial_floor` (from the last commit).
    pub fn new(initial_floor: SeqNo, retention_operations: u64) -> Self {
        RetentionPolicy {
            retention_operations,
            state: Arc::new(Mutex::new(RetentionState {
                floor: initial_floor.max(0),
                leases: BTreeMap::new(),
                recoveries: BTreeMap::new(),
                next_recovery: 0,
                locks: 0,
            })),
        }
    }

    /// Current floor.
    pub fn min_retained_seq_no(&self) -> SeqNo {
        self.state.lock().floor
    }

    /// Recompute the floor from the persisted global checkpoint and the safe
    /// commit's local checkpoint. Returns the (possibly unchanged) floor.
    pub fn update(&self, global_checkpoint: SeqNo, safe_commit_checkpoint: SeqNo) -> SeqNo {
        let mut state = self.state.lock();
        if state.locks > 0 {
            debug!(target: "seqstore::retention", floor = state.floor, "Floor frozen by retention lock");
            return state.floor;
        }

        let by_operations = global_checkpoint
            .saturating_add(1)
            .saturating_sub(self.retention_operations as i64);
        let candidate = [
            Some(by_operations),
            Some(safe_commit_checkpoint.saturating_add(1)),
            state.leases.values().map(|l| l.retaining_seq_no).min(),
            state.recoveries.values().copied().min(),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(state.floor);

        if candidate > state.floor {
            debug!(
                target: "seqstore::retention",
                from = state.floor,
                to = candidate,
                "Retention floor advanced"
            );
            state.floor = candidate;
        }
        state.floor
    }

    // ========================================================================
    // Leases
    // ========================================================================

    /// Add a new lease.
    pub fn add_lease(&self, id: &str, retaining_seq_no: SeqNo, source: &str) -> Result<RetentionLease> {
        let mut state = self.state.lock();
        if state.leases.contains_key(id) {
            return Err(Error::RetentionLease(format!("lease [{}] already exists", id)));
        }
        if retaining_seq_no < state.floor {
            return Err(Error::RetentionLease(format!(
                "lease [{}] cannot retain from {}, history below {} is gone",
                id, retaining_seq_no, state.floor
            )));
        }
        let lease = RetentionLease {
            id: id.to_string(),
            retaining_seq_no,
            timestamp_micros: now_micros(),
            source: source.to_string(),
        };
        state.leases.insert(id.to_string(), lease.clone());
        info!(target: "seqstore::retention", id, retaining_seq_no, source, "Added retention lease");
        Ok(lease)
    }

    /// Move a lease forward.
    pub fn renew_lease(&self, id: &str, retaining_seq_no: SeqNo) -> Result<RetentionLease> {
        let mut state = self.state.lock();
        let lease = state
            .leases
            .get_mut(id)
            .ok_or_else(|| Error::RetentionLease(format!("lease [{}] not found", id)))?;
        if retaining_seq_no < lease.retaining_seq_no {
            return Err(Error::RetentionLease(format!(
                "lease [{}] cannot move back from {} to {}",
                id, lease.retaining_seq_no, retaining_seq_no
            )));
        }
        lease.retaining_seq_no = retaining_seq_no;
        lease.timestamp_micros = now_micros();
        Ok(lease.clone())
    }

    /// Drop a lease.
    pub fn remove_lease(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.leases.remove(id).is_none() {
            return Err(Error::RetentionLease(format!("lease [{}] not found", id)));
        }
        info!(target: "seqstore::retention", id, "Removed retention lease");
        Ok(())
    }

    /// All leases, ordered by id.
    pub fn leases(&self) -> Vec<RetentionLease> {
        self.state.lock().leases.values().cloned().collect()
    }

    // ========================================================================
    // Guards
    // ========================================================================

    /// Freeze the floor until the returned lock is dropped.
    pub fn acquire_lock(&self) -> HistoryRetentionLock {
        self.state.lock().locks += 1;
        HistoryRetentionLock {
            state: Arc::clone(&self.state),
        }
    }

    /// Keep history from `from_seq_no` while a recovery runs.
    ///
    /// # Errors
    ///
    /// `IllegalState` if history below the floor is already gone.
    pub fn start_recovery(&self, from_seq_no: SeqNo) -> Result<RecoveryRetention> {
        let mut state = self.state.lock();
        if from_seq_no < state.floor {
            return Err(Error::illegal_state(format!(
                "cannot recover from seqNo {}, history below {} is no longer retained",
                from_seq_no, state.floor
            )));
        }
        let id = state.next_recovery;
        state.next_recovery += 1;
        state.recoveries.insert(id, from_seq_no);
        Ok(RecoveryRetention {
            id,
            state: Arc::clone(&self.state),
        })
    }
}

/// Holds the retention floor in place while alive
#[must_use = "the floor is only frozen while the lock is held"]
pub struct HistoryRetentionLock {
    state: Arc<Mutex<RetentionState>>,
}

impl Drop for HistoryRetentionLock {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.locks = state.locks.saturating_sub(1);
    }
}

/// Bounds the floor by an in-progress recovery's start seqNo while alive
#[must_use = "history is only retained while the guard is held"]
pub struct RecoveryRetention {
    id: u64,
    state: Arc<Mutex<RetentionState>>,
}

impl Drop for RecoveryRetention {
    fn drop(&mut self) {
        self.state.lock().recoveries.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_follows_global_checkpoint_and_safe_commit() {
        let policy = RetentionPolicy::new(0, 0);
        assert_eq!(policy.update(10, 20), 11);
        assert_eq!(policy.update(30, 20), 21);
    }

    #[test]
    fn test_retention_operations_keep_history() {
        let policy = RetentionPolicy::new(0, 5);
        assert_eq!(policy.update(10, 100), 6);
    }

    #[test]
    fn test_floor_never_moves_back() {
        let policy = RetentionPolicy::new(0, 0);
        assert_eq!(policy.update(10, 10), 11);
        assert_eq!(policy.update(5, 5), 11);
        policy.add_lease("peer", 11, "test").unwrap();
        assert_eq!(policy.update(20, 20), 11);
    }

    #[test]
    fn test_guards_below_floor_rejected() {
        let policy = RetentionPolicy::new(0, 0);
        assert_eq!(policy.update(10, 10), 11);

        assert!(matches!(policy.add_lease("peer", 3, "replica"), Err(Error::RetentionLease(_))));
        assert!(policy.leases().is_empty());
        assert!(matches!(policy.start_recovery(10), Err(Error::IllegalState(_))));

        let recovery = policy.start_recovery(11).unwrap();
        assert_eq!(policy.update(40, 40), 11);
        drop(recovery);
        assert_eq!(policy.update(40, 40), 41);
    }

    #[test]
    fn test_lease_bounds_floor() {
        let policy = RetentionPolicy::new(0, 0);
        policy.add_lease("peer", 4, "replica").unwrap();
        assert_eq!(policy.update(10, 10), 4);
        policy.renew_lease("peer", 8).unwrap();
        assert_eq!(policy.update(10, 10), 8);
        policy.remove_lease("peer").unwrap();
        assert_eq!(policy.update(10, 10), 11);
    }

    #[test]
    fn test_lease_errors() {
        let policy = RetentionPolicy::new(0, 0);
        policy.add_lease("a", 5, "x").unwrap();
        assert!(matches!(policy.add_lease("a", 6, "x"), Err(Error::RetentionLease(_))));
        assert!(matches!(policy.renew_lease("a", 4), Err(Error::RetentionLease(_))));
        assert!(matches!(policy.renew_lease("b", 4), Err(Error::RetentionLease(_))));
        assert!(matches!(policy.remove_lease("b"), Err(Error::RetentionLease(_))));
        assert_eq!(policy.leases().len(), 1);
    }

    #[test]
    fn test_lock_freezes_floor() {
        let policy = RetentionPolicy::new(0, 0);
        let lock = policy.acquire_lock();
        assert_eq!(policy.update(50, 50), 0);
        drop(lock);
        assert_eq!(policy.update(50, 50), 51);
    }

    #[test]
    fn test_recovery_start_bounds_floor() {
        let policy = RetentionPolicy::new(0, 0);
        let recovery = policy.start_recovery(7).unwrap();
        assert_eq!(policy.update(50, 50), 7);
        drop(recovery);
        assert_eq!(policy.update(50, 50), 51);
    }
}
