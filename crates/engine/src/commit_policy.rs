//! Commit retention: which commits may be deleted.
//!
//! The *safe commit* is the newest commit whose local checkpoint is at or
//! below the persisted global checkpoint; every operation it contains is
//! known to be on all in-sync copies. If no commit qualifies the oldest one
//! is safe. The safe commit and everything newer are kept; older commits are
//! deleted once no [`CommitRef`] holds them.

use parking_lot::Mutex;
use seqstore_core::{Error, Result, SeqNo, NO_OPS_PERFORMED};
use seqstore_storage::CommitPoint;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Commit user data key: highest seqNo issued when the commit was taken.
pub const MAX_SEQ_NO_KEY: &str = "max-seq-no";
/// Commit user data key: every seqNo at or below this is in the commit.
pub const LOCAL_CHECKPOINT_KEY: &str = "local-checkpoint";
/// Commit user data key: shard history identity.
pub const HISTORY_UUID_KEY: &str = "history-uuid";
/// Commit user data key: retention floor at commit time.
pub const MIN_RETAINED_SEQ_NO_KEY: &str = "min-retained-seq-no";
/// Commit user data key: first translog generation not covered by the commit.
pub const TRANSLOG_GENERATION_KEY: &str = "translog-generation";

/// Parsed view of a commit's user data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    /// Commit generation
    pub generation: u64,
    /// `max-seq-no`
    pub max_seq_no: SeqNo,
    /// `local-checkpoint`
    pub local_checkpoint: SeqNo,
    /// `history-uuid`
    pub history_uuid: String,
    /// `min-retained-seq-no`
    pub min_retained_seq_no: SeqNo,
    /// `translog-generation`
    pub translog_generation: u64,
    /// Live documents in the commit
    pub doc_count: usize,
}

impl From<&CommitPoint> for CommitInfo {
    fn from(point: &CommitPoint) -> Self {
        CommitInfo {
            generation: point.generation,
            max_seq_no: point.seq_no(MAX_SEQ_NO_KEY).unwrap_or(NO_OPS_PERFORMED),
            local_checkpoint: local_checkpoint_of(point),
            history_uuid: point.get(HISTORY_UUID_KEY).unwrap_or_default().to_string(),
            min_retained_seq_no: point.seq_no(MIN_RETAINED_SEQ_NO_KEY).unwrap_or(0),
            translog_generation: point
                .get(TRANSLOG_GENERATION_KEY)
                .and_then(|g| g.parse().ok())
                .unwrap_or(1),
            doc_count: point.doc_count,
        }
    }
}

fn local_checkpoint_of(point: &CommitPoint) -> SeqNo {
    point.seq_no(LOCAL_CHECKPOINT_KEY).unwrap_or(NO_OPS_PERFORMED)
}

/// Index of the safe commit in `commits` (oldest first).
pub fn find_safe_commit(commits: &[CommitPoint], global_checkpoint: SeqNo) -> usize {
    commits
        .iter()
        .rposition(|c| local_checkpoint_of(c) <= global_checkpoint)
        .unwrap_or(0)
}

type RefCounts = Arc<Mutex<BTreeMap<u64, usize>>>;

struct PolicyState {
    commits: Vec<CommitPoint>,
    safe: usize,
}

/// Tracks commits and decides which can be deleted
pub struct CommitDeletionPolicy {
    state: Mutex<PolicyState>,
    refs: RefCounts,
}

impl CommitDeletionPolicy {
    /// Policy over existing `commits` (oldest first).
    pub fn new(commits: Vec<CommitPoint>, global_checkpoint: SeqNo) -> Self {
        let safe = find_safe_commit(&commits, global_checkpoint);
        CommitDeletionPolicy {
            state: Mutex::new(PolicyState { commits, safe }),
            refs: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Take the current commit list and return the generations to delete.
    ///
    /// Deletable commits are dropped from the tracked list; the caller
    /// deletes their files.
    pub fn on_commits(&self, commits: Vec<CommitPoint>, global_checkpoint: SeqNo) -> Vec<u64> {
        let refs = self.refs.lock();
        let safe = find_safe_commit(&commits, global_checkpoint);
        let mut deleted = Vec::new();
        let mut kept = Vec::with_capacity(commits.len());
        for (i, c) in commits.into_iter().enumerate() {
            if i < safe && !refs.contains_key(&c.generation) {
                deleted.push(c.generation);
            } else {
                kept.push(c);
            }
        }
        drop(refs);

        let mut state = self.state.lock();
        state.safe = find_safe_commit(&kept, global_checkpoint);
        state.commits = kept;
        if !deleted.is_empty() {
            debug!(target: "seqstore::engine", ?deleted, "Commits no longer needed");
        }
        deleted
    }

    /// Current safe commit.
    pub fn safe_commit(&self) -> Option<CommitPoint> {
        let state = self.state.lock();
        state.commits.get(state.safe).cloned()
    }

    /// Local checkpoint of the safe commit.
    pub fn safe_commit_checkpoint(&self) -> SeqNo {
        self.safe_commit()
            .map(|c| local_checkpoint_of(&c))
            .unwrap_or(NO_OPS_PERFORMED)
    }

    /// Newest commit.
    pub fn last_commit(&self) -> Option<CommitPoint> {
        self.state.lock().commits.last().cloned()
    }

    /// Tracked commits, oldest first.
    pub fn commits(&self) -> Vec<CommitPoint> {
        self.state.lock().commits.clone()
    }

    /// Reference the safe commit so it cannot be deleted.
    pub fn acquire_safe_commit(&self) -> Result<CommitRef> {
        let commit = self
            .safe_commit()
            .ok_or_else(|| Error::illegal_state("no commit to acquire"))?;
        Ok(self.acquire(commit))
    }

    /// Reference the newest commit so it cannot be deleted.
    pub fn acquire_last_commit(&self) -> Result<CommitRef> {
        let commit = self
            .last_commit()
            .ok_or_else(|| Error::illegal_state("no commit to acquire"))?;
        Ok(self.acquire(commit))
    }

    /// True while a `CommitRef` holds `generation`.
    pub fn is_referenced(&self, generation: u64) -> bool {
        self.refs.lock().contains_key(&generation)
    }

    fn acquire(&self, commit: CommitPoint) -> CommitRef {
        *self.refs.lock().entry(commit.generation).or_insert(0) += 1;
        CommitRef {
            commit,
            refs: Arc::clone(&self.refs),
        }
    }
}

/// Keeps a commit from being deleted while alive
pub struct CommitRef {
    commit: CommitPoint,
    refs: RefCounts,
}

impl CommitRef {
    /// The referenced commit.
    pub fn commit(&self) -> &CommitPoint {
        &self.commit
    }

    /// Commit generation.
    pub fn generation(&self) -> u64 {
        self.commit.generation
    }

    /// Parsed user data.
    pub fn info(&self) -> CommitInfo {
        CommitInfo::from(&self.commit)
    }
}

impl std::fmt::Debug for CommitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitRef")
            .field("generation", &self.commit.generation)
            .finish()
    }
}

impl Drop for CommitRef {
    fn drop(&mut self) {
        let mut refs = self.refs.lock();
        if let Some(count) = refs.get_mut(&self.commit.generation) {
            *count -= 1;
            if *count == 0 {
                refs.remove(&self.commit.generation);
            }
        }
    }
}
