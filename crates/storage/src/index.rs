//! The storage index contract.
//!
//! The engine talks to its index only through [`StorageIndex`], which lets
//! tests wrap the real index to inject failures.
//!
//! # Visibility
//!
//! Writes are applied to the index immediately but only become visible to
//! [`Searcher`]s after `refresh`. `current_version` always sees the latest
//! applied state, refreshed or not.
//!
//! # Commits
//!
//! `commit` captures the index state first and only then asks the caller for
//! the user data, so values read by the callback (such as the max seqNo) are
//! at least as new as anything in the captured state.

use crate::commit::UserData;
use crate::document::{DocVersion, SearchHit, StoredDoc, Tombstone};
use crate::error::StorageResult;
use crate::mapping::Mapping;
use crate::query::Query;
use seqstore_core::{SeqNo, NO_OPS_PERFORMED};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A durable commit point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitPoint {
    /// Commit generation, increasing per index
    pub generation: u64,
    /// User data written with the commit
    pub user_data: UserData,
    /// Live documents in the commit
    pub doc_count: usize,
    /// Tombstones in the commit
    pub tombstone_count: usize,
}

impl CommitPoint {
    /// User data value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.user_data.get(key).map(String::as_str)
    }

    /// User data value for `key` parsed as a seqNo.
    pub fn seq_no(&self, key: &str) -> Option<SeqNo> {
        self.get(key)?.parse().ok()
    }
}

/// Every record held by an index or a commit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexRecords {
    /// Live documents
    pub docs: Vec<StoredDoc>,
    /// Tombstones
    pub tombstones: Vec<Tombstone>,
}

impl IndexRecords {
    /// Highest seqNo among all records.
    pub fn max_seq_no(&self) -> SeqNo {
        self.docs
            .iter()
            .map(|d| d.seq_no)
            .chain(self.tombstones.iter().map(|t| t.seq_no))
            .max()
            .unwrap_or(NO_OPS_PERFORMED)
    }

    /// Every seqNo held, one entry per record.
    pub fn seq_nos(&self) -> Vec<SeqNo> {
        self.docs
            .iter()
            .map(|d| d.seq_no)
            .chain(self.tombstones.iter().map(|t| t.seq_no))
            .collect()
    }
}

/// Point-in-time, read-only view of the live documents
#[derive(Debug, Clone, Default)]
pub struct Searcher {
    refresh_generation: u64,
    docs: Arc<BTreeMap<String, StoredDoc>>,
}

impl Searcher {
    /// Searcher over `docs` taken at `refresh_generation`.
    pub fn new(refresh_generation: u64, docs: BTreeMap<String, StoredDoc>) -> Self {
        Searcher {
            refresh_generation,
            docs: Arc::new(docs),
        }
    }

    /// Refresh that produced this view.
    pub fn refresh_generation(&self) -> u64 {
        self.refresh_generation
    }

    /// Live document with `id`.
    pub fn get(&self, id: &str) -> Option<&StoredDoc> {
        self.docs.get(id)
    }

    /// Documents matching `query`, ordered by id.
    pub fn search(&self, query: &Query) -> Vec<SearchHit> {
        match query {
            Query::Ids(ids) => {
                let mut hits: Vec<SearchHit> = ids
                    .iter()
                    .filter_map(|id| self.docs.get(id))
                    .map(SearchHit::from)
                    .collect();
                hits.sort_by(|a, b| a.id.cmp(&b.id));
                hits.dedup_by(|a, b| a.id == b.id);
                hits
            }
            _ => self
                .docs
                .values()
                .filter(|doc| query.matches(doc))
                .map(SearchHit::from)
                .collect(),
        }
    }

    /// Number of visible live documents.
    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }
}

/// Document storage with commit points
///
/// Implementations must be safe to call from many writer threads; the
/// engine serializes writes to the same id.
pub trait StorageIndex: Send + Sync {
    /// Reject documents the index cannot store. Called before any state change.
    ///
    /// Returns `StorageError::DocumentRejected` for per-document failures.
    fn validate_document(&self, id: &str, source: &Value) -> StorageResult<()>;

    /// Add or replace the live document with `doc.id`.
    fn index_document(&self, doc: StoredDoc) -> StorageResult<()>;

    /// Remove the live document named by a delete tombstone and record the
    /// tombstone. Returns true if a live document was removed.
    fn delete_document(&self, tombstone: Tombstone) -> StorageResult<bool>;

    /// Record a tombstone without touching any live document.
    fn add_tombstone(&self, tombstone: Tombstone) -> StorageResult<()>;

    /// Latest applied version of `id`, including deletes still tombstoned.
    fn current_version(&self, id: &str) -> StorageResult<Option<DocVersion>>;

    /// Make applied writes visible to new searchers.
    fn refresh(&self) -> StorageResult<()>;

    /// Searcher over the last refresh.
    fn searcher(&self) -> Arc<Searcher>;

    /// Current field mapping.
    fn mapping(&self) -> Mapping;

    /// Add fields to the mapping; returns how many were new.
    fn update_mapping(&self, fields: &[String]) -> StorageResult<usize>;

    /// True if anything changed since the last commit.
    fn has_uncommitted_changes(&self) -> bool;

    /// Durably commit the current state.
    ///
    /// `user_data` runs after the state is captured.
    fn commit(&self, user_data: &dyn Fn() -> UserData) -> StorageResult<CommitPoint>;

    /// Existing commits, oldest first.
    fn list_commits(&self) -> Vec<CommitPoint>;

    /// Newest commit.
    fn last_commit(&self) -> Option<CommitPoint> {
        self.list_commits().pop()
    }

    /// Delete a commit's file.
    fn delete_commit(&self, generation: u64) -> StorageResult<()>;

    /// Records stored in a commit.
    fn commit_records(&self, generation: u64) -> StorageResult<IndexRecords>;

    /// Drop tombstones with seqNo below `below_seq_no`; returns how many.
    fn prune_tombstones(&self, below_seq_no: SeqNo) -> usize;

    /// Every record in the latest applied state.
    fn records(&self) -> IndexRecords;

    /// Stop accepting calls.
    fn close(&self) -> StorageResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn searcher() -> Searcher {
        let mut docs = BTreeMap::new();
        for (id, color) in [("1", "red"), ("2", "blue"), ("3", "red")] {
            docs.insert(id.to_string(), StoredDoc::new(id, json!({"color": color}), 0, 1, 1));
        }
        Searcher::new(1, docs)
    }

    #[test]
    fn test_search_term() {
        let hits = searcher().search(&Query::term("color", "red"));
        assert_eq!(hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["1", "3"]);
    }

    #[test]
    fn test_search_ids_dedups_and_skips_missing() {
        let hits = searcher().search(&Query::ids(["3", "9", "1", "3"]));
        assert_eq!(hits.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["1", "3"]);
    }

    #[test]
    fn test_records_max_seq_no() {
        let records = IndexRecords {
            docs: vec![StoredDoc::new("a", json!({}), 4, 1, 1)],
            tombstones: vec![Tombstone::no_op(9, 1, "gap")],
        };
        assert_eq!(records.max_seq_no(), 9);
        assert_eq!(IndexRecords::default().max_seq_no(), NO_OPS_PERFORMED);
    }

    #[test]
    fn test_commit_point_user_data() {
        let mut user_data = UserData::new();
        user_data.insert("local-checkpoint".into(), "12".into());
        let point = CommitPoint {
            generation: 1,
            user_data,
            doc_count: 0,
            tombstone_count: 0,
        };
        assert_eq!(point.seq_no("local-checkpoint"), Some(12));
        assert_eq!(point.seq_no("max-seq-no"), None);
    }
}
