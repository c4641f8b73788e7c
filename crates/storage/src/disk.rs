//! Embedded disk-backed storage index.
//!
//! The whole index state lives in memory; every commit writes a complete
//! commit file (see [`crate::commit`]). Opening loads the newest commit.
//!
//! # Locking
//!
//! - `state`: RwLock over live documents, tombstones and mapping
//! - `searcher`: the last refreshed view, swapped atomically on refresh
//! - `commit_lock`: serializes commits so generations are assigned in order
//! - `commits`: metadata of commit files on disk

use crate::commit::{self, CommitData, UserData};
use crate::document::{DocVersion, StoredDoc, Tombstone};
use crate::error::{StorageError, StorageResult};
use crate::index::{CommitPoint, IndexRecords, Searcher, StorageIndex};
use crate::mapping::Mapping;
use parking_lot::{Mutex, RwLock};
use seqstore_core::SeqNo;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Storage index configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfig {
    /// Largest serialized source accepted (default: 10MB)
    pub max_document_bytes: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            max_document_bytes: 10 * 1024 * 1024,
        }
    }
}

impl IndexConfig {
    /// Set the document size limit (builder pattern).
    pub fn with_max_document_bytes(mut self, bytes: usize) -> Self {
        self.max_document_bytes = bytes;
        self
    }
}

#[derive(Default)]
struct IndexState {
    docs: BTreeMap<String, StoredDoc>,
    tombstones: BTreeMap<SeqNo, Tombstone>,
    /// id -> seqNo of its latest delete tombstone, while no live copy exists
    deletes: HashMap<String, SeqNo>,
    mapping: Mapping,
}

impl IndexState {
    fn from_commit(data: CommitData) -> Self {
        let mut state = IndexState {
            mapping: data.mapping,
            ..IndexState::default()
        };
        for doc in data.docs {
            state.docs.insert(doc.id.clone(), doc);
        }
        for tombstone in data.tombstones {
            state.track_delete(&tombstone);
            state.tombstones.insert(tombstone.seq_no, tombstone);
        }
        state
    }

    fn track_delete(&mut self, tombstone: &Tombstone) {
        let Some(id) = tombstone.id.as_ref().filter(|_| tombstone.is_delete()) else {
            return;
        };
        if self.docs.contains_key(id) {
            return;
        }
        let newer = self
            .deletes
            .get(id)
            .map_or(true, |seq_no| *seq_no < tombstone.seq_no);
        if newer {
            self.deletes.insert(id.clone(), tombstone.seq_no);
        }
    }

    fn records(&self) -> IndexRecords {
        IndexRecords {
            docs: self.docs.values().cloned().collect(),
            tombstones: self.tombstones.values().cloned().collect(),
        }
    }
}

/// Disk-backed [`StorageIndex`]
pub struct DiskIndex {
    dir: PathBuf,
    config: IndexConfig,
    state: RwLock<IndexState>,
    searcher: RwLock<Arc<Searcher>>,
    commits: Mutex<BTreeMap<u64, CommitPoint>>,
    commit_lock: Mutex<()>,
    dirty: AtomicBool,
    refresh_needed: AtomicBool,
    refresh_generation: AtomicU64,
    closed: AtomicBool,
}

impl DiskIndex {
    /// Open the index in `dir`, loading its newest commit.
    ///
    /// An empty or missing directory yields an empty index with no commits.
    ///
    /// # Errors
    /// `StorageError::Corruption` if any commit file fails validation.
    pub fn open(dir: &Path, config: IndexConfig) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        commit::remove_tmp(dir)?;

        let mut commits = BTreeMap::new();
        let mut latest = None;
        for generation in commit::list_commit_generations(dir)? {
            let data = commit::read_commit(dir, generation)?;
            commits.insert(generation, commit_point(generation, &data));
            latest = Some(data);
        }

        let state = latest.map(IndexState::from_commit).unwrap_or_default();
        let searcher = Searcher::new(0, state.docs.clone());
        info!(
            target: "seqstore::index",
            dir = ?dir,
            commits = commits.len(),
            docs = state.docs.len(),
            tombstones = state.tombstones.len(),
            "opened index"
        );

        Ok(DiskIndex {
            dir: dir.to_path_buf(),
            config,
            state: RwLock::new(state),
            searcher: RwLock::new(Arc::new(searcher)),
            commits: Mutex::new(commits),
            commit_lock: Mutex::new(()),
            dirty: AtomicBool::new(false),
            refresh_needed: AtomicBool::new(false),
            refresh_generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Index directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn mark_changed(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        self.refresh_needed.store(true, Ordering::SeqCst);
    }
}

fn commit_point(generation: u64, data: &CommitData) -> CommitPoint {
    CommitPoint {
        generation,
        user_data: data.user_data.clone(),
        doc_count: data.docs.len(),
        tombstone_count: data.tombstones.len(),
    }
}

impl StorageIndex for DiskIndex {
    fn validate_document(&self, id: &str, source: &Value) -> StorageResult<()> {
        if id.is_empty() {
            return Err(StorageError::DocumentRejected("document id is empty".into()));
        }
        if !source.is_object() {
            return Err(StorageError::DocumentRejected(format!(
                "source of [{}] is not a JSON object",
                id
            )));
        }
        let size = serde_json::to_vec(source)
            .map_err(|e| StorageError::Serialization(e.to_string()))?
            .len();
        if size > self.config.max_document_bytes {
            return Err(StorageError::DocumentRejected(format!(
                "document [{}] is {} bytes, limit is {}",
                id, size, self.config.max_document_bytes
            )));
        }
        Ok(())
    }

    fn index_document(&self, doc: StoredDoc) -> StorageResult<()> {
        self.ensure_open()?;
        {
            let mut state = self.state.write();
            state.mapping.merge_source(&doc.source);
            state.deletes.remove(&doc.id);
            state.docs.insert(doc.id.clone(), doc);
        }
        self.mark_changed();
        Ok(())
    }

    fn delete_document(&self, tombstone: Tombstone) -> StorageResult<bool> {
        self.ensure_open()?;
        let found = {
            let mut state = self.state.write();
            let found = match &tombstone.id {
                Some(id) => state.docs.remove(id).is_some(),
                None => false,
            };
            state.track_delete(&tombstone);
            state.tombstones.insert(tombstone.seq_no, tombstone);
            found
        };
        self.mark_changed();
        Ok(found)
    }

    fn add_tombstone(&self, tombstone: Tombstone) -> StorageResult<()> {
        self.ensure_open()?;
        self.state.write().tombstones.insert(tombstone.seq_no, tombstone);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn current_version(&self, id: &str) -> StorageResult<Option<DocVersion>> {
        self.ensure_open()?;
        let state = self.state.read();
        if let Some(doc) = state.docs.get(id) {
            return Ok(Some(doc.doc_version()));
        }
        Ok(state
            .deletes
            .get(id)
            .and_then(|seq_no| state.tombstones.get(seq_no))
            .map(|t| DocVersion {
                version: t.version,
                seq_no: t.seq_no,
                primary_term: t.primary_term,
                deleted: true,
            }))
    }

    fn refresh(&self) -> StorageResult<()> {
        self.ensure_open()?;
        if !self.refresh_needed.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let generation = self.refresh_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let docs = self.state.read().docs.clone();
        let doc_count = docs.len();
        *self.searcher.write() = Arc::new(Searcher::new(generation, docs));
        debug!(target: "seqstore::index", generation, doc_count, "refreshed");
        Ok(())
    }

    fn searcher(&self) -> Arc<Searcher> {
        Arc::clone(&self.searcher.read())
    }

    fn mapping(&self) -> Mapping {
        self.state.read().mapping.clone()
    }

    fn update_mapping(&self, fields: &[String]) -> StorageResult<usize> {
        self.ensure_open()?;
        let added = self.state.write().mapping.merge(fields.iter().cloned());
        if added > 0 {
            self.dirty.store(true, Ordering::SeqCst);
        }
        Ok(added)
    }

    fn has_uncommitted_changes(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn commit(&self, user_data: &dyn Fn() -> UserData) -> StorageResult<CommitPoint> {
        self.ensure_open()?;
        let _commit = self.commit_lock.lock();

        // Clear first: changes racing with the capture keep the index dirty.
        self.dirty.store(false, Ordering::SeqCst);
        let (records, mapping) = {
            let state = self.state.read();
            (state.records(), state.mapping.clone())
        };
        let data = CommitData {
            user_data: user_data(),
            docs: records.docs,
            tombstones: records.tombstones,
            mapping,
        };

        let generation = self
            .commits
            .lock()
            .keys()
            .next_back()
            .map_or(1, |last| last + 1);
        if let Err(e) = commit::write_commit(&self.dir, generation, &data) {
            self.dirty.store(true, Ordering::SeqCst);
            return Err(e);
        }

        let point = commit_point(generation, &data);
        self.commits.lock().insert(generation, point.clone());
        info!(
            target: "seqstore::index",
            generation,
            docs = point.doc_count,
            tombstones = point.tombstone_count,
            "committed index"
        );
        Ok(point)
    }

    fn list_commits(&self) -> Vec<CommitPoint> {
        self.commits.lock().values().cloned().collect()
    }

    fn delete_commit(&self, generation: u64) -> StorageResult<()> {
        self.ensure_open()?;
        let _commit = self.commit_lock.lock();
        if self.commits.lock().remove(&generation).is_none() {
            return Err(StorageError::CommitNotFound(generation));
        }
        fs::remove_file(commit::commit_path(&self.dir, generation))?;
        debug!(target: "seqstore::index", generation, "deleted commit");
        Ok(())
    }

    fn commit_records(&self, generation: u64) -> StorageResult<IndexRecords> {
        let data = commit::read_commit(&self.dir, generation)?;
        Ok(IndexRecords {
            docs: data.docs,
            tombstones: data.tombstones,
        })
    }

    fn prune_tombstones(&self, below_seq_no: SeqNo) -> usize {
        let mut state = self.state.write();
        let doomed: Vec<SeqNo> = state.tombstones.range(..below_seq_no).map(|(s, _)| *s).collect();
        for seq_no in &doomed {
            let removed = state.tombstones.remove(seq_no);
            if let Some(Tombstone { id: Some(id), .. }) = removed {
                if state.deletes.get(&id) == Some(seq_no) {
                    state.deletes.remove(&id);
                }
            }
        }
        if !doomed.is_empty() {
            self.dirty.store(true, Ordering::SeqCst);
            debug!(target: "seqstore::index", pruned = doomed.len(), below_seq_no, "pruned tombstones");
        }
        doomed.len()
    }

    fn records(&self) -> IndexRecords {
        self.state.read().records()
    }

    fn close(&self) -> StorageResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        debug!(target: "seqstore::index", dir = ?self.dir, "index closed");
        Ok(())
    }
}

impl std::fmt::Debug for DiskIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskIndex")
            .field("dir", &self.dir)
            .field("commits", &self.commits.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Query;
    use serde_json::json;
    use tempfile::tempdir;

    fn open(dir: &Path) -> DiskIndex {
        DiskIndex::open(dir, IndexConfig::default()).unwrap()
    }

    fn user_data(max_seq_no: SeqNo) -> UserData {
        let mut data = UserData::new();
        data.insert("max-seq-no".into(), max_seq_no.to_string());
        data
    }

    #[test]
    fn test_writes_visible_after_refresh() {
        let dir = tempdir().unwrap();
        let index = open(dir.path());
        index.index_document(StoredDoc::new("a", json!({"k": 1}), 0, 1, 1)).unwrap();
        assert!(index.searcher().get("a").is_none());
        assert_eq!(index.current_version("a").unwrap().unwrap().seq_no, 0);

        index.refresh().unwrap();
        assert_eq!(index.searcher().get("a").unwrap().version, 1);
        assert_eq!(index.searcher().refresh_generation(), 1);
    }

    #[test]
    fn test_delete_keeps_version_history() {
        let dir = tempdir().unwrap();
        let index = open(dir.path());
        index.index_document(StoredDoc::new("a", json!({}), 0, 1, 1)).unwrap();
        assert!(index.delete_document(Tombstone::delete("a", 1, 1, 2)).unwrap());
        assert!(!index.delete_document(Tombstone::delete("b", 2, 1, 1)).unwrap());

        let version = index.current_version("a").unwrap().unwrap();
        assert!(version.deleted);
        assert_eq!(version.version, 2);

        index.index_document(StoredDoc::new("a", json!({}), 3, 1, 3)).unwrap();
        assert!(!index.current_version("a").unwrap().unwrap().deleted);
        assert_eq!(index.records().seq_nos().len(), 3);
    }

    #[test]
    fn test_commit_and_reopen() {
        let dir = tempdir().unwrap();
        {
            let index = open(dir.path());
            index.index_document(StoredDoc::new("a", json!({"t": "x"}), 0, 1, 1)).unwrap();
            index.add_tombstone(Tombstone::no_op(1, 1, "gap")).unwrap();
            assert!(index.has_uncommitted_changes());
            let point = index.commit(&|| user_data(1)).unwrap();
            assert_eq!(point.generation, 1);
            assert!(!index.has_uncommitted_changes());
        }
        let index = open(dir.path());
        let last = index.last_commit().unwrap();
        assert_eq!(last.seq_no("max-seq-no"), Some(1));
        assert_eq!(index.searcher().search(&Query::MatchAll).len(), 1);
        assert_eq!(index.records().tombstones.len(), 1);
        assert!(index.mapping().contains("t"));
    }

    #[test]
    fn test_delete_commit() {
        let dir = tempdir().unwrap();
        let index = open(dir.path());
        index.commit(&|| user_data(-1)).unwrap();
        index.commit(&|| user_data(-1)).unwrap();
        index.delete_commit(1).unwrap();
        assert_eq!(index.list_commits().iter().map(|c| c.generation).collect::<Vec<_>>(), vec![2]);
        assert!(matches!(index.delete_commit(1), Err(StorageError::CommitNotFound(1))));
        assert_eq!(commit::list_commit_generations(dir.path()).unwrap(), vec![2]);
    }

    #[test]
    fn test_prune_tombstones() {
        let dir = tempdir().unwrap();
        let index = open(dir.path());
        index.delete_document(Tombstone::delete("a", 0, 1, 1)).unwrap();
        index.add_tombstone(Tombstone::no_op(1, 1, "gap")).unwrap();
        index.add_tombstone(Tombstone::stale("b", 5, 1, 1)).unwrap();
        assert_eq!(index.prune_tombstones(2), 2);
        assert!(index.current_version("a").unwrap().is_none());
        assert_eq!(index.records().tombstones.len(), 1);
    }

    #[test]
    fn test_validate_document() {
        let dir = tempdir().unwrap();
        let index = DiskIndex::open(dir.path(), IndexConfig::default().with_max_document_bytes(16)).unwrap();
        assert!(index.validate_document("a", &json!({"k": 1})).is_ok());
        assert!(index.validate_document("a", &json!([1])).unwrap_err().is_document_failure());
        assert!(index
            .validate_document("a", &json!({"k": "a long value over the limit"}))
            .unwrap_err()
            .is_document_failure());
        assert!(index.validate_document("", &json!({})).is_err());
    }

    #[test]
    fn test_closed_index_rejects_writes() {
        let dir = tempdir().unwrap();
        let index = open(dir.path());
        index.close().unwrap();
        assert!(matches!(
            index.index_document(StoredDoc::new("a", json!({}), 0, 1, 1)),
            Err(StorageError::Closed)
        ));
    }
}
