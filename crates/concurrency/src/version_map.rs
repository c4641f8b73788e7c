//! Live version map
//!
//! Holds the latest version/seqNo of every document written since the last
//! refresh, plus delete tombstones until they are garbage collected. Until a
//! write becomes visible in the index reader this map is the only place its
//! version can be read from, so conflict checks and realtime gets consult it
//! first.
//!
//! ## Refresh protocol
//!
//! ```text
//! before_refresh():  old = current; current = {}      (write lock)
//! index.refresh()    writes in `old` become searchable
//! after_refresh():   old = {}                          (write lock)
//! ```
//!
//! Lookups check `current`, then `old`, then the tombstone table, so an
//! entry is never lost in the window between the swap and the index
//! refresh. All per-id reads and writes happen under the id lock.

use crate::id_lock::{IdGuard, KeyedLock};
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHasher;
use seqstore_core::{PrimaryTerm, SeqNo, TranslogLocation, Version};
use std::hash::BuildHasherDefault;
use std::sync::Arc;

type IdMap = DashMap<String, VersionValue, BuildHasherDefault<FxHasher>>;

/// Version information of one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionValue {
    /// Current version
    pub version: Version,
    /// SeqNo of the write that produced it
    pub seq_no: SeqNo,
    /// Term of that write
    pub primary_term: PrimaryTerm,
    /// Where the write sits in the translog, if known
    pub location: Option<TranslogLocation>,
    /// True for delete tombstones
    pub deleted: bool,
    /// Wall-clock time of a delete in microseconds (0 for index entries)
    pub time_micros: u64,
}

impl VersionValue {
    /// Entry for a live document.
    pub fn index(
        version: Version,
        seq_no: SeqNo,
        primary_term: PrimaryTerm,
        location: Option<TranslogLocation>,
    ) -> Self {
        VersionValue {
            version,
            seq_no,
            primary_term,
            location,
            deleted: false,
            time_micros: 0,
        }
    }

    /// Entry for a deleted document.
    pub fn delete(version: Version, seq_no: SeqNo, primary_term: PrimaryTerm, time_micros: u64) -> Self {
        VersionValue {
            version,
            seq_no,
            primary_term,
            location: None,
            deleted: true,
            time_micros,
        }
    }

    /// True for delete tombstones.
    pub fn is_delete(&self) -> bool {
        self.deleted
    }
}

struct Maps {
    current: Arc<IdMap>,
    old: Arc<IdMap>,
}

/// Per-document versions of unrefreshed writes and unexpired deletes
pub struct LiveVersionMap {
    maps: RwLock<Maps>,
    tombstones: IdMap,
    locks: KeyedLock,
}

impl LiveVersionMap {
    /// Create an empty map.
    pub fn new() -> Self {
        LiveVersionMap {
            maps: RwLock::new(Maps {
                current: Arc::new(IdMap::default()),
                old: Arc::new(IdMap::default()),
            }),
            tombstones: IdMap::default(),
            locks: KeyedLock::default(),
        }
    }

    /// Lock the id; every `_under_lock` call for it needs the guard.
    pub fn acquire_lock(&self, id: &str) -> IdGuard<'_> {
        self.locks.acquire(id)
    }

    /// Latest known version of `id`, including tombstones.
    pub fn get_under_lock(&self, id: &str, guard: &IdGuard<'_>) -> Option<VersionValue> {
        debug_assert!(self.locks.guards(guard, id));
        let maps = self.maps.read();
        let mut found = maps.current.get(id).map(|value| value.clone());
        if found.is_none() {
            found = maps.old.get(id).map(|value| value.clone());
        }
        drop(maps);
        if found.is_none() {
            found = self.tombstones.get(id).map(|value| value.clone());
        }
        found
    }

    /// Record a live document version.
    pub fn put_index_under_lock(&self, id: &str, value: VersionValue, guard: &IdGuard<'_>) {
        debug_assert!(self.locks.guards(guard, id));
        debug_assert!(!value.deleted);
        let maps = self.maps.read();
        maps.current.insert(id.to_string(), value);
        self.tombstones.remove(id);
    }

    /// Record a delete; the tombstone outlives refreshes until pruned.
    pub fn put_delete_under_lock(&self, id: &str, value: VersionValue, guard: &IdGuard<'_>) {
        debug_assert!(self.locks.guards(guard, id));
        debug_assert!(value.deleted);
        let maps = self.maps.read();
        self.tombstones.insert(id.to_string(), value.clone());
        maps.current.insert(id.to_string(), value);
    }

    /// Start a refresh: current writes move to the old map.
    pub fn before_refresh(&self) {
        let mut maps = self.maps.write();
        maps.old = std::mem::replace(&mut maps.current, Arc::new(IdMap::default()));
    }

    /// Finish a refresh: the old map is visible in the index and can go.
    pub fn after_refresh(&self) {
        let mut maps = self.maps.write();
        maps.old = Arc::new(IdMap::default());
    }

    /// Drop tombstones older than `max_time_micros` whose seqNo is at or below `max_seq_no`.
    ///
    /// Ids whose lock is currently held are skipped and retried on the next call.
    pub fn prune_tombstones(&self, max_time_micros: u64, max_seq_no: SeqNo) -> usize {
        let candidates: Vec<String> = self
            .tombstones
            .iter()
            .filter(|entry| Self::prunable(entry.value(), max_time_micros, max_seq_no))
            .map(|entry| entry.key().clone())
            .collect();

        let mut pruned = 0;
        for id in candidates {
            let Some(_guard) = self.locks.try_acquire(&id) else {
                continue;
            };
            if self
                .tombstones
                .remove_if(&id, |_, value| Self::prunable(value, max_time_micros, max_seq_no))
                .is_some()
            {
                pruned += 1;
            }
        }
        if pruned > 0 {
            tracing::debug!(target: "seqstore::engine", pruned, max_seq_no, "pruned version map tombstones");
        }
        pruned
    }

    fn prunable(value: &VersionValue, max_time_micros: u64, max_seq_no: SeqNo) -> bool {
        value.time_micros < max_time_micros && value.seq_no <= max_seq_no
    }

    /// Number of tombstones held.
    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// Number of unrefreshed entries (current plus old).
    pub fn unrefreshed_count(&self) -> usize {
        let maps = self.maps.read();
        maps.current.len() + maps.old.len()
    }
}

impl Default for LiveVersionMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(offset: u64) -> Option<TranslogLocation> {
        Some(TranslogLocation::new(1, offset, 10))
    }

    #[test]
    fn test_put_and_get() {
        let map = LiveVersionMap::new();
        let guard = map.acquire_lock("a");
        assert!(map.get_under_lock("a", &guard).is_none());
        map.put_index_under_lock("a", VersionValue::index(1, 0, 1, loc(0)), &guard);
        let value = map.get_under_lock("a", &guard).unwrap();
        assert_eq!(value.version, 1);
        assert_eq!(value.location, loc(0));
    }

    #[test]
    fn test_entry_survives_refresh_window() {
        let map = LiveVersionMap::new();
        {
            let guard = map.acquire_lock("a");
            map.put_index_under_lock("a", VersionValue::index(1, 0, 1, None), &guard);
        }
        map.before_refresh();
        {
            let guard = map.acquire_lock("a");
            assert_eq!(map.get_under_lock("a", &guard).unwrap().seq_no, 0);
        }
        map.after_refresh();
        let guard = map.acquire_lock("a");
        assert!(map.get_under_lock("a", &guard).is_none());
        assert_eq!(map.unrefreshed_count(), 0);
    }

    #[test]
    fn test_delete_shadows_old_index() {
        let map = LiveVersionMap::new();
        {
            let guard = map.acquire_lock("a");
            map.put_index_under_lock("a", VersionValue::index(1, 0, 1, None), &guard);
        }
        map.before_refresh();
        let guard = map.acquire_lock("a");
        map.put_delete_under_lock("a", VersionValue::delete(2, 1, 1, 100), &guard);
        let value = map.get_under_lock("a", &guard).unwrap();
        assert!(value.is_delete());
        assert_eq!(value.version, 2);
    }

    #[test]
    fn test_tombstone_outlives_refresh_until_pruned() {
        let map = LiveVersionMap::new();
        {
            let guard = map.acquire_lock("a");
            map.put_delete_under_lock("a", VersionValue::delete(2, 5, 1, 100), &guard);
        }
        map.before_refresh();
        map.after_refresh();
        {
            let guard = map.acquire_lock("a");
            assert!(map.get_under_lock("a", &guard).unwrap().is_delete());
        }
        // seqNo above the allowed bound is kept
        assert_eq!(map.prune_tombstones(200, 4), 0);
        // too recent is kept
        assert_eq!(map.prune_tombstones(50, 10), 0);
        assert_eq!(map.prune_tombstones(200, 5), 1);
        assert_eq!(map.tombstone_count(), 0);
    }

    #[test]
    fn test_index_clears_tombstone() {
        let map = LiveVersionMap::new();
        let guard = map.acquire_lock("a");
        map.put_delete_under_lock("a", VersionValue::delete(2, 1, 1, 100), &guard);
        map.put_index_under_lock("a", VersionValue::index(3, 2, 1, None), &guard);
        assert_eq!(map.tombstone_count(), 0);
        assert!(!map.get_under_lock("a", &guard).unwrap().is_delete());
    }

    #[test]
    fn test_prune_skips_locked_ids() {
        let map = LiveVersionMap::new();
        let guard = map.acquire_lock("a");
        map.put_delete_under_lock("a", VersionValue::delete(2, 1, 1, 1), &guard);
        assert_eq!(map.prune_tombstones(u64::MAX, i64::MAX), 0);
        drop(guard);
        assert_eq!(map.prune_tombstones(u64::MAX, i64::MAX), 1);
    }
}
