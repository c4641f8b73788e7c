//! The shard engine.
//!
//! One `Engine` owns one shard copy on disk:
//!
//! ```text
//! <path>/
//! ├── engine.toml      configuration
//! ├── .lock            exclusive process lock (fs2)
//! ├── index/           commit files
//! └── translog/        translog generations and checkpoints
//! ```
//!
//! # Write Path
//!
//! 1. Resolve the current version under the per-id lock
//! 2. Primary: version checks, then `generate_seq_no`
//! 3. Translog append
//! 4. Index apply, version map update
//! 5. Mark processed; in Always mode wait for the translog fsync
//!
//! # Failure
//!
//! Any fatal error (translog or index I/O, corruption, invariant
//! violation) moves the engine to `Failed`; every later call returns
//! `Error::EngineFailed`.

mod flush;
mod inflight;
mod read;
mod recovery;
mod write;

pub use recovery::RecoveryStats;

use crate::background::TranslogSyncer;
use crate::commit_policy::{
    CommitDeletionPolicy, CommitInfo, HISTORY_UUID_KEY, LOCAL_CHECKPOINT_KEY, MAX_SEQ_NO_KEY,
    MIN_RETAINED_SEQ_NO_KEY, TRANSLOG_GENERATION_KEY,
};
use crate::config::{EngineConfig, CONFIG_FILE_NAME};
use crate::retention::RetentionPolicy;
use crate::state::{EngineState, Lifecycle};
use inflight::InFlightOps;
use parking_lot::Mutex;
use seqstore_concurrency::{LiveVersionMap, LocalCheckpointTracker};
use seqstore_core::{
    Error, PrimaryTerm, Result, SeqNo, SeqNoStats, TranslogLocation, NO_OPS_PERFORMED,
};
use seqstore_durability::{Translog, TranslogStats};
use seqstore_storage::{DiskIndex, StorageIndex, UserData};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Index subdirectory of a shard.
pub const INDEX_DIR: &str = "index";
/// Translog subdirectory of a shard.
pub const TRANSLOG_DIR: &str = "translog";
/// Process lock file of a shard.
pub const LOCK_FILE: &str = ".lock";

/// Storage engine for one shard copy
pub struct Engine {
    path: PathBuf,
    config: EngineConfig,
    history_uuid: String,
    lifecycle: Lifecycle,
    tracker: Arc<LocalCheckpointTracker>,
    translog: Arc<Translog>,
    index: Arc<dyn StorageIndex>,
    version_map: LiveVersionMap,
    retention: RetentionPolicy,
    commit_policy: CommitDeletionPolicy,
    primary_term: AtomicU64,
    inflight: InFlightOps,
    refresh_lock: Mutex<()>,
    flush_lock: Mutex<()>,
    recovery_lock: Mutex<()>,
    /// Local checkpoint of the commit the engine was opened from
    recovery_start: SeqNo,
    committed_translog_generation: AtomicU64,
    syncer: TranslogSyncer,
    _lock_file: File,
}

impl Engine {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Bootstrap a new, empty shard copy at `path` and open it.
    ///
    /// Writes `engine.toml`, creates a fresh history uuid and an empty
    /// translog, and makes the initial commit. The engine is returned in
    /// `Recovering`; call `skip_translog_recovery` or `recover_from_translog`.
    ///
    /// # Errors
    ///
    /// `IllegalState` if a shard already exists at `path`.
    pub fn create(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let lock_file = acquire_dir_lock(path)?;

        let index = DiskIndex::open(&path.join(INDEX_DIR), config.index_config())?;
        if index.last_commit().is_some() {
            return Err(Error::illegal_state(format!(
                "a shard already exists at '{}'",
                path.display()
            )));
        }
        config.write_to_file(&path.join(CONFIG_FILE_NAME))?;

        let history_uuid = Uuid::new_v4().to_string();
        Translog::create_empty(&path.join(TRANSLOG_DIR), &history_uuid, 1)?;
        index.commit(&|| {
            let mut user_data = UserData::new();
            user_data.insert(MAX_SEQ_NO_KEY.into(), NO_OPS_PERFORMED.to_string());
            user_data.insert(LOCAL_CHECKPOINT_KEY.into(), NO_OPS_PERFORMED.to_string());
            user_data.insert(HISTORY_UUID_KEY.into(), history_uuid.clone());
            user_data.insert(MIN_RETAINED_SEQ_NO_KEY.into(), "0".into());
            user_data.insert(TRANSLOG_GENERATION_KEY.into(), "1".into());
            user_data
        })?;
        info!(target: "seqstore::engine", path = %path.display(), %history_uuid, "Created shard");

        Self::open_locked(path, config, Arc::new(index), lock_file)
    }

    /// Open an existing shard copy with the disk index.
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        let path = path.as_ref();
        let lock_file = acquire_dir_lock(path)?;
        let index = DiskIndex::open(&path.join(INDEX_DIR), config.index_config())?;
        Self::open_locked(path, config, Arc::new(index), lock_file)
    }

    /// Open an existing shard copy, creating `engine.toml` with defaults if
    /// missing and reading settings from it.
    pub fn open_from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config_path = path.join(CONFIG_FILE_NAME);
        EngineConfig::write_default_if_missing(&config_path)?;
        let config = EngineConfig::from_file(&config_path)?;
        Self::open(path, config)
    }

    /// Open an existing shard copy over a caller-supplied index.
    ///
    /// The index must already hold the shard's commits.
    pub fn open_with_index(
        path: impl AsRef<Path>,
        config: EngineConfig,
        index: Arc<dyn StorageIndex>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let lock_file = acquire_dir_lock(path)?;
        Self::open_locked(path, config, index, lock_file)
    }

    fn open_locked(
        path: &Path,
        config: EngineConfig,
        index: Arc<dyn StorageIndex>,
        lock_file: File,
    ) -> Result<Self> {
        config.validate()?;
        let lifecycle = Lifecycle::new();

        let last = index.last_commit().ok_or_else(|| {
            Error::illegal_state(format!("no commit found at '{}'", path.display()))
        })?;
        let commit = CommitInfo::from(&last);
        if Uuid::parse_str(&commit.history_uuid).is_err() {
            return Err(Error::corruption(format!(
                "commit {} has no valid history uuid",
                commit.generation
            )));
        }

        let translog = Arc::new(Translog::open(
            &path.join(TRANSLOG_DIR),
            config.translog_config()?,
            &commit.history_uuid,
        )?);

        let tracker = Arc::new(
            LocalCheckpointTracker::new(commit.max_seq_no, commit.local_checkpoint)
                .map_err(|e| Error::corruption(format!("commit {}: {}", commit.generation, e)))?,
        );
        // Committed records above the local checkpoint are already applied and
        // durable; replay and gap filling must not claim their seqNos again.
        let mut committed_above = 0usize;
        for seq_no in index.records().seq_nos() {
            if seq_no > commit.local_checkpoint {
                tracker.mark_seq_no_as_processed(seq_no);
                tracker.mark_seq_no_as_persisted(seq_no);
                committed_above += 1;
            }
        }
        if committed_above > 0 {
            debug!(
                target: "seqstore::engine",
                committed_above,
                local_checkpoint = tracker.processed_checkpoint(),
                "Marked committed seqNos above the commit's local checkpoint"
            );
        }
        {
            let tracker = Arc::clone(&tracker);
            translog.set_persisted_seq_no_consumer(Arc::new(move |seq_no| {
                tracker.mark_seq_no_as_persisted(seq_no)
            }));
        }

        let commit_policy =
            CommitDeletionPolicy::new(index.list_commits(), translog.last_synced_global_checkpoint());
        let retention = RetentionPolicy::new(commit.min_retained_seq_no, config.retention_operations);
        let primary_term = translog.primary_term();
        let syncer = TranslogSyncer::start(Arc::clone(&translog))?;

        let engine = Engine {
            path: path.to_path_buf(),
            history_uuid: commit.history_uuid.clone(),
            lifecycle,
            tracker,
            translog,
            index,
            version_map: LiveVersionMap::new(),
            retention,
            commit_policy,
            primary_term: AtomicU64::new(primary_term),
            inflight: InFlightOps::default(),
            refresh_lock: Mutex::new(()),
            flush_lock: Mutex::new(()),
            recovery_lock: Mutex::new(()),
            recovery_start: commit.local_checkpoint,
            committed_translog_generation: AtomicU64::new(commit.translog_generation),
            syncer,
            _lock_file: lock_file,
            config,
        };
        engine.lifecycle.transition(EngineState::Recovering)?;

        info!(
            target: "seqstore::engine",
            path = %engine.path.display(),
            commit = commit.generation,
            max_seq_no = commit.max_seq_no,
            local_checkpoint = commit.local_checkpoint,
            primary_term,
            durability = engine.translog.durability().description(),
            "Opened shard"
        );
        Ok(engine)
    }

    // ========================================================================
    // Accessors / stats
    // ========================================================================

    /// Shard directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Settings in effect.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shard history identity.
    pub fn history_uuid(&self) -> &str {
        &self.history_uuid
    }

    /// Lifecycle state.
    pub fn state(&self) -> EngineState {
        self.lifecycle.state()
    }

    /// Reason recorded by `fail_engine`, if failed.
    pub fn failure_reason(&self) -> Option<String> {
        self.lifecycle.failure()
    }

    /// Term of the primary this copy follows or is.
    pub fn primary_term(&self) -> PrimaryTerm {
        self.primary_term.load(Ordering::SeqCst)
    }

    /// Max seqNo, processed local checkpoint and global checkpoint.
    pub fn seq_no_stats(&self) -> SeqNoStats {
        self.tracker.stats(self.translog.global_checkpoint())
    }

    /// Highest seqNo whose operation is durable in the translog with all below it.
    pub fn persisted_local_checkpoint(&self) -> SeqNo {
        self.tracker.persisted_checkpoint()
    }

    /// Translog sizes; "uncommitted" is relative to the last commit.
    pub fn translog_stats(&self) -> TranslogStats {
        self.translog
            .stats(self.committed_translog_generation.load(Ordering::SeqCst))
    }

    /// Live documents visible to searches.
    pub fn doc_count(&self) -> usize {
        self.index.searcher().doc_count()
    }

    /// Underlying index, for auditing.
    pub fn storage_index(&self) -> &Arc<dyn StorageIndex> {
        &self.index
    }

    /// Underlying translog, for auditing.
    pub fn translog(&self) -> &Arc<Translog> {
        &self.translog
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Close without flushing. Unflushed operations stay in the translog.
    pub fn close(&self) -> Result<()> {
        self.lifecycle.transition(EngineState::Closing)?;
        self.syncer.stop();
        let translog = self.translog.close();
        self.tracker.close();
        let index = self.index.close();
        self.lifecycle.transition(EngineState::Closed)?;
        info!(target: "seqstore::engine", path = %self.path.display(), "Closed shard");
        translog?;
        index?;
        Ok(())
    }

    /// Flush, then close.
    pub fn flush_and_close(&self) -> Result<()> {
        if self.state() == EngineState::Open {
            self.flush(false)?;
        }
        self.close()
    }

    /// Move to `Failed` and release resources. Later calls fail fast.
    pub fn fail_engine(&self, reason: &str) {
        if !self.lifecycle.fail(reason) {
            return;
        }
        self.tracker.close();
        if let Err(e) = self.translog.close() {
            warn!(target: "seqstore::engine", error = %e, "Translog close after failure");
        }
        if let Err(e) = self.index.close() {
            warn!(target: "seqstore::engine", error = %e, "Index close after failure");
        }
    }

    /// Fail the engine if `result` carries a fatal error.
    pub(crate) fn check_fatal<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.fail_engine(&e.to_string());
            }
        }
        result
    }

    pub(crate) fn ensure_durable(&self, location: Option<TranslogLocation>) -> Result<()> {
        if let Some(location) = location {
            if self.translog.durability().requires_immediate_fsync() {
                self.translog.ensure_synced(&location)?;
            }
        }
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.syncer.stop();
        match self.state() {
            EngineState::Recovering | EngineState::Open => {
                if let Err(e) = self.close() {
                    warn!(target: "seqstore::engine", error = %e, "Close on drop failed");
                }
            }
            _ => {}
        }
    }
}

/// Take the exclusive shard lock; fails if another process holds it.
fn acquire_dir_lock(path: &Path) -> Result<File> {
    std::fs::create_dir_all(path)?;
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path.join(LOCK_FILE))?;
    fs2::FileExt::try_lock_exclusive(&lock_file).map_err(|_| {
        Error::illegal_state(format!(
            "shard at '{}' is already in use by another process",
            path.display()
        ))
    })?;
    Ok(lock_file)
}
