//! Translog: the shard's generation-based write-ahead log.
//!
//! # Directory Layout
//!
//! ```text
//! translog/
//! ├── translog-3.tlog     sealed generation
//! ├── translog-3.ckp      its final checkpoint
//! ├── translog-4.tlog     active generation
//! └── translog.ckp        active generation's last synced checkpoint
//! ```
//!
//! `translog.ckp` is the root of trust: it names the active generation,
//! how much of it is durable, and the oldest generation still referenced.
//! Files outside `[min_translog_generation, active]` are leftovers of an
//! interrupted roll or prune and are deleted on open.
//!
//! # Lifecycle
//!
//! - `create_empty`: fresh log for a new shard copy (one empty generation)
//! - `open`: validate every referenced generation, seal the previous active
//!   generation at its synced offset (discarding the unsynced tail) and
//!   start a new generation
//! - `roll_generation`: sync, seal, start the next generation
//! - `prune_generations`: delete sealed generations no longer required
//!
//! Any I/O failure while appending or syncing closes the translog; the
//! engine treats that as fatal.

mod reader;
mod snapshot;
mod writer;

pub use snapshot::TranslogSnapshot;

use crate::config::{DurabilityMode, TranslogConfig};
use crate::error::{TranslogError, TranslogResult};
use crate::format::header::TRANSLOG_FILE_PREFIX;
use crate::format::{encode_operation, Checkpoint, TranslogHeader, TRANSLOG_HEADER_SIZE};
use parking_lot::{Mutex, RwLock};
use reader::{validate_header, GenerationReader};
use seqstore_core::{Operation, PrimaryTerm, SeqNo, TranslogLocation, NO_OPS_PERFORMED};
use snapshot::{PinRegistry, SnapshotSource};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use writer::{GenerationWriter, SyncPoint};

/// Callback receiving every seqNo that became durable
pub type PersistedSeqNoConsumer = Arc<dyn Fn(SeqNo) + Send + Sync>;

/// Size and operation counts of the translog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TranslogStats {
    /// Operations across all retained generations
    pub operations: u64,
    /// Bytes across all retained generations
    pub size_in_bytes: u64,
    /// Number of retained generations, active included
    pub generations: usize,
    /// Operations in generations at or above the committed generation
    pub uncommitted_operations: u64,
    /// Bytes in generations at or above the committed generation
    pub uncommitted_size_in_bytes: u64,
    /// Active generation
    pub current_generation: u64,
    /// Oldest retained generation
    pub min_generation: u64,
}

struct Inner {
    /// Sealed generations, oldest first
    readers: Vec<Arc<GenerationReader>>,
    current: Arc<GenerationWriter>,
    min_generation: u64,
}

/// Generation-based write-ahead log of a shard
pub struct Translog {
    dir: PathBuf,
    config: TranslogConfig,
    history_uuid: Uuid,
    inner: RwLock<Inner>,
    pins: Arc<PinRegistry>,
    primary_term: AtomicU64,
    global_checkpoint: AtomicI64,
    last_synced_global_checkpoint: AtomicI64,
    persisted_consumer: RwLock<Option<PersistedSeqNoConsumer>>,
    closed: AtomicBool,
    tragic: Mutex<Option<String>>,
}

impl Translog {
    // ========================================================================
    // Creation / open
    // ========================================================================

    /// Create a fresh, empty translog for a new shard copy.
    ///
    /// Any translog files already in `dir` are removed.
    ///
    /// # Arguments
    /// * `dir` - Translog directory (created if missing)
    /// * `history_uuid` - Shard history identity written into every header
    /// * `primary_term` - Term of the first generation
    pub fn create_empty(dir: &Path, history_uuid: &str, primary_term: PrimaryTerm) -> TranslogResult<()> {
        let uuid = parse_uuid(history_uuid)?;
        fs::create_dir_all(dir)?;
        for (path, _) in list_translog_files(dir)? {
            fs::remove_file(&path)?;
        }
        let active = Checkpoint::active_path(dir);
        if active.exists() {
            fs::remove_file(&active)?;
        }

        let generation = 1;
        GenerationWriter::create(dir, generation, primary_term, uuid)?;
        let checkpoint = Checkpoint::empty(TRANSLOG_HEADER_SIZE as u64, generation, NO_OPS_PERFORMED, generation);
        checkpoint
            .write_to_file(&active)
            .map_err(|e| TranslogError::checkpoint(active.clone(), e))?;

        info!(target: "seqstore::translog", dir = ?dir, %history_uuid, primary_term, "created empty translog");
        Ok(())
    }

    /// Open an existing translog.
    ///
    /// Validates every referenced generation against `expected_history_uuid`,
    /// seals the previous active generation at its last synced offset and
    /// starts a new generation.
    ///
    /// # Errors
    /// - `MissingFile` if `translog.ckp` or a referenced generation is gone
    /// - `HistoryMismatch` if a header belongs to another history
    /// - `Corrupted` if a header is damaged or synced bytes are missing
    pub fn open(dir: &Path, config: TranslogConfig, expected_history_uuid: &str) -> TranslogResult<Self> {
        config
            .validate()
            .map_err(|e| TranslogError::InvalidArgument(e.to_string()))?;
        let uuid = parse_uuid(expected_history_uuid)?;

        let active_path = Checkpoint::active_path(dir);
        let active = Checkpoint::read_from_file(&active_path)
            .map_err(|e| TranslogError::checkpoint(active_path.clone(), e))?
            .ok_or_else(|| TranslogError::MissingFile(active_path.clone()))?;
        let last_generation = active.generation;
        let min_generation = active.min_translog_generation.min(last_generation);

        let mut readers = Vec::new();
        for generation in min_generation..last_generation {
            let path = Checkpoint::sealed_path(dir, generation);
            let checkpoint = Checkpoint::read_from_file(&path)
                .map_err(|e| TranslogError::checkpoint(path.clone(), e))?
                .ok_or_else(|| TranslogError::MissingFile(path.clone()))?;
            readers.push(Arc::new(GenerationReader::open(dir, checkpoint, &uuid)?));
        }

        let primary_term = Self::seal_previous_active(dir, &active, &uuid)?;
        readers.push(Arc::new(GenerationReader::open(dir, active, &uuid)?));

        Self::delete_unreferenced_files(dir, min_generation, last_generation)?;

        let generation = last_generation + 1;
        let current = GenerationWriter::create(dir, generation, primary_term, uuid)?;
        Checkpoint::empty(TRANSLOG_HEADER_SIZE as u64, generation, active.global_checkpoint, min_generation)
            .write_to_file(&active_path)
            .map_err(|e| TranslogError::checkpoint(active_path.clone(), e))?;

        info!(
            target: "seqstore::translog",
            dir = ?dir,
            min_generation,
            generation,
            sealed_ops = active.num_ops,
            "opened translog"
        );

        Ok(Translog {
            dir: dir.to_path_buf(),
            config,
            history_uuid: uuid,
            inner: RwLock::new(Inner {
                readers,
                current: Arc::new(current),
                min_generation,
            }),
            pins: Arc::new(PinRegistry::default()),
            primary_term: AtomicU64::new(primary_term),
            global_checkpoint: AtomicI64::new(active.global_checkpoint),
            last_synced_global_checkpoint: AtomicI64::new(active.global_checkpoint),
            persisted_consumer: RwLock::new(None),
            closed: AtomicBool::new(false),
            tragic: Mutex::new(None),
        })
    }

    /// Cut the previous active generation back to its synced offset and
    /// write its sealed checkpoint. Returns the generation's primary term.
    fn seal_previous_active(dir: &Path, active: &Checkpoint, uuid: &Uuid) -> TranslogResult<PrimaryTerm> {
        let generation = active.generation;
        let path = TranslogHeader::generation_path(dir, generation);
        let mut file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(TranslogError::MissingFile(path)),
            Err(e) => return Err(e.into()),
        };
        let header = validate_header(&mut file, generation, uuid)?;

        let len = file.metadata()?.len();
        if len < active.offset {
            return Err(TranslogError::corrupted(
                generation,
                len,
                format!("synced region ends at {} but file is {} bytes", active.offset, len),
            ));
        }
        if len > active.offset {
            warn!(
                target: "seqstore::translog",
                generation,
                discarded_bytes = len - active.offset,
                "discarding unsynced translog tail"
            );
            file.set_len(active.offset)?;
            file.sync_all()?;
        }

        let sealed = Checkpoint::sealed_path(dir, generation);
        active
            .write_to_file(&sealed)
            .map_err(|e| TranslogError::checkpoint(sealed.clone(), e))?;
        Ok(header.primary_term)
    }

    fn delete_unreferenced_files(dir: &Path, min_generation: u64, last_generation: u64) -> TranslogResult<()> {
        for (path, generation) in list_translog_files(dir)? {
            if generation < min_generation || generation > last_generation {
                debug!(target: "seqstore::translog", ?path, "deleting unreferenced translog file");
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Register the callback that receives durable seqNos.
    pub fn set_persisted_seq_no_consumer(&self, consumer: PersistedSeqNoConsumer) {
        *self.persisted_consumer.write() = Some(consumer);
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Append an operation to the active generation.
    ///
    /// The record is readable immediately; it is durable only after a sync
    /// covers its location. In Standard mode an inline sync runs once
    /// `batch_size` operations are unsynced, and the generation is rolled
    /// once it exceeds `generation_threshold_bytes`.
    pub fn append(&self, op: &Operation) -> TranslogResult<TranslogLocation> {
        self.ensure_open()?;
        let record = encode_operation(op)?;
        let (location, unsynced, written) = {
            let inner = self.inner.read();
            let location = self.on_failure(inner.current.append(&record, op.seq_no()))?;
            (location, inner.current.unsynced_ops(), inner.current.written_offset())
        };

        if let DurabilityMode::Standard { batch_size, .. } = self.config.durability {
            if unsynced >= batch_size {
                self.sync()?;
            }
        }
        if written > self.config.generation_threshold_bytes {
            self.roll_generation_if_over(location.generation)?;
        }
        Ok(location)
    }

    /// Make sure the operation at `location` is durable.
    ///
    /// Returns `true` if this call performed the fsync. Concurrent callers
    /// share fsyncs: a location already covered returns `false` at once.
    pub fn ensure_synced(&self, location: &TranslogLocation) -> TranslogResult<bool> {
        self.ensure_open()?;
        let inner = self.inner.read();
        if location.generation < inner.current.generation() {
            // Sealed generations were fully synced when rolled.
            return Ok(false);
        }
        let synced = self.sync_writer(&inner, location.end(), false)?;
        Ok(synced)
    }

    /// Fsync the active generation and persist the global checkpoint.
    pub fn sync(&self) -> TranslogResult<()> {
        self.ensure_open()?;
        let inner = self.inner.read();
        let target = inner.current.written_offset();
        let force = self.global_checkpoint.load(Ordering::SeqCst)
            > self.last_synced_global_checkpoint.load(Ordering::SeqCst);
        self.sync_writer(&inner, target, force)?;
        Ok(())
    }

    /// True if there are appended but unsynced operations or an unpersisted global checkpoint.
    pub fn sync_needed(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let inner = self.inner.read();
        inner.current.synced_offset() < inner.current.written_offset()
            || self.global_checkpoint.load(Ordering::SeqCst)
                > self.last_synced_global_checkpoint.load(Ordering::SeqCst)
    }

    fn sync_writer(&self, inner: &Inner, target: u64, force: bool) -> TranslogResult<bool> {
        let global_checkpoint = self.global_checkpoint.load(Ordering::SeqCst);
        let generation = inner.current.generation();
        let min_generation = inner.min_generation;
        let active_path = Checkpoint::active_path(&self.dir);

        let result = inner.current.sync_to(target, force, |point: SyncPoint| {
            checkpoint_for(generation, point, global_checkpoint, min_generation)
                .write_to_file(&active_path)
                .map_err(|e| TranslogError::checkpoint(active_path.clone(), e))
        });
        let Some(seq_nos) = self.on_failure(result)? else {
            return Ok(false);
        };

        self.last_synced_global_checkpoint
            .fetch_max(global_checkpoint, Ordering::SeqCst);
        if let Some(consumer) = self.persisted_consumer.read().as_ref() {
            for seq_no in seq_nos {
                consumer(seq_no);
            }
        }
        Ok(true)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read back the operation at `location`.
    ///
    /// Returns `Ok(None)` if its generation has been pruned.
    pub fn read_operation(&self, location: &TranslogLocation) -> TranslogResult<Option<Operation>> {
        self.ensure_open()?;
        let inner = self.inner.read();
        if location.generation == inner.current.generation() {
            return inner.current.read_at(location).map(Some);
        }
        match inner
            .readers
            .iter()
            .find(|r| r.generation() == location.generation)
        {
            Some(reader) => reader.read_at(location).map(Some),
            None => Ok(None),
        }
    }

    /// Snapshot of operations with `from_seq_no <= seq_no <= to_seq_no`.
    ///
    /// The snapshot covers every operation appended before this call and
    /// pins the generations it reads until dropped.
    pub fn new_snapshot(&self, from_seq_no: SeqNo, to_seq_no: SeqNo) -> TranslogResult<TranslogSnapshot> {
        self.ensure_open()?;
        if from_seq_no > to_seq_no {
            return Err(TranslogError::InvalidArgument(format!(
                "from_seq_no {} > to_seq_no {}",
                from_seq_no, to_seq_no
            )));
        }
        let inner = self.inner.read();
        let current = inner.current.sync_point();

        let mut sources = vec![SnapshotSource {
            generation: inner.current.generation(),
            path: inner.current.path().to_path_buf(),
            end_offset: current.offset,
            num_ops: current.num_ops,
        }];
        for reader in inner.readers.iter().rev() {
            sources.push(SnapshotSource {
                generation: reader.generation(),
                path: reader.path().to_path_buf(),
                end_offset: reader.size_in_bytes(),
                num_ops: reader.num_ops(),
            });
        }
        let pins = self.pins.pin(sources.iter().map(|s| s.generation).collect());
        Ok(TranslogSnapshot::new(sources, from_seq_no, to_seq_no, pins))
    }

    // ========================================================================
    // Generations
    // ========================================================================

    /// Sync and seal the active generation, then start a new one.
    ///
    /// Returns the new generation.
    pub fn roll_generation(&self) -> TranslogResult<u64> {
        self.ensure_open()?;
        let mut inner = self.inner.write();
        let result = self.roll_locked(&mut inner);
        self.on_failure(result)
    }

    fn roll_generation_if_over(&self, generation: u64) -> TranslogResult<()> {
        let mut inner = self.inner.write();
        if inner.current.generation() != generation
            || inner.current.written_offset() <= self.config.generation_threshold_bytes
        {
            return Ok(());
        }
        let result = self.roll_locked(&mut inner);
        self.on_failure(result)?;
        Ok(())
    }

    fn roll_locked(&self, inner: &mut Inner) -> TranslogResult<u64> {
        let target = inner.current.written_offset();
        self.sync_writer(inner, target, true)?;

        let old_generation = inner.current.generation();
        let sealed = checkpoint_for(
            old_generation,
            inner.current.sync_point(),
            self.last_synced_global_checkpoint.load(Ordering::SeqCst),
            inner.min_generation,
        );
        let sealed_path = Checkpoint::sealed_path(&self.dir, old_generation);
        sealed
            .write_to_file(&sealed_path)
            .map_err(|e| TranslogError::checkpoint(sealed_path.clone(), e))?;

        let generation = old_generation + 1;
        let writer = GenerationWriter::create(
            &self.dir,
            generation,
            self.primary_term.load(Ordering::SeqCst),
            self.history_uuid,
        )?;
        let active_path = Checkpoint::active_path(&self.dir);
        Checkpoint::empty(
            TRANSLOG_HEADER_SIZE as u64,
            generation,
            self.last_synced_global_checkpoint.load(Ordering::SeqCst),
            inner.min_generation,
        )
        .write_to_file(&active_path)
        .map_err(|e| TranslogError::checkpoint(active_path.clone(), e))?;

        let reader = GenerationReader::open(&self.dir, sealed, &self.history_uuid)?;
        inner.readers.push(Arc::new(reader));
        inner.current = Arc::new(writer);

        debug!(target: "seqstore::translog", sealed = old_generation, generation, "rolled translog generation");
        Ok(generation)
    }

    /// Delete sealed generations below `min_generation`.
    ///
    /// Generations pinned by open snapshots are kept. Returns the number of
    /// generations deleted.
    ///
    /// # Errors
    /// Returns `RequiredOperationsDropped` without deleting anything if a
    /// generation to delete holds a seqNo at or above `min_required_seq_no`.
    pub fn prune_generations(&self, min_generation: u64, min_required_seq_no: SeqNo) -> TranslogResult<usize> {
        self.ensure_open()?;
        let mut inner = self.inner.write();
        let mut keep_from = min_generation.min(inner.current.generation());
        if let Some(pinned) = self.pins.min_pinned() {
            keep_from = keep_from.min(pinned);
        }

        let doomed: Vec<Arc<GenerationReader>> = inner
            .readers
            .iter()
            .filter(|r| r.generation() < keep_from)
            .cloned()
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        for reader in &doomed {
            if reader.num_ops() > 0 && reader.max_seq_no() >= min_required_seq_no {
                return Err(TranslogError::RequiredOperationsDropped {
                    generation: reader.generation(),
                    max_seq_no: reader.max_seq_no(),
                    min_required_seq_no,
                });
            }
        }

        // Persist the new lower bound first: a crash after this point
        // leaves files that open() deletes as unreferenced.
        inner.min_generation = keep_from;
        let target = inner.current.written_offset();
        let result = self.sync_writer(&inner, target, true);
        self.on_failure(result)?;

        inner.readers.retain(|r| r.generation() >= keep_from);
        for reader in &doomed {
            fs::remove_file(reader.path())?;
            let ckp = Checkpoint::sealed_path(&self.dir, reader.generation());
            if ckp.exists() {
                fs::remove_file(&ckp)?;
            }
        }
        info!(
            target: "seqstore::translog",
            deleted = doomed.len(),
            min_generation = keep_from,
            "pruned translog generations"
        );
        Ok(doomed.len())
    }

    /// Oldest generation holding an operation with seqNo >= `seq_no`.
    ///
    /// Returns the active generation if no retained generation does.
    pub fn min_generation_for_seq_no(&self, seq_no: SeqNo) -> u64 {
        let inner = self.inner.read();
        inner
            .readers
            .iter()
            .filter(|r| r.num_ops() > 0 && r.max_seq_no() >= seq_no)
            .map(|r| r.generation())
            .min()
            .unwrap_or_else(|| inner.current.generation())
    }

    /// Active generation.
    pub fn current_generation(&self) -> u64 {
        self.inner.read().current.generation()
    }

    /// Oldest retained generation.
    pub fn min_generation(&self) -> u64 {
        self.inner.read().min_generation
    }

    // ========================================================================
    // Checkpoints / terms
    // ========================================================================

    /// Record a newer global checkpoint; persisted on the next sync.
    pub fn update_global_checkpoint(&self, global_checkpoint: SeqNo) {
        self.global_checkpoint
            .fetch_max(global_checkpoint, Ordering::SeqCst);
    }

    /// Latest global checkpoint handed to the translog.
    pub fn global_checkpoint(&self) -> SeqNo {
        self.global_checkpoint.load(Ordering::SeqCst)
    }

    /// Global checkpoint written by the last successful sync.
    pub fn last_synced_global_checkpoint(&self) -> SeqNo {
        self.last_synced_global_checkpoint.load(Ordering::SeqCst)
    }

    /// Term written into the header of the next generation.
    pub fn set_primary_term(&self, primary_term: PrimaryTerm) -> TranslogResult<()> {
        let current = self.primary_term.load(Ordering::SeqCst);
        if primary_term < current {
            return Err(TranslogError::InvalidArgument(format!(
                "primary term {} is older than current term {}",
                primary_term, current
            )));
        }
        self.primary_term.store(primary_term, Ordering::SeqCst);
        Ok(())
    }

    /// Current primary term.
    pub fn primary_term(&self) -> PrimaryTerm {
        self.primary_term.load(Ordering::SeqCst)
    }

    /// Shard history identity.
    pub fn history_uuid(&self) -> String {
        self.history_uuid.to_string()
    }

    /// Translog directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Durability policy in effect.
    pub fn durability(&self) -> DurabilityMode {
        self.config.durability
    }

    // ========================================================================
    // Stats / lifecycle
    // ========================================================================

    /// Sizes and counts; "uncommitted" counts generations >= `committed_generation`.
    pub fn stats(&self, committed_generation: u64) -> TranslogStats {
        let inner = self.inner.read();
        let current = inner.current.sync_point();
        let mut stats = TranslogStats {
            generations: inner.readers.len() + 1,
            current_generation: inner.current.generation(),
            min_generation: inner.min_generation,
            ..TranslogStats::default()
        };
        let generations = inner
            .readers
            .iter()
            .map(|r| (r.generation(), r.num_ops(), r.size_in_bytes()))
            .chain(std::iter::once((inner.current.generation(), current.num_ops, current.offset)));
        for (generation, ops, bytes) in generations {
            stats.operations += ops;
            stats.size_in_bytes += bytes;
            if generation >= committed_generation {
                stats.uncommitted_operations += ops;
                stats.uncommitted_size_in_bytes += bytes;
            }
        }
        stats
    }

    /// Sync and close. Later calls fail with `TranslogError::Closed`.
    pub fn close(&self) -> TranslogResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.sync();
        self.closed.store(true, Ordering::SeqCst);
        debug!(target: "seqstore::translog", "translog closed");
        result
    }

    /// True until closed or failed.
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// The failure that closed the translog, if any.
    pub fn tragic_exception(&self) -> Option<String> {
        self.tragic.lock().clone()
    }

    fn ensure_open(&self) -> TranslogResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TranslogError::Closed);
        }
        Ok(())
    }

    /// Close on write-path failures; the log may no longer match its checkpoint.
    fn on_failure<T>(&self, result: TranslogResult<T>) -> TranslogResult<T> {
        if let Err(e) = &result {
            if !matches!(e, TranslogError::Closed | TranslogError::InvalidArgument(_)) {
                error!(target: "seqstore::translog", error = %e, "translog failed, closing");
                let mut tragic = self.tragic.lock();
                if tragic.is_none() {
                    *tragic = Some(e.to_string());
                }
                self.closed.store(true, Ordering::SeqCst);
            }
        }
        result
    }
}

impl std::fmt::Debug for Translog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Translog")
            .field("dir", &self.dir)
            .field("history_uuid", &self.history_uuid)
            .field("current_generation", &self.current_generation())
            .finish()
    }
}

fn checkpoint_for(generation: u64, point: SyncPoint, global_checkpoint: SeqNo, min_generation: u64) -> Checkpoint {
    Checkpoint {
        offset: point.offset,
        num_ops: point.num_ops,
        generation,
        min_seq_no: point.min_seq_no,
        max_seq_no: point.max_seq_no,
        global_checkpoint,
        min_translog_generation: min_generation,
    }
}

fn parse_uuid(history_uuid: &str) -> TranslogResult<Uuid> {
    Uuid::parse_str(history_uuid)
        .map_err(|e| TranslogError::InvalidArgument(format!("bad history uuid {:?}: {}", history_uuid, e)))
}

/// Every `translog-<gen>.tlog` / `translog-<gen>.ckp` file in `dir`.
fn list_translog_files(dir: &Path) -> TranslogResult<Vec<(PathBuf, u64)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(rest) = name.strip_prefix(TRANSLOG_FILE_PREFIX) else {
            continue;
        };
        let generation = rest
            .strip_suffix(".tlog")
            .or_else(|| rest.strip_suffix(".ckp"))
            .and_then(|g| g.parse::<u64>().ok());
        if let Some(generation) = generation {
            files.push((entry.path(), generation));
        }
    }
    Ok(files)
}
