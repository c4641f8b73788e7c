//! Active generation writer.
//!
//! Appends go straight to the OS through a shared `&File` under a short
//! state lock, so records are readable (for realtime gets and snapshots) as
//! soon as `append` returns. Durability is a separate step: `sync_to`
//! fsyncs and reports the seqNos that became durable.
//!
//! ## Sync batching
//!
//! ```text
//! caller A: sync_to(100) ── takes sync_lock ── fsync covers [0, 180) ── done
//! caller B: sync_to(150) ── waits on sync_lock ───────────────────────── synced >= 150, return
//! ```
//!
//! Only one fsync runs at a time and a caller whose target is already
//! covered returns without touching the disk.

use crate::error::{TranslogError, TranslogResult};
use crate::format::checkpoint::sync_parent_dir;
use crate::format::{TranslogHeader, TRANSLOG_HEADER_SIZE};
use crate::translog::reader::read_record_at;
use parking_lot::Mutex;
use seqstore_core::{Operation, SeqNo, TranslogLocation, NO_OPS_PERFORMED};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Extent of the generation captured for a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SyncPoint {
    pub(crate) offset: u64,
    pub(crate) num_ops: u64,
    pub(crate) min_seq_no: SeqNo,
    pub(crate) max_seq_no: SeqNo,
}

struct WriterState {
    offset: u64,
    num_ops: u64,
    min_seq_no: SeqNo,
    max_seq_no: SeqNo,
    unsynced_seq_nos: Vec<SeqNo>,
}

/// Writer for the active generation
pub(crate) struct GenerationWriter {
    generation: u64,
    path: PathBuf,
    file: File,
    read_file: Mutex<File>,
    state: Mutex<WriterState>,
    sync_lock: Mutex<()>,
    synced_offset: AtomicU64,
}

impl GenerationWriter {
    /// Create `translog-<gen>.tlog` and durably write its header.
    pub(crate) fn create(
        dir: &Path,
        generation: u64,
        primary_term: u64,
        history_uuid: Uuid,
    ) -> TranslogResult<Self> {
        let path = TranslogHeader::generation_path(dir, generation);
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)?;
        file.write_all(&TranslogHeader::new(generation, primary_term, history_uuid).to_bytes())?;
        file.sync_all()?;
        sync_parent_dir(&path)?;

        let read_file = OpenOptions::new().read(true).open(&path)?;
        let offset = TRANSLOG_HEADER_SIZE as u64;
        Ok(GenerationWriter {
            generation,
            path,
            file,
            read_file: Mutex::new(read_file),
            state: Mutex::new(WriterState {
                offset,
                num_ops: 0,
                min_seq_no: NO_OPS_PERFORMED,
                max_seq_no: NO_OPS_PERFORMED,
                unsynced_seq_nos: Vec::new(),
            }),
            sync_lock: Mutex::new(()),
            synced_offset: AtomicU64::new(offset),
        })
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Append one framed record.
    pub(crate) fn append(&self, record: &[u8], seq_no: SeqNo) -> TranslogResult<TranslogLocation> {
        let mut state = self.state.lock();
        (&self.file).write_all(record)?;
        let location = TranslogLocation::new(self.generation, state.offset, record.len() as u32);
        state.offset += record.len() as u64;
        state.num_ops += 1;
        state.min_seq_no = if state.min_seq_no == NO_OPS_PERFORMED {
            seq_no
        } else {
            state.min_seq_no.min(seq_no)
        };
        state.max_seq_no = state.max_seq_no.max(seq_no);
        state.unsynced_seq_nos.push(seq_no);
        Ok(location)
    }

    /// Bytes written so far, header included.
    pub(crate) fn written_offset(&self) -> u64 {
        self.state.lock().offset
    }

    /// Bytes known durable.
    pub(crate) fn synced_offset(&self) -> u64 {
        self.synced_offset.load(Ordering::SeqCst)
    }

    /// Operations appended but not yet fsynced.
    pub(crate) fn unsynced_ops(&self) -> usize {
        self.state.lock().unsynced_seq_nos.len()
    }

    /// Current extent of the generation.
    pub(crate) fn sync_point(&self) -> SyncPoint {
        let state = self.state.lock();
        SyncPoint {
            offset: state.offset,
            num_ops: state.num_ops,
            min_seq_no: state.min_seq_no,
            max_seq_no: state.max_seq_no,
        }
    }

    /// Make everything up to `target_offset` durable.
    ///
    /// `persist` runs after the fsync, still under the sync lock, and is
    /// where the caller writes the checkpoint. Returns the seqNos that became
    /// durable, or `None` if another sync already covered the target and
    /// `force` is false.
    pub(crate) fn sync_to<F>(
        &self,
        target_offset: u64,
        force: bool,
        persist: F,
    ) -> TranslogResult<Option<Vec<SeqNo>>>
    where
        F: FnOnce(SyncPoint) -> TranslogResult<()>,
    {
        if !force && self.synced_offset() >= target_offset {
            return Ok(None);
        }
        let _sync = self.sync_lock.lock();
        if !force && self.synced_offset() >= target_offset {
            return Ok(None);
        }

        let (point, seq_nos) = {
            let mut state = self.state.lock();
            let point = SyncPoint {
                offset: state.offset,
                num_ops: state.num_ops,
                min_seq_no: state.min_seq_no,
                max_seq_no: state.max_seq_no,
            };
            (point, std::mem::take(&mut state.unsynced_seq_nos))
        };

        self.file.sync_data()?;
        persist(point)?;
        self.synced_offset.fetch_max(point.offset, Ordering::SeqCst);
        Ok(Some(seq_nos))
    }

    /// Read back an operation appended to this generation.
    pub(crate) fn read_at(&self, location: &TranslogLocation) -> TranslogResult<Operation> {
        if location.end() > self.written_offset() {
            return Err(TranslogError::InvalidArgument(format!(
                "location {} beyond written end of generation {}",
                location, self.generation
            )));
        }
        read_record_at(&self.read_file, location)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::encode_operation;
    use seqstore_core::Delete;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn record(seq_no: SeqNo) -> Vec<u8> {
        encode_operation(&Delete::replica("d", seq_no, 1, 1).into()).unwrap()
    }

    #[test]
    fn test_append_tracks_extent() {
        let dir = tempdir().unwrap();
        let writer = GenerationWriter::create(dir.path(), 1, 1, Uuid::new_v4()).unwrap();
        let a = writer.append(&record(5), 5).unwrap();
        let b = writer.append(&record(3), 3).unwrap();
        assert_eq!(a.offset, TRANSLOG_HEADER_SIZE as u64);
        assert_eq!(b.offset, a.end());

        let point = writer.sync_point();
        assert_eq!(point.num_ops, 2);
        assert_eq!(point.min_seq_no, 3);
        assert_eq!(point.max_seq_no, 5);
        assert_eq!(writer.read_at(&b).unwrap().seq_no(), 3);
    }

    #[test]
    fn test_sync_reports_seq_nos_once() {
        let dir = tempdir().unwrap();
        let writer = GenerationWriter::create(dir.path(), 1, 1, Uuid::new_v4()).unwrap();
        let loc = writer.append(&record(0), 0).unwrap();
        writer.append(&record(1), 1).unwrap();

        let synced = writer.sync_to(loc.end(), false, |_| Ok(())).unwrap();
        assert_eq!(synced, Some(vec![0, 1]));
        assert_eq!(writer.synced_offset(), writer.written_offset());
        assert_eq!(writer.sync_to(loc.end(), false, |_| Ok(())).unwrap(), None);
        assert_eq!(writer.unsynced_ops(), 0);
    }

    #[test]
    fn test_create_refuses_existing_generation() {
        let dir = tempdir().unwrap();
        let uuid = Uuid::new_v4();
        GenerationWriter::create(dir.path(), 1, 1, uuid).unwrap();
        assert!(GenerationWriter::create(dir.path(), 1, 1, uuid).is_err());
    }

    #[test]
    fn test_concurrent_syncs_batch() {
        let dir = tempdir().unwrap();
        let writer = Arc::new(GenerationWriter::create(dir.path(), 1, 1, Uuid::new_v4()).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let writer = Arc::clone(&writer);
                thread::spawn(move || {
                    let loc = writer.append(&record(i), i).unwrap();
                    writer
                        .sync_to(loc.end(), false, |_| Ok(()))
                        .unwrap()
                        .unwrap_or_default()
                })
            })
            .collect();
        let mut persisted: Vec<SeqNo> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        persisted.sort_unstable();
        assert_eq!(persisted, (0..8).collect::<Vec<_>>());
        assert_eq!(writer.synced_offset(), writer.written_offset());
    }
}
