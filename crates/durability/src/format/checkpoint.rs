//! Translog checkpoint files.
//!
//! A checkpoint records how much of a generation is durable. The active
//! generation's checkpoint lives in `translog.ckp` and is rewritten on every
//! sync; when a generation is sealed its final checkpoint is copied to
//! `translog-<gen>.ckp`. Everything past a checkpoint's `offset` is treated
//! as never written.
//!
//! # Binary Format (68 bytes)
//!
//! ```text
//! magic("SQCK", 4) + version(4) + offset(8) + num_ops(8) + generation(8)
//! + min_seq_no(8) + max_seq_no(8) + global_checkpoint(8)
//! + min_translog_generation(8) + crc32(4) = 68 bytes
//! ```
//!
//! Files are replaced with write-fsync-rename so a reader sees either the
//! old or the new checkpoint, never a torn one.

use seqstore_core::{SeqNo, NO_OPS_PERFORMED};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Magic bytes for checkpoint files.
pub const CHECKPOINT_MAGIC: &[u8; 4] = b"SQCK";

/// Current checkpoint format version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Total size of a serialized checkpoint in bytes.
pub const CHECKPOINT_SIZE: usize = 68;

/// File name of the active generation's checkpoint.
pub const ACTIVE_CHECKPOINT_FILE: &str = "translog.ckp";

/// Durable extent of one translog generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Synced byte length of the generation file
    pub offset: u64,
    /// Operations within `offset`
    pub num_ops: u64,
    /// Generation described
    pub generation: u64,
    /// Lowest seqNo within `offset` (`NO_OPS_PERFORMED` when empty)
    pub min_seq_no: SeqNo,
    /// Highest seqNo within `offset` (`NO_OPS_PERFORMED` when empty)
    pub max_seq_no: SeqNo,
    /// Global checkpoint known at sync time
    pub global_checkpoint: SeqNo,
    /// Oldest generation still referenced
    pub min_translog_generation: u64,
}

impl Checkpoint {
    /// Checkpoint of a freshly created generation.
    pub fn empty(
        offset: u64,
        generation: u64,
        global_checkpoint: SeqNo,
        min_translog_generation: u64,
    ) -> Self {
        Checkpoint {
            offset,
            num_ops: 0,
            generation,
            min_seq_no: NO_OPS_PERFORMED,
            max_seq_no: NO_OPS_PERFORMED,
            global_checkpoint,
            min_translog_generation,
        }
    }

    /// Path of the active checkpoint.
    pub fn active_path(dir: &Path) -> PathBuf {
        dir.join(ACTIVE_CHECKPOINT_FILE)
    }

    /// Path of a sealed generation's checkpoint: `translog-<gen>.ckp`.
    pub fn sealed_path(dir: &Path, generation: u64) -> PathBuf {
        dir.join(format!("translog-{}.ckp", generation))
    }

    /// Write to `path` using write-fsync-rename.
    pub fn write_to_file(&self, path: &Path) -> Result<(), CheckpointFileError> {
        let temp_path = path.with_extension("ckp.tmp");
        let bytes = self.to_bytes();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(CheckpointFileError::Io)?;
        file.write_all(&bytes).map_err(CheckpointFileError::Io)?;
        file.sync_all().map_err(CheckpointFileError::Io)?;
        drop(file);

        std::fs::rename(&temp_path, path).map_err(CheckpointFileError::Io)?;
        sync_parent_dir(path).map_err(CheckpointFileError::Io)?;
        Ok(())
    }

    /// Read a checkpoint file.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub fn read_from_file(path: &Path) -> Result<Option<Self>, CheckpointFileError> {
        match std::fs::read(path) {
            Ok(data) => Ok(Some(Self::from_bytes(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CheckpointFileError::Io(e)),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(CHECKPOINT_SIZE);
        buf.extend_from_slice(CHECKPOINT_MAGIC);
        buf.extend_from_slice(&CHECKPOINT_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&self.num_ops.to_le_bytes());
        buf.extend_from_slice(&self.generation.to_le_bytes());
        buf.extend_from_slice(&self.min_seq_no.to_le_bytes());
        buf.extend_from_slice(&self.max_seq_no.to_le_bytes());
        buf.extend_from_slice(&self.global_checkpoint.to_le_bytes());
        buf.extend_from_slice(&self.min_translog_generation.to_le_bytes());
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Deserialize from bytes, validating magic, version, and CRC.
    pub fn from_bytes(data: &[u8]) -> Result<Self, CheckpointFileError> {
        if data.len() < CHECKPOINT_SIZE {
            return Err(CheckpointFileError::TooShort {
                expected: CHECKPOINT_SIZE,
                actual: data.len(),
            });
        }
        if &data[0..4] != CHECKPOINT_MAGIC {
            return Err(CheckpointFileError::InvalidMagic);
        }
        let version = u32::from_le_bytes(word4(data, 4));
        if version != CHECKPOINT_VERSION {
            return Err(CheckpointFileError::UnsupportedVersion(version));
        }
        let crc_offset = CHECKPOINT_SIZE - 4;
        let stored = u32::from_le_bytes(word4(data, crc_offset));
        let computed = crc32fast::hash(&data[..crc_offset]);
        if stored != computed {
            return Err(CheckpointFileError::ChecksumMismatch { stored, computed });
        }
        Ok(Checkpoint {
            offset: u64::from_le_bytes(word8(data, 8)),
            num_ops: u64::from_le_bytes(word8(data, 16)),
            generation: u64::from_le_bytes(word8(data, 24)),
            min_seq_no: i64::from_le_bytes(word8(data, 32)),
            max_seq_no: i64::from_le_bytes(word8(data, 40)),
            global_checkpoint: i64::from_le_bytes(word8(data, 48)),
            min_translog_generation: u64::from_le_bytes(word8(data, 56)),
        })
    }
}

fn word4(data: &[u8], at: usize) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(&data[at..at + 4]);
    out
}

fn word8(data: &[u8], at: usize) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&data[at..at + 8]);
    out
}

/// Fsync the directory containing `path` so a rename or create is durable.
pub(crate) fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if parent.exists() {
            File::open(parent)?.sync_all()?;
        }
    }
    Ok(())
}

/// Errors that can occur when reading or writing checkpoint files.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointFileError {
    /// Data too short to contain a checkpoint.
    #[error("checkpoint too short: expected {expected} bytes, got {actual}")]
    TooShort {
        /// Expected minimum size.
        expected: usize,
        /// Actual size.
        actual: usize,
    },

    /// Magic bytes do not match.
    #[error("invalid checkpoint magic")]
    InvalidMagic,

    /// Unsupported format version.
    #[error("unsupported checkpoint version: {0}")]
    UnsupportedVersion(u32),

    /// CRC mismatch.
    #[error("checkpoint checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// CRC stored in the file.
        stored: u32,
        /// CRC computed from data.
        computed: u32,
    },

    /// I/O error.
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
}
