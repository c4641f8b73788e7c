//! Translog errors

use crate::format::{CheckpointFileError, TranslogHeaderError, TranslogRecordError};
use seqstore_core::SeqNo;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for translog operations
pub type TranslogResult<T> = std::result::Result<T, TranslogError>;

/// Errors raised by the translog
#[derive(Debug, Error)]
pub enum TranslogError {
    /// I/O error
    #[error("translog I/O error: {0}")]
    Io(#[from] io::Error),

    /// Bad bytes inside the durable region of a generation
    #[error("translog corrupted at generation {generation}, offset {offset}: {reason}")]
    Corrupted {
        /// Generation holding the bad bytes
        generation: u64,
        /// Byte offset of the bad record or header
        offset: u64,
        /// What failed
        reason: String,
    },

    /// Checkpoint file unreadable
    #[error("translog checkpoint {path:?} unreadable: {source}")]
    Checkpoint {
        /// Checkpoint file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: CheckpointFileError,
    },

    /// `translog.ckp` or a generation's files are missing
    #[error("translog file missing: {0:?}")]
    MissingFile(PathBuf),

    /// Translog belongs to another shard history
    #[error("translog history mismatch: expected {expected}, found {found}")]
    HistoryMismatch {
        /// History uuid the caller expected
        expected: String,
        /// History uuid found on disk
        found: String,
    },

    /// Pruning would delete operations that must be retained
    #[error("generation {generation} holds seq_no up to {max_seq_no}, at or above required {min_required_seq_no}")]
    RequiredOperationsDropped {
        /// Generation that would have been deleted
        generation: u64,
        /// Highest seqNo in that generation
        max_seq_no: SeqNo,
        /// Lowest seqNo that must survive
        min_required_seq_no: SeqNo,
    },

    /// Operation could not be encoded
    #[error("translog encode error: {0}")]
    Encode(String),

    /// Bad argument
    #[error("invalid translog argument: {0}")]
    InvalidArgument(String),

    /// The translog is closed (explicitly or after a fatal write failure)
    #[error("translog is closed")]
    Closed,
}

impl TranslogError {
    pub(crate) fn corrupted(generation: u64, offset: u64, reason: impl ToString) -> Self {
        TranslogError::Corrupted {
            generation,
            offset,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn checkpoint(path: PathBuf, source: CheckpointFileError) -> Self {
        match source {
            CheckpointFileError::Io(e) if e.kind() == io::ErrorKind::NotFound => {
                TranslogError::MissingFile(path)
            }
            source => TranslogError::Checkpoint { path, source },
        }
    }

    /// True for damaged or foreign on-disk state.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            TranslogError::Corrupted { .. }
                | TranslogError::Checkpoint { .. }
                | TranslogError::MissingFile(_)
                | TranslogError::HistoryMismatch { .. }
        )
    }
}

impl From<TranslogRecordError> for TranslogError {
    fn from(e: TranslogRecordError) -> Self {
        TranslogError::Encode(e.to_string())
    }
}

impl From<(u64, TranslogHeaderError)> for TranslogError {
    fn from((generation, e): (u64, TranslogHeaderError)) -> Self {
        TranslogError::corrupted(generation, 0, e)
    }
}

impl From<TranslogError> for seqstore_core::Error {
    fn from(e: TranslogError) -> Self {
        match e {
            TranslogError::Io(io) => seqstore_core::Error::Io(io),
            TranslogError::RequiredOperationsDropped { .. } => {
                seqstore_core::Error::InvariantViolation(e.to_string())
            }
            e if e.is_corruption() => seqstore_core::Error::Corruption(e.to_string()),
            TranslogError::InvalidArgument(msg) => seqstore_core::Error::InvalidInput(msg),
            other => seqstore_core::Error::Translog(other.to_string()),
        }
    }
}
