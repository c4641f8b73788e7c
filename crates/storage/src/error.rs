//! Storage index errors

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for storage index operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Errors raised by a storage index
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error
    #[error("index I/O error: {0}")]
    Io(#[from] io::Error),

    /// Commit file failed validation
    #[error("commit file {path:?} corrupted: {reason}")]
    Corruption {
        /// Offending file
        path: PathBuf,
        /// What failed
        reason: String,
    },

    /// Commit payload could not be encoded or decoded
    #[error("index serialization error: {0}")]
    Serialization(String),

    /// The document was rejected by the pre-check; the index is unchanged
    #[error("document rejected: {0}")]
    DocumentRejected(String),

    /// No commit with that generation exists
    #[error("commit generation {0} not found")]
    CommitNotFound(u64),

    /// Index is closed
    #[error("index is closed")]
    Closed,
}

impl StorageError {
    pub(crate) fn corruption(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StorageError::Corruption {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// True for per-document rejections that leave the index usable.
    pub fn is_document_failure(&self) -> bool {
        matches!(self, StorageError::DocumentRejected(_))
    }
}

impl From<StorageError> for seqstore_core::Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Io(io) => seqstore_core::Error::Io(io),
            StorageError::Corruption { .. } => seqstore_core::Error::Corruption(e.to_string()),
            StorageError::DocumentRejected(reason) => seqstore_core::Error::InvalidInput(reason),
            StorageError::Closed => seqstore_core::Error::EngineClosed,
            other => seqstore_core::Error::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_into_engine_error() {
        let err: seqstore_core::Error = StorageError::corruption("commit-000001.dat", "bad crc").into();
        assert!(matches!(err, seqstore_core::Error::Corruption(_)));
        assert!(err.is_fatal());

        let err: seqstore_core::Error = StorageError::DocumentRejected("too large".into()).into();
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_document_failure_classification() {
        assert!(StorageError::DocumentRejected("x".into()).is_document_failure());
        assert!(!StorageError::Closed.is_document_failure());
    }
}
