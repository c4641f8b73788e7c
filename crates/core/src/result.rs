//! Per-operation results
//!
//! Version conflicts, mapping updates and document failures are ordinary
//! outcomes of a write, so they are carried in the result value instead of
//! the error channel.

use crate::types::{PrimaryTerm, SeqNo, Version, NOT_FOUND, UNASSIGNED_PRIMARY_TERM, UNASSIGNED_SEQ_NO};
use serde::{Deserialize, Serialize};

/// Outcome category of a write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultKind {
    /// The operation was applied (or already reflected)
    Success,
    /// Version policy rejected the write; nothing changed
    Conflict,
    /// The document introduces unmapped fields; nothing changed
    MappingUpdateRequired,
    /// The document was rejected after sequencing; the seqNo was consumed by a NoOp
    Failure,
}

/// Result of an index operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexResult {
    /// True when no live document existed before
    pub created: bool,
    /// Resulting version (current version on conflict)
    pub version: Version,
    /// Assigned seqNo (`UNASSIGNED_SEQ_NO` if none was consumed)
    pub seq_no: SeqNo,
    /// Term of the seqNo
    pub primary_term: PrimaryTerm,
    /// Outcome
    pub kind: ResultKind,
    /// Conflict or failure explanation
    pub failure: Option<String>,
}

impl IndexResult {
    /// Applied write.
    pub fn success(created: bool, version: Version, seq_no: SeqNo, primary_term: PrimaryTerm) -> Self {
        IndexResult {
            created,
            version,
            seq_no,
            primary_term,
            kind: ResultKind::Success,
            failure: None,
        }
    }

    /// Rejected by the version policy.
    pub fn conflict(current_version: Version, reason: impl Into<String>) -> Self {
        IndexResult {
            created: false,
            version: current_version,
            seq_no: UNASSIGNED_SEQ_NO,
            primary_term: UNASSIGNED_PRIMARY_TERM,
            kind: ResultKind::Conflict,
            failure: Some(reason.into()),
        }
    }

    /// Rejected because the document needs new mapped fields.
    pub fn mapping_update_required(fields: &[String]) -> Self {
        IndexResult {
            created: false,
            version: NOT_FOUND,
            seq_no: UNASSIGNED_SEQ_NO,
            primary_term: UNASSIGNED_PRIMARY_TERM,
            kind: ResultKind::MappingUpdateRequired,
            failure: Some(format!("unmapped fields: [{}]", fields.join(", "))),
        }
    }

    /// Rejected document; `seq_no` is the NoOp that replaced it, if any.
    pub fn failure(seq_no: SeqNo, primary_term: PrimaryTerm, reason: impl Into<String>) -> Self {
        IndexResult {
            created: false,
            version: NOT_FOUND,
            seq_no,
            primary_term,
            kind: ResultKind::Failure,
            failure: Some(reason.into()),
        }
    }

    /// True for `ResultKind::Success`.
    pub fn is_success(&self) -> bool {
        self.kind == ResultKind::Success
    }
}

/// Result of a delete operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResult {
    /// True when a live document was removed
    pub found: bool,
    /// Resulting version (current version on conflict)
    pub version: Version,
    /// Assigned seqNo
    pub seq_no: SeqNo,
    /// Term of the seqNo
    pub primary_term: PrimaryTerm,
    /// Outcome
    pub kind: ResultKind,
    /// Conflict or failure explanation
    pub failure: Option<String>,
}

impl DeleteResult {
    /// Applied delete.
    pub fn success(found: bool, version: Version, seq_no: SeqNo, primary_term: PrimaryTerm) -> Self {
        DeleteResult {
            found,
            version,
            seq_no,
            primary_term,
            kind: ResultKind::Success,
            failure: None,
        }
    }

    /// Rejected by the version policy.
    pub fn conflict(current_version: Version, reason: impl Into<String>) -> Self {
        DeleteResult {
            found: false,
            version: current_version,
            seq_no: UNASSIGNED_SEQ_NO,
            primary_term: UNASSIGNED_PRIMARY_TERM,
            kind: ResultKind::Conflict,
            failure: Some(reason.into()),
        }
    }

    /// True for `ResultKind::Success`.
    pub fn is_success(&self) -> bool {
        self.kind == ResultKind::Success
    }
}

/// Result of a NoOp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoOpResult {
    /// Consumed seqNo
    pub seq_no: SeqNo,
    /// Term of the seqNo
    pub primary_term: PrimaryTerm,
}

/// A document returned by `get`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetResult {
    /// Document id
    pub id: String,
    /// Current version
    pub version: Version,
    /// SeqNo of the write that produced this version
    pub seq_no: SeqNo,
    /// Term of that write
    pub primary_term: PrimaryTerm,
    /// Document body
    pub source: serde_json::Value,
}

/// Sequence number summary of a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqNoStats {
    /// Highest seqNo seen
    pub max_seq_no: SeqNo,
    /// Processed checkpoint
    pub local_checkpoint: SeqNo,
    /// Last known global checkpoint
    pub global_checkpoint: SeqNo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_result_constructors() {
        let ok = IndexResult::success(true, 1, 0, 1);
        assert!(ok.is_success());
        assert!(ok.created);

        let conflict = IndexResult::conflict(5, "current version [5] is higher");
        assert_eq!(conflict.kind, ResultKind::Conflict);
        assert_eq!(conflict.version, 5);
        assert_eq!(conflict.seq_no, UNASSIGNED_SEQ_NO);

        let mapping = IndexResult::mapping_update_required(&["a".to_string(), "b".to_string()]);
        assert_eq!(mapping.failure.as_deref(), Some("unmapped fields: [a, b]"));

        let failed = IndexResult::failure(3, 1, "document failure: too large");
        assert_eq!(failed.kind, ResultKind::Failure);
        assert_eq!(failed.seq_no, 3);
    }

    #[test]
    fn test_delete_result_constructors() {
        let ok = DeleteResult::success(false, 1, 2, 1);
        assert!(ok.is_success());
        assert!(!ok.found);
        assert!(!DeleteResult::conflict(2, "x").is_success());
    }
}
