//! Operation model
//!
//! Every write that enters the engine is one of three operations sharing a
//! common [`OpHeader`]:
//!
//! - [`Index`]: create or replace a document
//! - [`Delete`]: remove a document (always leaves a tombstone)
//! - [`NoOp`]: consume a seqNo without touching any document
//!
//! On the primary the header arrives with `seq_no == UNASSIGNED_SEQ_NO`
//! and the engine fills in seqNo, term and version. Every other origin
//! supplies them and the engine honours them as given.

use crate::types::{
    now_micros, Origin, PrimaryTerm, SeqNo, Version, VersionType, MATCH_ANY, UNASSIGNED_PRIMARY_TERM,
    UNASSIGNED_SEQ_NO,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation kind discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    /// Document index
    Index,
    /// Document delete
    Delete,
    /// Sequence number placeholder
    NoOp,
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpType::Index => write!(f, "index"),
            OpType::Delete => write!(f, "delete"),
            OpType::NoOp => write!(f, "no_op"),
        }
    }
}

/// Envelope shared by all operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpHeader {
    /// Sequence number, or `UNASSIGNED_SEQ_NO` before the primary assigns one
    pub seq_no: SeqNo,
    /// Term of the primary that assigned the seqNo
    pub primary_term: PrimaryTerm,
    /// Declared version (primary) or resulting version (everywhere else)
    pub version: Version,
    /// How `version` is interpreted
    pub version_type: VersionType,
    /// Where the operation came from
    pub origin: Origin,
    /// Wall-clock creation time in microseconds
    pub start_time: u64,
}

impl OpHeader {
    /// Header for a primary write: unsequenced, any version.
    pub fn primary() -> Self {
        OpHeader {
            seq_no: UNASSIGNED_SEQ_NO,
            primary_term: UNASSIGNED_PRIMARY_TERM,
            version: MATCH_ANY,
            version_type: VersionType::Internal,
            origin: Origin::Primary,
            start_time: now_micros(),
        }
    }

    /// Header for an operation that already carries its seqNo, term and version.
    pub fn sequenced(seq_no: SeqNo, primary_term: PrimaryTerm, version: Version, origin: Origin) -> Self {
        OpHeader {
            seq_no,
            primary_term,
            version,
            version_type: VersionType::Internal,
            origin,
            start_time: now_micros(),
        }
    }
}

/// Create or replace a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Index {
    /// Document id
    pub id: String,
    /// Document body; must be a JSON object
    pub source: serde_json::Value,
    /// Common envelope
    pub header: OpHeader,
    /// Compare-and-set on the current seqNo (`UNASSIGNED_SEQ_NO` disables)
    pub if_seq_no: SeqNo,
    /// Compare-and-set on the current primary term (0 disables)
    pub if_primary_term: PrimaryTerm,
}

impl Index {
    /// Primary-origin index request.
    pub fn primary(id: impl Into<String>, source: serde_json::Value) -> Self {
        Index {
            id: id.into(),
            source,
            header: OpHeader::primary(),
            if_seq_no: UNASSIGNED_SEQ_NO,
            if_primary_term: UNASSIGNED_PRIMARY_TERM,
        }
    }

    /// Replica-origin index carrying the primary's seqNo, term and version.
    pub fn replica(
        id: impl Into<String>,
        source: serde_json::Value,
        seq_no: SeqNo,
        primary_term: PrimaryTerm,
        version: Version,
    ) -> Self {
        Index {
            id: id.into(),
            source,
            header: OpHeader::sequenced(seq_no, primary_term, version, Origin::Replica),
            if_seq_no: UNASSIGNED_SEQ_NO,
            if_primary_term: UNASSIGNED_PRIMARY_TERM,
        }
    }

    /// Set the declared version and its interpretation.
    pub fn with_version(mut self, version: Version, version_type: VersionType) -> Self {
        self.header.version = version;
        self.header.version_type = version_type;
        self
    }

    /// Only apply if the document's current seqNo and term match.
    pub fn with_if_seq_no(mut self, seq_no: SeqNo, primary_term: PrimaryTerm) -> Self {
        self.if_seq_no = seq_no;
        self.if_primary_term = primary_term;
        self
    }

    /// Override the origin.
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.header.origin = origin;
        self
    }
}

/// Remove a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delete {
    /// Document id
    pub id: String,
    /// Common envelope
    pub header: OpHeader,
    /// Compare-and-set on the current seqNo (`UNASSIGNED_SEQ_NO` disables)
    pub if_seq_no: SeqNo,
    /// Compare-and-set on the current primary term (0 disables)
    pub if_primary_term: PrimaryTerm,
}

impl Delete {
    /// Primary-origin delete request.
    pub fn primary(id: impl Into<String>) -> Self {
        Delete {
            id: id.into(),
            header: OpHeader::primary(),
            if_seq_no: UNASSIGNED_SEQ_NO,
            if_primary_term: UNASSIGNED_PRIMARY_TERM,
        }
    }

    /// Replica-origin delete carrying the primary's seqNo, term and version.
    pub fn replica(id: impl Into<String>, seq_no: SeqNo, primary_term: PrimaryTerm, version: Version) -> Self {
        Delete {
            id: id.into(),
            header: OpHeader::sequenced(seq_no, primary_term, version, Origin::Replica),
            if_seq_no: UNASSIGNED_SEQ_NO,
            if_primary_term: UNASSIGNED_PRIMARY_TERM,
        }
    }

    /// Set the declared version and its interpretation.
    pub fn with_version(mut self, version: Version, version_type: VersionType) -> Self {
        self.header.version = version;
        self.header.version_type = version_type;
        self
    }

    /// Only apply if the document's current seqNo and term match.
    pub fn with_if_seq_no(mut self, seq_no: SeqNo, primary_term: PrimaryTerm) -> Self {
        self.if_seq_no = seq_no;
        self.if_primary_term = primary_term;
        self
    }

    /// Override the origin.
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.header.origin = origin;
        self
    }
}

/// Consume a seqNo without touching documents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoOp {
    /// Common envelope; `seq_no` must be assigned
    pub header: OpHeader,
    /// Why the seqNo carries no document change
    pub reason: String,
}

impl NoOp {
    /// NoOp for an already-assigned seqNo.
    pub fn new(seq_no: SeqNo, primary_term: PrimaryTerm, origin: Origin, reason: impl Into<String>) -> Self {
        NoOp {
            header: OpHeader::sequenced(seq_no, primary_term, 1, origin),
            reason: reason.into(),
        }
    }
}

/// Any operation the engine sequences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Index operation
    Index(Index),
    /// Delete operation
    Delete(Delete),
    /// NoOp operation
    NoOp(NoOp),
}

impl Operation {
    /// Shared envelope.
    pub fn header(&self) -> &OpHeader {
        match self {
            Operation::Index(op) => &op.header,
            Operation::Delete(op) => &op.header,
            Operation::NoOp(op) => &op.header,
        }
    }

    fn header_mut(&mut self) -> &mut OpHeader {
        match self {
            Operation::Index(op) => &mut op.header,
            Operation::Delete(op) => &mut op.header,
            Operation::NoOp(op) => &mut op.header,
        }
    }

    /// Sequence number.
    pub fn seq_no(&self) -> SeqNo {
        self.header().seq_no
    }

    /// Primary term.
    pub fn primary_term(&self) -> PrimaryTerm {
        self.header().primary_term
    }

    /// Version.
    pub fn version(&self) -> Version {
        self.header().version
    }

    /// Origin.
    pub fn origin(&self) -> Origin {
        self.header().origin
    }

    /// Document id, `None` for NoOps.
    pub fn id(&self) -> Option<&str> {
        match self {
            Operation::Index(op) => Some(&op.id),
            Operation::Delete(op) => Some(&op.id),
            Operation::NoOp(_) => None,
        }
    }

    /// Kind of operation.
    pub fn op_type(&self) -> OpType {
        match self {
            Operation::Index(_) => OpType::Index,
            Operation::Delete(_) => OpType::Delete,
            Operation::NoOp(_) => OpType::NoOp,
        }
    }

    /// Same operation re-tagged with a different origin.
    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.header_mut().origin = origin;
        self
    }
}

impl From<Index> for Operation {
    fn from(op: Index) -> Self {
        Operation::Index(op)
    }
}

impl From<Delete> for Operation {
    fn from(op: Delete) -> Self {
        Operation::Delete(op)
    }
}

impl From<NoOp> for Operation {
    fn from(op: NoOp) -> Self {
        Operation::NoOp(op)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id() {
            Some(id) => write!(
                f,
                "{}[id={}, seq_no={}, term={}, version={}]",
                self.op_type(),
                id,
                self.seq_no(),
                self.primary_term(),
                self.version()
            ),
            None => write!(
                f,
                "{}[seq_no={}, term={}]",
                self.op_type(),
                self.seq_no(),
                self.primary_term()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primary_index_is_unsequenced() {
        let op = Index::primary("1", json!({"f": 1}));
        assert_eq!(op.header.seq_no, UNASSIGNED_SEQ_NO);
        assert_eq!(op.header.version, MATCH_ANY);
        assert_eq!(op.header.origin, Origin::Primary);
        assert_eq!(op.if_seq_no, UNASSIGNED_SEQ_NO);
    }

    #[test]
    fn test_replica_delete_carries_sequence() {
        let op = Delete::replica("1", 4, 2, 3);
        assert_eq!(op.header.seq_no, 4);
        assert_eq!(op.header.primary_term, 2);
        assert_eq!(op.header.version, 3);
        assert_eq!(op.header.origin, Origin::Replica);
    }

    #[test]
    fn test_operation_accessors() {
        let op: Operation = Index::replica("a", json!({}), 7, 1, 2).into();
        assert_eq!(op.id(), Some("a"));
        assert_eq!(op.seq_no(), 7);
        assert_eq!(op.op_type(), OpType::Index);

        let noop: Operation = NoOp::new(9, 1, Origin::Primary, "gap").into();
        assert_eq!(noop.id(), None);
        assert_eq!(noop.op_type(), OpType::NoOp);
    }

    #[test]
    fn test_with_origin_retags() {
        let op: Operation = Delete::replica("x", 1, 1, 1).into();
        let op = op.with_origin(Origin::LocalTranslogRecovery);
        assert_eq!(op.origin(), Origin::LocalTranslogRecovery);
    }

    #[test]
    fn test_msgpack_encoding_preserves_source() {
        let op: Operation = Index::replica("doc", json!({"name": "x", "n": [1, 2]}), 3, 1, 1).into();
        let bytes = rmp_serde::to_vec_named(&op).unwrap();
        let back: Operation = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_display() {
        let op: Operation = Index::replica("doc", json!({}), 3, 1, 1).into();
        assert_eq!(op.to_string(), "index[id=doc, seq_no=3, term=1, version=1]");
    }
}
