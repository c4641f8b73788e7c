//! Records held by the index: live documents and tombstones.
//!
//! Every assigned seqNo ends up as exactly one record. Index operations
//! produce a [`StoredDoc`] (which replaces any earlier live copy of the same
//! id); deletes, no-ops and out-of-order replica writes produce a
//! [`Tombstone`].

use seqstore_core::{PrimaryTerm, SeqNo, Version};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A live document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDoc {
    /// Document id
    pub id: String,
    /// JSON object body
    pub source: Value,
    /// SeqNo of the write that produced this copy
    pub seq_no: SeqNo,
    /// Term of that write
    pub primary_term: PrimaryTerm,
    /// Document version
    pub version: Version,
}

impl StoredDoc {
    /// Construct a live document record.
    pub fn new(
        id: impl Into<String>,
        source: Value,
        seq_no: SeqNo,
        primary_term: PrimaryTerm,
        version: Version,
    ) -> Self {
        StoredDoc {
            id: id.into(),
            source,
            seq_no,
            primary_term,
            version,
        }
    }

    /// Version coordinates of this copy.
    pub fn doc_version(&self) -> DocVersion {
        DocVersion {
            version: self.version,
            seq_no: self.seq_no,
            primary_term: self.primary_term,
            deleted: false,
        }
    }
}

/// Why a tombstone exists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TombstoneKind {
    /// A document delete
    Delete,
    /// A no-op consuming a seqNo
    NoOp {
        /// Reason recorded with the no-op
        reason: String,
    },
    /// A replica write that arrived after a newer write to the same document
    Stale,
}

/// History record of a seqNo that holds no live document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    /// Document id (`None` for no-ops)
    pub id: Option<String>,
    /// SeqNo consumed
    pub seq_no: SeqNo,
    /// Term of the operation
    pub primary_term: PrimaryTerm,
    /// Version carried by the operation
    pub version: Version,
    /// Kind of record
    pub kind: TombstoneKind,
}

impl Tombstone {
    /// Tombstone for a delete of `id`.
    pub fn delete(id: impl Into<String>, seq_no: SeqNo, primary_term: PrimaryTerm, version: Version) -> Self {
        Tombstone {
            id: Some(id.into()),
            seq_no,
            primary_term,
            version,
            kind: TombstoneKind::Delete,
        }
    }

    /// Tombstone for a no-op.
    pub fn no_op(seq_no: SeqNo, primary_term: PrimaryTerm, reason: impl Into<String>) -> Self {
        Tombstone {
            id: None,
            seq_no,
            primary_term,
            version: 1,
            kind: TombstoneKind::NoOp { reason: reason.into() },
        }
    }

    /// Tombstone for an out-of-order replica write to `id`.
    pub fn stale(id: impl Into<String>, seq_no: SeqNo, primary_term: PrimaryTerm, version: Version) -> Self {
        Tombstone {
            id: Some(id.into()),
            seq_no,
            primary_term,
            version,
            kind: TombstoneKind::Stale,
        }
    }

    /// True for delete tombstones.
    pub fn is_delete(&self) -> bool {
        matches!(self.kind, TombstoneKind::Delete)
    }
}

/// Current version coordinates of a document id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocVersion {
    /// Version
    pub version: Version,
    /// SeqNo of the write that set it
    pub seq_no: SeqNo,
    /// Term of that write
    pub primary_term: PrimaryTerm,
    /// True if the latest write was a delete
    pub deleted: bool,
}

/// One hit returned by a search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Document id
    pub id: String,
    /// Document version
    pub version: Version,
    /// SeqNo of the copy returned
    pub seq_no: SeqNo,
    /// Term of the copy returned
    pub primary_term: PrimaryTerm,
    /// Document body
    pub source: Value,
}

impl From<&StoredDoc> for SearchHit {
    fn from(doc: &StoredDoc) -> Self {
        SearchHit {
            id: doc.id.clone(),
            version: doc.version,
            seq_no: doc.seq_no,
            primary_term: doc.primary_term,
            source: doc.source.clone(),
        }
    }
}
