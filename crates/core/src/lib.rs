//! Core types for seqstore
//!
//! This crate defines the foundational types shared by every layer:
//! - SeqNo / PrimaryTerm / Version scalars and their sentinels
//! - VersionType and Origin: how an operation is versioned and where it came from
//! - Operation: the Index / Delete / NoOp sum type with a common header
//! - Result types returned by the engine (IndexResult, DeleteResult, ...)
//! - Error: the engine-level error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod operation;
pub mod result;
pub mod types;

pub use error::{Error, Result};
pub use operation::{Delete, Index, NoOp, OpHeader, OpType, Operation};
pub use result::{
    DeleteResult, GetResult, IndexResult, NoOpResult, ResultKind, SeqNoStats,
};
pub use types::{
    now_micros, Origin, PrimaryTerm, SeqNo, TranslogLocation, Version, VersionType, MATCH_ANY,
    MATCH_DELETED, NOT_FOUND, NO_OPS_PERFORMED, UNASSIGNED_PRIMARY_TERM, UNASSIGNED_SEQ_NO,
};
