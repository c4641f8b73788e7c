//! Storage index for seqstore
//!
//! This crate defines the contract between the engine and its document
//! index, and ships an embedded implementation:
//!
//! - `StorageIndex`: add/update/delete, refresh, searchers, commit points
//! - `DiskIndex`: in-memory state persisted as whole-state commit files
//! - `Tombstone`: history records for deletes, no-ops and stale replica writes
//! - `Query`: exact-match queries (match all, term, ids)
//!
//! `DiskIndex` is a stand-in honouring the commit and document contract; it
//! does no text analysis or scoring.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod commit;
pub mod disk;
pub mod document;
pub mod error;
pub mod index;
pub mod mapping;
pub mod query;

pub use commit::{CommitData, UserData};
pub use disk::{DiskIndex, IndexConfig};
pub use document::{DocVersion, SearchHit, StoredDoc, Tombstone, TombstoneKind};
pub use error::{StorageError, StorageResult};
pub use index::{CommitPoint, IndexRecords, Searcher, StorageIndex};
pub use mapping::Mapping;
pub use query::Query;
