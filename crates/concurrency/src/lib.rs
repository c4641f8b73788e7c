//! Concurrency primitives for seqstore
//!
//! This crate holds the in-memory state that lets many writer threads share
//! one shard:
//! - LocalCheckpointTracker: seqNo generation and processed/persisted checkpoints
//! - LiveVersionMap: authoritative per-document version/seqNo for unrefreshed writes
//! - KeyedLock: striped per-document locks that linearise writers of one id

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
pub mod id_lock;
pub mod version_map;

pub use checkpoint::{CheckpointError, LocalCheckpointTracker};
pub use id_lock::{IdGuard, KeyedLock};
pub use version_map::{LiveVersionMap, VersionValue};
