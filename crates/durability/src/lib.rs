//! Durability layer for seqstore
//!
//! This crate owns the shard's write-ahead log, the translog:
//!
//! - Generation files: `translog-<gen>.tlog`, a header plus framed,
//!   CRC-checked operation records
//! - Checkpoint files: `translog.ckp` for the active generation and
//!   `translog-<gen>.ckp` for sealed ones
//! - Durability modes: Always (fsync per write) and Standard (periodic)
//! - Snapshots: restartable, seqNo-ranged, newest-copy-wins iteration
//! - Generation rolling and pruning bounded by the retention floor

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod format;
pub mod translog;

pub use config::{DurabilityMode, TranslogConfig, TranslogConfigError};
pub use error::{TranslogError, TranslogResult};
pub use format::{
    Checkpoint, CheckpointFileError, TranslogHeader, TranslogHeaderError, TranslogRecordError,
    ACTIVE_CHECKPOINT_FILE, TRANSLOG_HEADER_SIZE,
};
pub use translog::{PersistedSeqNoConsumer, Translog, TranslogSnapshot, TranslogStats};
