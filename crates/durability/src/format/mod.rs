//! On-disk byte formats for the translog.
//!
//! Keeping serialization separate from operational logic (how generations
//! are written, rolled and pruned) makes format evolution easier to manage.
//!
//! # Module Structure
//!
//! - `header`: generation file header and file naming
//! - `record`: framed, checksummed operation records
//! - `checkpoint`: `translog.ckp` / `translog-<gen>.ckp` checkpoint files

pub mod checkpoint;
pub mod header;
pub mod record;

pub use checkpoint::{
    Checkpoint, CheckpointFileError, ACTIVE_CHECKPOINT_FILE, CHECKPOINT_MAGIC, CHECKPOINT_SIZE,
    CHECKPOINT_VERSION,
};
pub use header::{
    TranslogHeader, TranslogHeaderError, TRANSLOG_FORMAT_VERSION, TRANSLOG_HEADER_SIZE,
    TRANSLOG_MAGIC,
};
pub use record::{
    decode_operation, encode_operation, TranslogRecordError, MAX_RECORD_SIZE,
    RECORD_FORMAT_VERSION, RECORD_OVERHEAD,
};
