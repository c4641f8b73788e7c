//! Shard engine for seqstore
//!
//! This crate orchestrates all lower layers for one shard copy:
//! - Engine: create/open/close, the write path, realtime get, refresh, flush
//! - Lifecycle: Starting → Recovering → Open → Closing → Closed, or Failed
//! - Recovery: local translog replay, promotion, seqNo gap filling
//! - Retention: leases, history retention locks, the retention floor
//! - Commit policy: safe commit selection and commit deletion
//! - Configuration: `engine.toml`
//! - Invariant checks for tests and auditing
//!
//! The engine is the only component that knows about:
//! - Primary vs. replica semantics
//! - Cross-layer coordination (index + translog + checkpoints)
//! - Which history must be retained

#![warn(missing_docs)]
#![warn(clippy::all)]

mod background;
pub mod commit_policy;
pub mod config;
pub mod engine;
pub mod invariants;
pub mod retention;
pub mod shard;
pub mod state;

pub use commit_policy::{
    find_safe_commit, CommitDeletionPolicy, CommitInfo, CommitRef, HISTORY_UUID_KEY,
    LOCAL_CHECKPOINT_KEY, MAX_SEQ_NO_KEY, MIN_RETAINED_SEQ_NO_KEY, TRANSLOG_GENERATION_KEY,
};
pub use config::{ConfigError, EngineConfig, GapFillPolicy, CONFIG_FILE_NAME};
pub use engine::{Engine, RecoveryStats, INDEX_DIR, LOCK_FILE, TRANSLOG_DIR};
pub use retention::{HistoryRetentionLock, RecoveryRetention, RetentionLease, RetentionPolicy};
pub use shard::{OperationResult, ShardEngine};
pub use state::EngineState;
