//! seqstore - replicated single-shard document storage engine
//!
//! seqstore stores JSON documents for one shard copy and keeps primary and
//! replica copies consistent through sequence numbers, primary terms and a
//! write-ahead translog.
//!
//! # Quick Start
//!
//! ```ignore
//! use seqstore::{Engine, EngineConfig, Index};
//! use serde_json::json;
//!
//! let engine = Engine::create("/tmp/shard-0", EngineConfig::default())?;
//! engine.skip_translog_recovery()?;
//!
//! let result = engine.index(Index::primary("user-1", json!({ "name": "Alice" })))?;
//! let doc = engine.get("user-1")?;
//! ```
//!
//! # Architecture
//!
//! - `seqstore-core`: seqNos, versions, operations, results, errors
//! - `seqstore-concurrency`: local checkpoint tracker and live version map
//! - `seqstore-durability`: the translog
//! - `seqstore-storage`: the storage index contract and `DiskIndex`
//! - `seqstore-engine`: the shard engine that ties them together

pub use seqstore_core::{
    Delete, DeleteResult, Error, GetResult, Index, IndexResult, NoOp, NoOpResult, Operation,
    Origin, PrimaryTerm, Result, ResultKind, SeqNo, SeqNoStats, Version, VersionType, MATCH_ANY,
    MATCH_DELETED, NOT_FOUND, NO_OPS_PERFORMED, UNASSIGNED_PRIMARY_TERM, UNASSIGNED_SEQ_NO,
};
pub use seqstore_durability::{DurabilityMode, TranslogSnapshot, TranslogStats};
pub use seqstore_engine::{
    invariants, CommitInfo, CommitRef, Engine, EngineConfig, EngineState, GapFillPolicy,
    HistoryRetentionLock, OperationResult, RecoveryRetention, RecoveryStats, RetentionLease,
    ShardEngine,
};
pub use seqstore_storage::{Query, SearchHit, StorageIndex};
