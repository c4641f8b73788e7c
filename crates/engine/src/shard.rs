//! Shard-level operation surface.
//!
//! Replication and recovery code is written against `ShardEngine` rather
//! than `Engine`, so a copy can be driven from a stream of `Operation`s
//! without knowing which kind each one is.

use crate::commit_policy::CommitInfo;
use crate::engine::{Engine, RecoveryStats};
use seqstore_core::{
    Delete, DeleteResult, GetResult, Index, IndexResult, NoOp, NoOpResult, Operation, Result,
    SeqNo, SeqNoStats,
};

/// Outcome of applying one `Operation`
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    /// Result of an index
    Index(IndexResult),
    /// Result of a delete
    Delete(DeleteResult),
    /// Result of a no-op
    NoOp(NoOpResult),
}

impl OperationResult {
    /// SeqNo the operation was recorded under, if it was sequenced.
    pub fn seq_no(&self) -> SeqNo {
        match self {
            OperationResult::Index(r) => r.seq_no,
            OperationResult::Delete(r) => r.seq_no,
            OperationResult::NoOp(r) => r.seq_no,
        }
    }
}

/// Operations a shard copy supports
pub trait ShardEngine: Send + Sync {
    /// Index or overwrite a document.
    fn index(&self, op: Index) -> Result<IndexResult>;

    /// Delete a document.
    fn delete(&self, op: Delete) -> Result<DeleteResult>;

    /// Record a seqNo with no document effect.
    fn no_op(&self, op: NoOp) -> Result<NoOpResult>;

    /// Realtime get.
    fn get(&self, id: &str) -> Result<Option<GetResult>>;

    /// Make admitted writes visible to searches.
    fn refresh(&self) -> Result<()>;

    /// Commit the index.
    fn flush(&self, force: bool) -> Result<Option<CommitInfo>>;

    /// Replay the local translog and open.
    fn recover_from_translog(&self, max_seq_no: SeqNo) -> Result<RecoveryStats>;

    /// Checkpoint summary.
    fn seq_no_stats(&self) -> SeqNoStats;

    /// Dispatch `op` to `index`, `delete` or `no_op`.
    fn apply_operation(&self, op: Operation) -> Result<OperationResult> {
        match op {
            Operation::Index(op) => self.index(op).map(OperationResult::Index),
            Operation::Delete(op) => self.delete(op).map(OperationResult::Delete),
            Operation::NoOp(op) => self.no_op(op).map(OperationResult::NoOp),
        }
    }
}

impl ShardEngine for Engine {
    fn index(&self, op: Index) -> Result<IndexResult> {
        Engine::index(self, op)
    }

    fn delete(&self, op: Delete) -> Result<DeleteResult> {
        Engine::delete(self, op)
    }

    fn no_op(&self, op: NoOp) -> Result<NoOpResult> {
        Engine::no_op(self, op)
    }

    fn get(&self, id: &str) -> Result<Option<GetResult>> {
        Engine::get(self, id)
    }

    fn refresh(&self) -> Result<()> {
        Engine::refresh(self)
    }

    fn flush(&self, force: bool) -> Result<Option<CommitInfo>> {
        Engine::flush(self, force)
    }

    fn recover_from_translog(&self, max_seq_no: SeqNo) -> Result<RecoveryStats> {
        Engine::recover_from_translog(self, max_seq_no)
    }

    fn seq_no_stats(&self) -> SeqNoStats {
        Engine::seq_no_stats(self)
    }
}
