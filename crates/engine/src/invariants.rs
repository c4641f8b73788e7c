//! Consistency checks over an engine's durable state.
//!
//! These walk whole commits and translog ranges, so they are meant for
//! tests and offline auditing. Every check returns
//! `Error::InvariantViolation` describing the first problem found.

use crate::commit_policy::MAX_SEQ_NO_KEY;
use crate::engine::Engine;
use seqstore_core::{Error, Result, SeqNo};
use seqstore_durability::Translog;
use seqstore_storage::{IndexRecords, StorageIndex};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Every commit's `max-seq-no` is at least the highest seqNo it holds.
pub fn check_max_seq_no_in_commits(index: &dyn StorageIndex) -> Result<()> {
    for commit in index.list_commits() {
        let recorded = commit.seq_no(MAX_SEQ_NO_KEY).ok_or_else(|| {
            Error::invariant(format!(
                "commit {} has no {} entry",
                commit.generation, MAX_SEQ_NO_KEY
            ))
        })?;
        let records = index.commit_records(commit.generation)?;
        let held = records.max_seq_no();
        if held > recorded {
            return Err(Error::invariant(format!(
                "commit {} records {} = {} but holds seqNo {}",
                commit.generation, MAX_SEQ_NO_KEY, recorded, held
            )));
        }
    }
    Ok(())
}

/// No seqNo appears on more than one live document or tombstone.
pub fn check_at_most_one_record_per_seq_no(records: &IndexRecords) -> Result<()> {
    let mut seen = BTreeSet::new();
    for seq_no in records.seq_nos() {
        if !seen.insert(seq_no) {
            return Err(Error::invariant(format!(
                "seqNo {} is held by more than one record",
                seq_no
            )));
        }
    }
    Ok(())
}

/// Two copies hold the same live documents with the same seqNo, version
/// and source.
pub fn check_consistent_history(left: &IndexRecords, right: &IndexRecords) -> Result<()> {
    let left_docs: BTreeMap<_, _> = left.docs.iter().map(|d| (d.id.as_str(), d)).collect();
    let right_docs: BTreeMap<_, _> = right.docs.iter().map(|d| (d.id.as_str(), d)).collect();

    for (id, doc) in &left_docs {
        let Some(other) = right_docs.get(id) else {
            return Err(Error::invariant(format!("document '{}' missing on one copy", id)));
        };
        if doc.seq_no != other.seq_no || doc.version != other.version {
            return Err(Error::invariant(format!(
                "document '{}' diverged: seqNo {} v{} vs seqNo {} v{}",
                id, doc.seq_no, doc.version, other.seq_no, other.version
            )));
        }
        if doc.source != other.source {
            return Err(Error::invariant(format!("document '{}' source diverged", id)));
        }
    }
    if let Some(id) = right_docs.keys().find(|id| !left_docs.contains_key(*id)) {
        return Err(Error::invariant(format!("document '{}' missing on one copy", id)));
    }
    Ok(())
}

/// The translog still holds an operation for every seqNo in
/// `from_seq_no..=to_seq_no`.
pub fn check_retained_operations(translog: &Translog, from_seq_no: SeqNo, to_seq_no: SeqNo) -> Result<()> {
    if from_seq_no > to_seq_no {
        return Ok(());
    }
    let mut snapshot = translog.new_snapshot(from_seq_no, to_seq_no)?;
    let mut present = BTreeSet::new();
    while let Some(op) = snapshot.next_operation()? {
        present.insert(op.seq_no());
    }
    if let Some(missing) = (from_seq_no..=to_seq_no).find(|seq_no| !present.contains(seq_no)) {
        return Err(Error::invariant(format!(
            "translog no longer holds seqNo {} (required {}..={})",
            missing, from_seq_no, to_seq_no
        )));
    }
    Ok(())
}

/// Run every single-copy check against `engine`.
///
/// Covers the commits, the current index records, and translog retention
/// from the lower of the retention floor and the safe commit checkpoint + 1
/// up to the processed checkpoint.
pub fn audit(engine: &Engine) -> Result<()> {
    let index = engine.storage_index().as_ref();
    check_max_seq_no_in_commits(index)?;
    for commit in index.list_commits() {
        check_at_most_one_record_per_seq_no(&index.commit_records(commit.generation)?)?;
    }
    check_at_most_one_record_per_seq_no(&index.records())?;

    let safe = engine
        .acquire_safe_commit()
        .map(|commit| commit.info().local_checkpoint)?;
    let from_seq_no = engine.min_retained_seq_no().min(safe.saturating_add(1));
    let to_seq_no = engine.seq_no_stats().local_checkpoint;
    check_retained_operations(engine.translog(), from_seq_no, to_seq_no)?;

    debug!(
        target: "seqstore::engine",
        commits = index.list_commits().len(),
        from_seq_no,
        to_seq_no,
        "Audit passed"
    );
    Ok(())
}
