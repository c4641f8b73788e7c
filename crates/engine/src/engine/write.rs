//! Index, delete and no-op write paths.

use super::Engine;
use seqstore_concurrency::{IdGuard, VersionValue};
use seqstore_core::{
    now_micros, Delete, DeleteResult, Error, Index, IndexResult, NoOp, NoOpResult, OpHeader,
    Operation, Origin, PrimaryTerm, Result, SeqNo, TranslogLocation, Version, VersionType,
    MATCH_ANY, NOT_FOUND, UNASSIGNED_PRIMARY_TERM, UNASSIGNED_SEQ_NO,
};
use seqstore_storage::{DocVersion, StorageError, StoredDoc, Tombstone};
use tracing::{debug, warn};

/// How a sequenced (non-primary) operation relates to the current document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    /// Newer than what the index holds
    Apply,
    /// The index already reflects this exact operation
    Skip,
    /// Older than what the index holds; record it without touching the doc
    Stale,
}

fn plan_for(seq_no: SeqNo, current: Option<&DocVersion>) -> Plan {
    match current {
        None => Plan::Apply,
        Some(c) if seq_no > c.seq_no => Plan::Apply,
        Some(c) if seq_no == c.seq_no => Plan::Skip,
        Some(_) => Plan::Stale,
    }
}

struct Conflict {
    current_version: Version,
    reason: String,
}

impl Engine {
    // ========================================================================
    // Index
    // ========================================================================

    /// Create or replace a document.
    ///
    /// Version conflicts, mapping rejections and document failures are
    /// returned as results; `Err` means the request was malformed or the
    /// engine cannot accept writes.
    pub fn index(&self, op: Index) -> Result<IndexResult> {
        self.lifecycle.ensure_writable(op.header.origin)?;
        let result = if op.header.origin.is_primary() {
            self.index_primary(op)
        } else {
            self.index_sequenced(op)
        };
        self.check_fatal(result)
    }

    fn index_primary(&self, mut op: Index) -> Result<IndexResult> {
        validate_primary_request(&op.id, &op.header, op.if_seq_no, op.if_primary_term)?;
        if !self.config.dynamic_mapping {
            let unmapped = self.index.mapping().unmapped_fields(&op.source);
            if !unmapped.is_empty() {
                debug!(target: "seqstore::engine", id = %op.id, ?unmapped, "Mapping update required");
                return Ok(IndexResult::mapping_update_required(&unmapped));
            }
        }

        let guard = self.version_map.acquire_lock(&op.id);
        let current = self.resolve_version(&op.id, &guard)?;
        if let Some(conflict) = check_conflict(&op.header, op.if_seq_no, op.if_primary_term, current.as_ref()) {
            debug!(target: "seqstore::engine", id = %op.id, reason = %conflict.reason, "Index conflict");
            return Ok(IndexResult::conflict(conflict.current_version, conflict.reason));
        }

        let term = self.primary_term();
        if !self.config.noop_on_document_failure {
            if let Err(e) = self.index.validate_document(&op.id, &op.source) {
                return document_failure_unsequenced(e, term);
            }
        }

        let current_version = current.as_ref().map_or(NOT_FOUND, |c| c.version);
        let version = op.header.version_type.update_version(current_version, op.header.version);
        let seq_no = self.tracker.generate_seq_no();
        let _inflight = self.inflight.begin(seq_no);
        op.header.seq_no = seq_no;
        op.header.primary_term = term;
        op.header.version = version;

        if let Err(e) = self.index.validate_document(&op.id, &op.source) {
            drop(guard);
            return self.record_document_failure(seq_no, term, Origin::Primary, e);
        }

        let created = current.map_or(true, |c| c.deleted);
        let location = self.apply_index(&op, &guard)?;
        drop(guard);
        self.ensure_durable(location)?;
        debug!(target: "seqstore::engine", id = %op.id, seq_no, version, created, "Indexed");
        Ok(IndexResult::success(created, version, seq_no, term))
    }

    pub(super) fn index_sequenced(&self, op: Index) -> Result<IndexResult> {
        validate_sequenced_header(&op.header)?;
        let seq_no = op.header.seq_no;
        let term = op.header.primary_term;
        let version = op.header.version;
        self.tracker.advance_max_seq_no(seq_no);
        let _inflight = self.inflight.begin(seq_no);

        if self.tracker.has_processed(seq_no) {
            let location = self.log_only(&Operation::Index(op))?;
            self.ensure_durable(location)?;
            return Ok(IndexResult::success(false, version, seq_no, term));
        }
        if let Err(e) = self.index.validate_document(&op.id, &op.source) {
            return self.record_document_failure(seq_no, term, op.header.origin, e);
        }

        let guard = self.version_map.acquire_lock(&op.id);
        let current = self.resolve_version(&op.id, &guard)?;
        let plan = plan_for(seq_no, current.as_ref());
        let created = plan == Plan::Apply && current.as_ref().map_or(true, |c| c.deleted);
        let location = match plan {
            Plan::Apply => self.apply_index(&op, &guard)?,
            Plan::Skip => {
                let location = self.log_only(&Operation::Index(op.clone()))?;
                self.tracker.mark_seq_no_as_processed(seq_no);
                location
            }
            Plan::Stale => {
                let location = self.log_only(&Operation::Index(op.clone()))?;
                self.index
                    .add_tombstone(Tombstone::stale(op.id.clone(), seq_no, term, version))?;
                self.tracker.mark_seq_no_as_processed(seq_no);
                location
            }
        };
        drop(guard);
        self.ensure_durable(location)?;
        debug!(
            target: "seqstore::engine",
            id = %op.id,
            seq_no,
            origin = %op.header.origin,
            ?plan,
            "Applied sequenced index"
        );
        Ok(IndexResult::success(created, version, seq_no, term))
    }

    fn apply_index(&self, op: &Index, guard: &IdGuard<'_>) -> Result<Option<TranslogLocation>> {
        let header = &op.header;
        let location = self.log_only(&Operation::Index(op.clone()))?;
        self.index.index_document(StoredDoc::new(
            op.id.clone(),
            op.source.clone(),
            header.seq_no,
            header.primary_term,
            header.version,
        ))?;
        self.version_map.put_index_under_lock(
            &op.id,
            VersionValue::index(header.version, header.seq_no, header.primary_term, location),
            guard,
        );
        self.tracker.mark_seq_no_as_processed(header.seq_no);
        Ok(location)
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Delete a document. A tombstone is written even if no live document
    /// existed; `found` reports whether one did.
    pub fn delete(&self, op: Delete) -> Result<DeleteResult> {
        self.lifecycle.ensure_writable(op.header.origin)?;
        let result = if op.header.origin.is_primary() {
            self.delete_primary(op)
        } else {
            self.delete_sequenced(op)
        };
        self.check_fatal(result)
    }

    fn delete_primary(&self, mut op: Delete) -> Result<DeleteResult> {
        validate_primary_request(&op.id, &op.header, op.if_seq_no, op.if_primary_term)?;

        let guard = self.version_map.acquire_lock(&op.id);
        let current = self.resolve_version(&op.id, &guard)?;
        if let Some(conflict) = check_conflict(&op.header, op.if_seq_no, op.if_primary_term, current.as_ref()) {
            debug!(target: "seqstore::engine", id = %op.id, reason = %conflict.reason, "Delete conflict");
            return Ok(DeleteResult::conflict(conflict.current_version, conflict.reason));
        }

        let current_version = current.as_ref().map_or(NOT_FOUND, |c| c.version);
        let version = op.header.version_type.update_version(current_version, op.header.version);
        let term = self.primary_term();
        let seq_no = self.tracker.generate_seq_no();
        let _inflight = self.inflight.begin(seq_no);
        op.header.seq_no = seq_no;
        op.header.primary_term = term;
        op.header.version = version;

        let found = current.map_or(false, |c| !c.deleted);
        let location = self.apply_delete(&op, &guard)?;
        drop(guard);
        self.ensure_durable(location)?;
        debug!(target: "seqstore::engine", id = %op.id, seq_no, version, found, "Deleted");
        Ok(DeleteResult::success(found, version, seq_no, term))
    }

    pub(super) fn delete_sequenced(&self, op: Delete) -> Result<DeleteResult> {
        validate_sequenced_header(&op.header)?;
        if op.id.is_empty() {
            return Err(Error::invalid_input("document id must not be empty"));
        }
        let seq_no = op.header.seq_no;
        let term = op.header.primary_term;
        let version = op.header.version;
        self.tracker.advance_max_seq_no(seq_no);
        let _inflight = self.inflight.begin(seq_no);

        if self.tracker.has_processed(seq_no) {
            let location = self.log_only(&Operation::Delete(op))?;
            self.ensure_durable(location)?;
            return Ok(DeleteResult::success(false, version, seq_no, term));
        }

        let guard = self.version_map.acquire_lock(&op.id);
        let current = self.resolve_version(&op.id, &guard)?;
        let plan = plan_for(seq_no, current.as_ref());
        let found = plan == Plan::Apply && current.as_ref().map_or(false, |c| !c.deleted);
        let location = match plan {
            Plan::Apply => self.apply_delete(&op, &guard)?,
            Plan::Skip => {
                let location = self.log_only(&Operation::Delete(op.clone()))?;
                self.tracker.mark_seq_no_as_processed(seq_no);
                location
            }
            Plan::Stale => {
                let location = self.log_only(&Operation::Delete(op.clone()))?;
                self.index
                    .add_tombstone(Tombstone::stale(op.id.clone(), seq_no, term, version))?;
                self.tracker.mark_seq_no_as_processed(seq_no);
                location
            }
        };
        drop(guard);
        self.ensure_durable(location)?;
        debug!(
            target: "seqstore::engine",
            id = %op.id,
            seq_no,
            origin = %op.header.origin,
            ?plan,
            "Applied sequenced delete"
        );
        Ok(DeleteResult::success(found, version, seq_no, term))
    }

    fn apply_delete(&self, op: &Delete, guard: &IdGuard<'_>) -> Result<Option<TranslogLocation>> {
        let header = &op.header;
        let location = self.log_only(&Operation::Delete(op.clone()))?;
        self.index.delete_document(Tombstone::delete(
            op.id.clone(),
            header.seq_no,
            header.primary_term,
            header.version,
        ))?;
        self.version_map.put_delete_under_lock(
            &op.id,
            VersionValue::delete(header.version, header.seq_no, header.primary_term, now_micros()),
            guard,
        );
        self.tracker.mark_seq_no_as_processed(header.seq_no);
        Ok(location)
    }

    // ========================================================================
    // No-op
    // ========================================================================

    /// Consume an already-assigned seqNo without touching any document.
    pub fn no_op(&self, op: NoOp) -> Result<NoOpResult> {
        self.lifecycle.ensure_writable(op.header.origin)?;
        let result = self.no_op_inner(op);
        self.check_fatal(result)
    }

    pub(super) fn no_op_inner(&self, op: NoOp) -> Result<NoOpResult> {
        validate_sequenced_header(&op.header)?;
        let seq_no = op.header.seq_no;
        let term = op.header.primary_term;
        self.tracker.advance_max_seq_no(seq_no);
        let _inflight = self.inflight.begin(seq_no);

        let location = if self.tracker.has_processed(seq_no) {
            self.log_only(&Operation::NoOp(op))?
        } else {
            self.apply_no_op(op)?
        };
        self.ensure_durable(location)?;
        Ok(NoOpResult {
            seq_no,
            primary_term: term,
        })
    }

    fn apply_no_op(&self, op: NoOp) -> Result<Option<TranslogLocation>> {
        let seq_no = op.header.seq_no;
        let term = op.header.primary_term;
        let location = self.log_only(&Operation::NoOp(op.clone()))?;
        self.index.add_tombstone(Tombstone::no_op(seq_no, term, op.reason))?;
        self.tracker.mark_seq_no_as_processed(seq_no);
        debug!(target: "seqstore::engine", seq_no, "Recorded no-op");
        Ok(location)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Current version of `id`: the version map first, then the index.
    fn resolve_version(&self, id: &str, guard: &IdGuard<'_>) -> Result<Option<DocVersion>> {
        if let Some(value) = self.version_map.get_under_lock(id, guard) {
            return Ok(Some(DocVersion {
                version: value.version,
                seq_no: value.seq_no,
                primary_term: value.primary_term,
                deleted: value.deleted,
            }));
        }
        Ok(self.index.current_version(id)?)
    }

    /// Append to the translog unless the operation came from it.
    fn log_only(&self, op: &Operation) -> Result<Option<TranslogLocation>> {
        if !op.origin().writes_translog() {
            return Ok(None);
        }
        Ok(Some(self.translog.append(op)?))
    }

    /// A document rejected after its seqNo was assigned: consume the seqNo
    /// with a NoOp and report the failure.
    fn record_document_failure(
        &self,
        seq_no: SeqNo,
        term: PrimaryTerm,
        origin: Origin,
        error: StorageError,
    ) -> Result<IndexResult> {
        if !error.is_document_failure() {
            return Err(error.into());
        }
        let reason = error.to_string();
        warn!(target: "seqstore::engine", seq_no, %reason, "Document rejected, recording no-op");
        let noop = NoOp::new(seq_no, term, origin, format!("document failure: {}", reason));
        let location = self.apply_no_op(noop)?;
        self.ensure_durable(location)?;
        Ok(IndexResult::failure(seq_no, term, reason))
    }
}

fn document_failure_unsequenced(error: StorageError, term: PrimaryTerm) -> Result<IndexResult> {
    if !error.is_document_failure() {
        return Err(error.into());
    }
    Ok(IndexResult::failure(UNASSIGNED_SEQ_NO, term, error.to_string()))
}

fn validate_primary_request(
    id: &str,
    header: &OpHeader,
    if_seq_no: SeqNo,
    if_primary_term: PrimaryTerm,
) -> Result<()> {
    if id.is_empty() {
        return Err(Error::invalid_input("document id must not be empty"));
    }
    if header.seq_no != UNASSIGNED_SEQ_NO {
        return Err(Error::invalid_input(format!(
            "primary operations must not carry a seqNo, got [{}]",
            header.seq_no
        )));
    }
    if !header.version_type.validate_version_for_writes(header.version) {
        return Err(Error::invalid_input(format!(
            "illegal version value [{}] for version type [{}]",
            header.version, header.version_type
        )));
    }
    if if_seq_no != UNASSIGNED_SEQ_NO {
        if if_seq_no < 0 {
            return Err(Error::invalid_input(format!("illegal if_seq_no [{}]", if_seq_no)));
        }
        if if_primary_term == UNASSIGNED_PRIMARY_TERM {
            return Err(Error::invalid_input("if_seq_no requires if_primary_term"));
        }
        if header.version_type != VersionType::Internal || header.version != MATCH_ANY {
            return Err(Error::invalid_input(
                "compare and write operations can not use versioning",
            ));
        }
    } else if if_primary_term != UNASSIGNED_PRIMARY_TERM {
        return Err(Error::invalid_input("if_primary_term requires if_seq_no"));
    }
    Ok(())
}

fn validate_sequenced_header(header: &OpHeader) -> Result<()> {
    if header.seq_no < 0 {
        return Err(Error::invalid_input(format!(
            "{} operation requires an assigned seqNo, got [{}]",
            header.origin, header.seq_no
        )));
    }
    if header.primary_term == UNASSIGNED_PRIMARY_TERM {
        return Err(Error::invalid_input(format!(
            "{} operation requires a primary term",
            header.origin
        )));
    }
    Ok(())
}

fn check_conflict(
    header: &OpHeader,
    if_seq_no: SeqNo,
    if_primary_term: PrimaryTerm,
    current: Option<&DocVersion>,
) -> Option<Conflict> {
    let current_version = current.map_or(NOT_FOUND, |c| c.version);
    if if_seq_no != UNASSIGNED_SEQ_NO {
        return match current.filter(|c| !c.deleted) {
            None => Some(Conflict {
                current_version,
                reason: format!(
                    "required seqNo [{}], primary term [{}] but no document was found",
                    if_seq_no, if_primary_term
                ),
            }),
            Some(c) if c.seq_no != if_seq_no || c.primary_term != if_primary_term => Some(Conflict {
                current_version,
                reason: format!(
                    "required seqNo [{}], primary term [{}]. current document has seqNo [{}] and primary term [{}]",
                    if_seq_no, if_primary_term, c.seq_no, c.primary_term
                ),
            }),
            Some(_) => None,
        };
    }
    let deleted = current.map_or(false, |c| c.deleted);
    if header
        .version_type
        .is_version_conflict_for_writes(current_version, header.version, deleted)
    {
        return Some(Conflict {
            current_version,
            reason: header
                .version_type
                .explain_conflict_for_writes(current_version, header.version),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqstore_core::MATCH_DELETED;

    fn live(version: Version, seq_no: SeqNo) -> DocVersion {
        DocVersion {
            version,
            seq_no,
            primary_term: 1,
            deleted: false,
        }
    }

    #[test]
    fn test_plan_for_sequenced_ops() {
        assert_eq!(plan_for(3, None), Plan::Apply);
        assert_eq!(plan_for(3, Some(&live(1, 2))), Plan::Apply);
        assert_eq!(plan_for(3, Some(&live(1, 3))), Plan::Skip);
        assert_eq!(plan_for(3, Some(&live(1, 4))), Plan::Stale);
    }

    #[test]
    fn test_internal_version_conflicts() {
        let mut header = OpHeader::primary();
        assert!(check_conflict(&header, UNASSIGNED_SEQ_NO, 0, Some(&live(3, 0))).is_none());

        header.version = 2;
        let conflict = check_conflict(&header, UNASSIGNED_SEQ_NO, 0, Some(&live(3, 0))).unwrap();
        assert_eq!(conflict.current_version, 3);
        assert!(check_conflict(&header, UNASSIGNED_SEQ_NO, 0, None).is_some());

        header.version = MATCH_DELETED;
        assert!(check_conflict(&header, UNASSIGNED_SEQ_NO, 0, Some(&live(3, 0))).is_some());
        assert!(check_conflict(&header, UNASSIGNED_SEQ_NO, 0, None).is_none());
    }

    #[test]
    fn test_external_version_conflicts() {
        let mut header = OpHeader::primary();
        header.version_type = VersionType::External;
        header.version = 3;
        assert!(check_conflict(&header, UNASSIGNED_SEQ_NO, 0, Some(&live(5, 0))).is_some());
        header.version = 6;
        assert!(check_conflict(&header, UNASSIGNED_SEQ_NO, 0, Some(&live(5, 0))).is_none());
    }

    #[test]
    fn test_if_seq_no_conflicts() {
        let header = OpHeader::primary();
        assert!(check_conflict(&header, 4, 1, Some(&live(1, 4))).is_none());
        assert!(check_conflict(&header, 4, 2, Some(&live(1, 4))).is_some());
        assert!(check_conflict(&header, 3, 1, Some(&live(1, 4))).is_some());
        assert!(check_conflict(&header, 4, 1, None).is_some());
    }

    #[test]
    fn test_primary_request_validation() {
        let header = OpHeader::primary();
        assert!(validate_primary_request("a", &header, UNASSIGNED_SEQ_NO, 0).is_ok());
        assert!(validate_primary_request("", &header, UNASSIGNED_SEQ_NO, 0).is_err());
        assert!(validate_primary_request("a", &header, 2, 0).is_err());
        assert!(validate_primary_request("a", &header, UNASSIGNED_SEQ_NO, 1).is_err());

        let mut versioned = OpHeader::primary();
        versioned.version = 4;
        assert!(validate_primary_request("a", &versioned, 2, 1).is_err());
        versioned.version = 0;
        assert!(validate_primary_request("a", &versioned, UNASSIGNED_SEQ_NO, 0).is_err());
    }

    #[test]
    fn test_sequenced_header_validation() {
        let header = OpHeader::sequenced(0, 1, 1, Origin::Replica);
        assert!(validate_sequenced_header(&header).is_ok());
        assert!(validate_sequenced_header(&OpHeader::sequenced(-2, 1, 1, Origin::Replica)).is_err());
        assert!(validate_sequenced_header(&OpHeader::sequenced(0, 0, 1, Origin::Replica)).is_err());
    }
}
