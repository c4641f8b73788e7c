//! Core scalar types for seqstore
//!
//! This module defines the foundational types:
//! - SeqNo: Per-shard operation sequence number
//! - PrimaryTerm: Epoch of the primary that sequenced an operation
//! - Version: Per-document version, interpreted by VersionType
//! - Origin: Where an operation entered the engine from
//! - TranslogLocation: Position of an operation in the translog

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-shard operation sequence number.
///
/// Assigned seqNos start at 0. Negative values are sentinels.
pub type SeqNo = i64;

/// Epoch of the primary that assigned a seqNo.
pub type PrimaryTerm = u64;

/// Per-document version.
pub type Version = i64;

/// The operation has not been assigned a seqNo yet.
pub const UNASSIGNED_SEQ_NO: SeqNo = -2;

/// Checkpoint / max seqNo of a shard that has processed nothing.
pub const NO_OPS_PERFORMED: SeqNo = -1;

/// Primary term of an operation that has not been sequenced.
pub const UNASSIGNED_PRIMARY_TERM: PrimaryTerm = 0;

/// The document does not exist (or was never written).
pub const NOT_FOUND: Version = -1;

/// Accept whatever version is current.
pub const MATCH_ANY: Version = -3;

/// Only accept the write if the document is absent or deleted.
pub const MATCH_DELETED: Version = -4;

/// Get current timestamp in microseconds since Unix epoch.
pub fn now_micros() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

// ============================================================================
// VersionType
// ============================================================================

/// How an operation's declared version is checked and applied.
///
/// | Type | Conflict when | Resulting version |
/// |------|---------------|-------------------|
/// | Internal | expected is not MATCH_ANY and differs from current | current + 1 (1 if absent) |
/// | External | current exists and current >= expected | expected |
/// | ExternalGte | current exists and current > expected | expected |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VersionType {
    /// Versions are managed by the engine.
    #[default]
    Internal,
    /// Versions come from an external system and must strictly increase.
    External,
    /// Versions come from an external system and must not decrease.
    ExternalGte,
}

impl VersionType {
    /// Check whether writing `expected` on top of `current` is a conflict.
    ///
    /// `deleted` reports whether the current version belongs to a delete.
    pub fn is_version_conflict_for_writes(
        &self,
        current: Version,
        expected: Version,
        deleted: bool,
    ) -> bool {
        match self {
            VersionType::Internal => {
                if expected == MATCH_ANY {
                    return false;
                }
                if expected == MATCH_DELETED {
                    return current != NOT_FOUND && !deleted;
                }
                if current == NOT_FOUND {
                    return true;
                }
                current != expected
            }
            VersionType::External => {
                if current == NOT_FOUND {
                    return false;
                }
                if expected == MATCH_ANY {
                    return true;
                }
                current >= expected
            }
            VersionType::ExternalGte => {
                if current == NOT_FOUND {
                    return false;
                }
                if expected == MATCH_ANY {
                    return true;
                }
                current > expected
            }
        }
    }

    /// Human-readable explanation of a write conflict.
    pub fn explain_conflict_for_writes(&self, current: Version, expected: Version) -> String {
        match self {
            VersionType::Internal => {
                if expected == MATCH_DELETED {
                    "document already exists".to_string()
                } else if current == NOT_FOUND {
                    format!("document does not exist (expected version [{}])", expected)
                } else {
                    format!(
                        "current version [{}] is different than the one provided [{}]",
                        current, expected
                    )
                }
            }
            VersionType::External => format!(
                "current version [{}] is higher or equal to the one provided [{}]",
                current, expected
            ),
            VersionType::ExternalGte => format!(
                "current version [{}] is higher than the one provided [{}]",
                current, expected
            ),
        }
    }

    /// Compute the version the document gets after a successful write.
    pub fn update_version(&self, current: Version, expected: Version) -> Version {
        match self {
            VersionType::Internal => {
                if current == NOT_FOUND {
                    1
                } else {
                    current + 1
                }
            }
            VersionType::External | VersionType::ExternalGte => expected,
        }
    }

    /// Check that `version` is a legal declared version for writes.
    pub fn validate_version_for_writes(&self, version: Version) -> bool {
        match self {
            VersionType::Internal => version > 0 || version == MATCH_ANY || version == MATCH_DELETED,
            VersionType::External | VersionType::ExternalGte => version >= 0,
        }
    }

    /// Lowercase name used in logs and config.
    pub fn name(&self) -> &'static str {
        match self {
            VersionType::Internal => "internal",
            VersionType::External => "external",
            VersionType::ExternalGte => "external_gte",
        }
    }
}

impl fmt::Display for VersionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Origin
// ============================================================================

/// Where an operation entered the engine from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Origin {
    /// Client write on the primary: the engine assigns seqNo and version.
    #[default]
    Primary,
    /// Replication from the primary: seqNo and version are supplied.
    Replica,
    /// Operation shipped to a recovering copy by a peer.
    PeerRecovery,
    /// Operation re-applied from this shard's own translog on startup.
    LocalTranslogRecovery,
}

impl Origin {
    /// True for both recovery origins.
    pub fn is_recovery(&self) -> bool {
        matches!(self, Origin::PeerRecovery | Origin::LocalTranslogRecovery)
    }

    /// True when the engine must assign seqNo and version itself.
    pub fn is_primary(&self) -> bool {
        matches!(self, Origin::Primary)
    }

    /// True for operations that must be appended to the translog.
    ///
    /// Operations replayed from the local translog are already in it.
    pub fn writes_translog(&self) -> bool {
        !matches!(self, Origin::LocalTranslogRecovery)
    }

    /// Lowercase name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Origin::Primary => "primary",
            Origin::Replica => "replica",
            Origin::PeerRecovery => "peer_recovery",
            Origin::LocalTranslogRecovery => "local_translog_recovery",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// TranslogLocation
// ============================================================================

/// Position of a serialized operation inside a translog generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TranslogLocation {
    /// Generation (file) number
    pub generation: u64,
    /// Byte offset of the record from the start of the file
    pub offset: u64,
    /// Record size in bytes, including framing
    pub size: u32,
}

impl TranslogLocation {
    /// Create a new location.
    pub fn new(generation: u64, offset: u64, size: u32) -> Self {
        TranslogLocation {
            generation,
            offset,
            size,
        }
    }

    /// Offset of the first byte after this record.
    pub fn end(&self) -> u64 {
        self.offset + self.size as u64
    }
}

impl fmt::Display for TranslogLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[generation: {}, offset: {}, size: {}]",
            self.generation, self.offset, self.size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_match_any_never_conflicts() {
        let vt = VersionType::Internal;
        assert!(!vt.is_version_conflict_for_writes(NOT_FOUND, MATCH_ANY, false));
        assert!(!vt.is_version_conflict_for_writes(7, MATCH_ANY, false));
        assert!(!vt.is_version_conflict_for_writes(7, MATCH_ANY, true));
    }

    #[test]
    fn test_internal_requires_exact_version() {
        let vt = VersionType::Internal;
        assert!(!vt.is_version_conflict_for_writes(3, 3, false));
        assert!(vt.is_version_conflict_for_writes(3, 2, false));
        assert!(vt.is_version_conflict_for_writes(3, 4, false));
        assert!(vt.is_version_conflict_for_writes(NOT_FOUND, 1, false));
    }

    #[test]
    fn test_internal_match_deleted() {
        let vt = VersionType::Internal;
        assert!(!vt.is_version_conflict_for_writes(NOT_FOUND, MATCH_DELETED, false));
        assert!(!vt.is_version_conflict_for_writes(4, MATCH_DELETED, true));
        assert!(vt.is_version_conflict_for_writes(4, MATCH_DELETED, false));
    }

    #[test]
    fn test_external_requires_strictly_greater() {
        let vt = VersionType::External;
        assert!(!vt.is_version_conflict_for_writes(NOT_FOUND, 3, false));
        assert!(!vt.is_version_conflict_for_writes(3, 5, false));
        assert!(vt.is_version_conflict_for_writes(5, 5, false));
        assert!(vt.is_version_conflict_for_writes(5, 3, false));
    }

    #[test]
    fn test_external_gte_allows_equal() {
        let vt = VersionType::ExternalGte;
        assert!(!vt.is_version_conflict_for_writes(5, 5, false));
        assert!(!vt.is_version_conflict_for_writes(5, 6, false));
        assert!(vt.is_version_conflict_for_writes(5, 4, false));
    }

    #[test]
    fn test_update_version() {
        assert_eq!(VersionType::Internal.update_version(NOT_FOUND, MATCH_ANY), 1);
        assert_eq!(VersionType::Internal.update_version(4, MATCH_ANY), 5);
        assert_eq!(VersionType::External.update_version(4, 10), 10);
        assert_eq!(VersionType::ExternalGte.update_version(NOT_FOUND, 0), 0);
    }

    #[test]
    fn test_validate_version_for_writes() {
        assert!(VersionType::Internal.validate_version_for_writes(MATCH_ANY));
        assert!(VersionType::Internal.validate_version_for_writes(1));
        assert!(!VersionType::Internal.validate_version_for_writes(0));
        assert!(VersionType::External.validate_version_for_writes(0));
        assert!(!VersionType::External.validate_version_for_writes(MATCH_ANY));
        assert!(!VersionType::ExternalGte.validate_version_for_writes(-1));
    }

    #[test]
    fn test_explain_conflict_mentions_versions() {
        let msg = VersionType::External.explain_conflict_for_writes(5, 3);
        assert!(msg.contains("[5]"));
        assert!(msg.contains("[3]"));
    }

    #[test]
    fn test_origin_flags() {
        assert!(Origin::Primary.is_primary());
        assert!(!Origin::Replica.is_recovery());
        assert!(Origin::PeerRecovery.is_recovery());
        assert!(Origin::LocalTranslogRecovery.is_recovery());
        assert!(!Origin::LocalTranslogRecovery.writes_translog());
        assert!(Origin::PeerRecovery.writes_translog());
    }

    #[test]
    fn test_location_end() {
        let loc = TranslogLocation::new(3, 100, 42);
        assert_eq!(loc.end(), 142);
        assert!(loc.to_string().contains("generation: 3"));
    }
}
