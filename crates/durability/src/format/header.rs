//! Translog generation file header.
//!
//! Generation files are named `translog-<gen>.tlog`.
//!
//! # Header Layout (44 bytes)
//!
//! ```text
//! magic("SQTL", 4) + format_version(4) + generation(8) + primary_term(8)
//! + history_uuid(16) + crc32(4)
//! ```

use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Magic bytes identifying a translog generation file: "SQTL"
pub const TRANSLOG_MAGIC: [u8; 4] = *b"SQTL";

/// Current generation file format version
pub const TRANSLOG_FORMAT_VERSION: u32 = 1;

/// Size of the generation header in bytes
pub const TRANSLOG_HEADER_SIZE: usize = 44;

/// File name prefix shared by generation and checkpoint files
pub const TRANSLOG_FILE_PREFIX: &str = "translog-";

/// Extension of generation files
pub const TRANSLOG_FILE_SUFFIX: &str = ".tlog";

/// Translog generation header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslogHeader {
    /// Format version for forward compatibility
    pub format_version: u32,
    /// Generation number
    pub generation: u64,
    /// Primary term when the generation was created
    pub primary_term: u64,
    /// Shard history this generation belongs to
    pub history_uuid: Uuid,
}

impl TranslogHeader {
    /// Create a header for a new generation.
    pub fn new(generation: u64, primary_term: u64, history_uuid: Uuid) -> Self {
        TranslogHeader {
            format_version: TRANSLOG_FORMAT_VERSION,
            generation,
            primary_term,
            history_uuid,
        }
    }

    /// Serialize header to bytes.
    pub fn to_bytes(&self) -> [u8; TRANSLOG_HEADER_SIZE] {
        let mut bytes = [0u8; TRANSLOG_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&TRANSLOG_MAGIC);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.generation.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.primary_term.to_le_bytes());
        bytes[24..40].copy_from_slice(self.history_uuid.as_bytes());
        let crc = crc32fast::hash(&bytes[0..40]);
        bytes[40..44].copy_from_slice(&crc.to_le_bytes());
        bytes
    }

    /// Deserialize header from bytes, validating magic, version and CRC.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TranslogHeaderError> {
        if bytes.len() < TRANSLOG_HEADER_SIZE {
            return Err(TranslogHeaderError::TooShort(bytes.len()));
        }
        if bytes[0..4] != TRANSLOG_MAGIC {
            return Err(TranslogHeaderError::InvalidMagic);
        }
        let stored = u32::from_le_bytes(read4(&bytes[40..44]));
        let computed = crc32fast::hash(&bytes[0..40]);
        if stored != computed {
            return Err(TranslogHeaderError::ChecksumMismatch { stored, computed });
        }
        let format_version = u32::from_le_bytes(read4(&bytes[4..8]));
        if format_version != TRANSLOG_FORMAT_VERSION {
            return Err(TranslogHeaderError::UnsupportedVersion(format_version));
        }
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&bytes[24..40]);
        Ok(TranslogHeader {
            format_version,
            generation: u64::from_le_bytes(read8(&bytes[8..16])),
            primary_term: u64::from_le_bytes(read8(&bytes[16..24])),
            history_uuid: Uuid::from_bytes(uuid),
        })
    }

    /// Path of a generation file.
    ///
    /// Format: `translog-<gen>.tlog`.
    pub fn generation_path(dir: &Path, generation: u64) -> PathBuf {
        dir.join(format!("{}{}{}", TRANSLOG_FILE_PREFIX, generation, TRANSLOG_FILE_SUFFIX))
    }

    /// Parse the generation out of a `translog-<gen>.tlog` file name.
    pub fn parse_generation(file_name: &str) -> Option<u64> {
        file_name
            .strip_prefix(TRANSLOG_FILE_PREFIX)?
            .strip_suffix(TRANSLOG_FILE_SUFFIX)?
            .parse()
            .ok()
    }
}

fn read4(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(bytes);
    out
}

fn read8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    out
}

/// Header validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslogHeaderError {
    /// File shorter than a header
    #[error("Header too short: {0} bytes")]
    TooShort(usize),

    /// Magic bytes do not match
    #[error("Invalid translog magic")]
    InvalidMagic,

    /// Header CRC failed
    #[error("Header checksum mismatch: stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Stored checksum
        stored: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Unsupported format version
    #[error("Unsupported translog format version: {0}")]
    UnsupportedVersion(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_bytes() {
        let uuid = Uuid::new_v4();
        let header = TranslogHeader::new(7, 3, uuid);
        let parsed = TranslogHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_header_rejects_bad_magic_and_crc() {
        let mut bytes = TranslogHeader::new(1, 1, Uuid::new_v4()).to_bytes();
        bytes[17] ^= 0x01;
        assert!(matches!(
            TranslogHeader::from_bytes(&bytes),
            Err(TranslogHeaderError::ChecksumMismatch { .. })
        ));
        bytes[0] = b'X';
        assert_eq!(TranslogHeader::from_bytes(&bytes), Err(TranslogHeaderError::InvalidMagic));
        assert_eq!(TranslogHeader::from_bytes(&bytes[..10]), Err(TranslogHeaderError::TooShort(10)));
    }

    #[test]
    fn test_generation_path_and_parse() {
        let path = TranslogHeader::generation_path(Path::new("/tmp/tl"), 42);
        assert_eq!(path, PathBuf::from("/tmp/tl/translog-42.tlog"));
        assert_eq!(TranslogHeader::parse_generation("translog-42.tlog"), Some(42));
        assert_eq!(TranslogHeader::parse_generation("translog-42.ckp"), None);
        assert_eq!(TranslogHeader::parse_generation("translog.ckp"), None);
    }
}
