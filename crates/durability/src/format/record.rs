//! Translog record format.
//!
//! # Record Layout
//!
//! ```text
//! ┌─────────────────┬──────────────────┬─────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Format Ver (1)   │ Payload (variable)      │ CRC32 (4)│
//! └─────────────────┴──────────────────┴─────────────────────────┴──────────┘
//! ```
//!
//! The length field covers format version, payload and CRC. The CRC covers
//! format version and payload. The payload is the MessagePack encoding of
//! an [`Operation`].

use crc32fast::Hasher;
use seqstore_core::Operation;

/// Current translog record format version
pub const RECORD_FORMAT_VERSION: u8 = 1;

/// Bytes of framing around a payload: length (4) + format (1) + crc (4)
pub const RECORD_OVERHEAD: usize = 9;

/// Upper bound on a single record, guards against garbage length fields
pub const MAX_RECORD_SIZE: usize = 256 * 1024 * 1024;

/// Serialize an operation into a framed record.
pub fn encode_operation(op: &Operation) -> Result<Vec<u8>, TranslogRecordError> {
    let payload =
        rmp_serde::to_vec_named(op).map_err(|e| TranslogRecordError::Encode(e.to_string()))?;

    let mut body = Vec::with_capacity(1 + payload.len());
    body.push(RECORD_FORMAT_VERSION);
    body.extend_from_slice(&payload);
    let crc = compute_crc(&body);

    let total_len = body.len() + 4;
    if total_len > MAX_RECORD_SIZE {
        return Err(TranslogRecordError::TooLarge(total_len));
    }

    let mut record = Vec::with_capacity(4 + total_len);
    record.extend_from_slice(&(total_len as u32).to_le_bytes());
    record.extend_from_slice(&body);
    record.extend_from_slice(&crc.to_le_bytes());
    Ok(record)
}

/// Parse one framed record from the start of `bytes`.
///
/// Returns the operation and the number of bytes consumed.
pub fn decode_operation(bytes: &[u8]) -> Result<(Operation, usize), TranslogRecordError> {
    let body = verify_frame(bytes)?;
    let format_version = body[0];
    if format_version != RECORD_FORMAT_VERSION {
        return Err(TranslogRecordError::UnsupportedVersion(format_version));
    }
    let op = rmp_serde::from_slice(&body[1..])
        .map_err(|e| TranslogRecordError::Decode(e.to_string()))?;
    Ok((op, 4 + body.len() + 4))
}

/// Check length and CRC of the record at the start of `bytes`.
///
/// Returns the checksummed body (format version + payload).
fn verify_frame(bytes: &[u8]) -> Result<&[u8], TranslogRecordError> {
    if bytes.len() < 4 {
        return Err(TranslogRecordError::InsufficientData);
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[0..4]);
    let length = u32::from_le_bytes(len_bytes) as usize;

    // Minimum: 1 byte format version + 4 bytes CRC
    if length < 5 || length > MAX_RECORD_SIZE {
        return Err(TranslogRecordError::InvalidLength(length));
    }
    if bytes.len() < 4 + length {
        return Err(TranslogRecordError::InsufficientData);
    }

    let body = &bytes[4..4 + length - 4];
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&bytes[4 + length - 4..4 + length]);
    let stored = u32::from_le_bytes(crc_bytes);
    let computed = compute_crc(body);
    if stored != computed {
        return Err(TranslogRecordError::ChecksumMismatch {
            expected: stored,
            computed,
        });
    }
    Ok(body)
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Translog record parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslogRecordError {
    /// Not enough data to parse record
    #[error("Insufficient data to parse record")]
    InsufficientData,

    /// Length field out of range
    #[error("Invalid record length: {0}")]
    InvalidLength(usize),

    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Expected checksum from record
        expected: u32,
        /// Computed checksum
        computed: u32,
    },

    /// Unsupported format version
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// Operation could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// Payload passed the CRC but is not a valid operation
    #[error("Decode error: {0}")]
    Decode(String),

    /// Encoded operation exceeds the record size limit
    #[error("Record too large: {0} bytes")]
    TooLarge(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqstore_core::{Delete, Index, NoOp, Origin};
    use serde_json::json;

    #[test]
    fn test_index_record_decodes_to_same_operation() {
        let op: Operation = Index::replica("1", json!({"title": "hello"}), 0, 1, 1).into();
        let bytes = encode_operation(&op).unwrap();
        let (parsed, consumed) = decode_operation(&bytes).unwrap();
        assert_eq!(parsed, op);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_back_to_back_records() {
        let first: Operation = Delete::replica("1", 1, 1, 2).into();
        let second: Operation = NoOp::new(2, 1, Origin::Primary, "gap").into();
        let mut bytes = encode_operation(&first).unwrap();
        bytes.extend(encode_operation(&second).unwrap());

        let (a, used) = decode_operation(&bytes).unwrap();
        let (b, _) = decode_operation(&bytes[used..]).unwrap();
        assert_eq!(a, first);
        assert_eq!(b, second);
    }

    #[test]
    fn test_checksum_failure() {
        let op: Operation = Delete::replica("abc", 4, 1, 2).into();
        let mut bytes = encode_operation(&op).unwrap();
        bytes[8] ^= 0xFF;
        assert!(matches!(
            decode_operation(&bytes),
            Err(TranslogRecordError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_record() {
        let op: Operation = Delete::replica("abc", 4, 1, 2).into();
        let bytes = encode_operation(&op).unwrap();
        assert_eq!(
            decode_operation(&bytes[..bytes.len() - 1]),
            Err(TranslogRecordError::InsufficientData)
        );
        assert_eq!(decode_operation(&[1, 2]), Err(TranslogRecordError::InsufficientData));
    }

    #[test]
    fn test_zero_length_is_invalid() {
        assert_eq!(
            decode_operation(&[0, 0, 0, 0, 0, 0, 0, 0, 0]),
            Err(TranslogRecordError::InvalidLength(0))
        );
    }
}
