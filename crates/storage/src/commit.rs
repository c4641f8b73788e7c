//! Commit file format
//!
//! Each commit is one self-contained file holding the full index state and
//! the commit's user data.
//!
//! # Binary Format
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ magic "SQIX" (4)                            │
//! │ format version u32 LE (4)                   │
//! │ generation u64 LE (8)                       │
//! │ payload length u64 LE (8)                   │
//! ├─────────────────────────────────────────────┤
//! │ payload: MessagePack CommitData             │
//! ├─────────────────────────────────────────────┤
//! │ crc32 of everything above (4)               │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Files are named `commit-<generation>.dat` (six digits, zero padded) and
//! written through a temporary file, fsync and rename, so a crash leaves
//! either the complete commit or none.

use crate::document::{StoredDoc, Tombstone};
use crate::error::{StorageError, StorageResult};
use crate::mapping::Mapping;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Magic bytes for commit files.
pub const COMMIT_MAGIC: &[u8; 4] = b"SQIX";

/// Current commit format version.
pub const COMMIT_FORMAT_VERSION: u32 = 1;

const HEADER_SIZE: usize = 24;
const COMMIT_TMP_FILE: &str = "commit.tmp";

/// Commit user data: string keys to string values
pub type UserData = BTreeMap<String, String>;

/// Everything a commit persists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitData {
    /// User data written with the commit
    pub user_data: UserData,
    /// Live documents, ordered by id
    pub docs: Vec<StoredDoc>,
    /// Tombstones, ordered by seqNo
    pub tombstones: Vec<Tombstone>,
    /// Field mapping
    pub mapping: Mapping,
}

/// Path of the commit file for `generation`.
pub fn commit_path(dir: &Path, generation: u64) -> PathBuf {
    dir.join(format!("commit-{:06}.dat", generation))
}

/// Generation encoded in a commit file name.
pub fn parse_commit_generation(name: &str) -> Option<u64> {
    name.strip_prefix("commit-")?
        .strip_suffix(".dat")?
        .parse()
        .ok()
}

/// Commit generations present in `dir`, ascending.
pub fn list_commit_generations(dir: &Path) -> StorageResult<Vec<u64>> {
    let mut generations = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(generation) = entry.file_name().to_str().and_then(parse_commit_generation) {
            generations.push(generation);
        }
    }
    generations.sort_unstable();
    Ok(generations)
}

/// Durably write a commit file.
pub fn write_commit(dir: &Path, generation: u64, data: &CommitData) -> StorageResult<PathBuf> {
    let payload =
        rmp_serde::to_vec_named(data).map_err(|e| StorageError::Serialization(e.to_string()))?;

    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len() + 4);
    bytes.extend_from_slice(COMMIT_MAGIC);
    bytes.extend_from_slice(&COMMIT_FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&generation.to_le_bytes());
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&payload);
    let crc = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());

    let tmp = dir.join(COMMIT_TMP_FILE);
    let path = commit_path(dir, generation);
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, &path)?;
    sync_dir(dir)?;
    Ok(path)
}

/// Read and validate a commit file.
pub fn read_commit(dir: &Path, generation: u64) -> StorageResult<CommitData> {
    let path = commit_path(dir, generation);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StorageError::CommitNotFound(generation))
        }
        Err(e) => return Err(e.into()),
    };
    decode_commit(&path, generation, &bytes)
}

fn decode_commit(path: &Path, generation: u64, bytes: &[u8]) -> StorageResult<CommitData> {
    if bytes.len() < HEADER_SIZE + 4 {
        return Err(StorageError::corruption(path, format!("file too short: {} bytes", bytes.len())));
    }
    if &bytes[0..4] != COMMIT_MAGIC {
        return Err(StorageError::corruption(path, "invalid magic"));
    }

    let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(StorageError::corruption(
            path,
            format!("checksum mismatch: stored {:08x}, computed {:08x}", stored, computed),
        ));
    }

    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != COMMIT_FORMAT_VERSION {
        return Err(StorageError::corruption(path, format!("unsupported format version {}", version)));
    }
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[8..16]);
    let stored_generation = u64::from_le_bytes(word);
    if stored_generation != generation {
        return Err(StorageError::corruption(
            path,
            format!("file names generation {}", stored_generation),
        ));
    }
    word.copy_from_slice(&bytes[16..24]);
    let payload_len = u64::from_le_bytes(word) as usize;
    if HEADER_SIZE + payload_len != body.len() {
        return Err(StorageError::corruption(
            path,
            format!("payload length {} does not match file size", payload_len),
        ));
    }

    rmp_serde::from_slice(&body[HEADER_SIZE..])
        .map_err(|e| StorageError::corruption(path, format!("payload decode failed: {}", e)))
}

/// Remove a leftover temporary commit file.
pub(crate) fn remove_tmp(dir: &Path) -> StorageResult<()> {
    let tmp = dir.join(COMMIT_TMP_FILE);
    if tmp.exists() {
        fs::remove_file(&tmp)?;
    }
    Ok(())
}

fn sync_dir(dir: &Path) -> StorageResult<()> {
    #[cfg(unix)]
    File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}
