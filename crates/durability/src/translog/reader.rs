//! Sealed generation reader and shared record scanning.

use crate::error::{TranslogError, TranslogResult};
use crate::format::{decode_operation, Checkpoint, TranslogHeader, TRANSLOG_HEADER_SIZE};
use parking_lot::Mutex;
use seqstore_core::{Operation, SeqNo, TranslogLocation};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Read-only view of a sealed generation, bounded by its checkpoint
pub(crate) struct GenerationReader {
    generation: u64,
    path: PathBuf,
    checkpoint: Checkpoint,
    file: Mutex<File>,
}

impl GenerationReader {
    /// Open a sealed generation, validating its header against the checkpoint.
    pub(crate) fn open(
        dir: &Path,
        checkpoint: Checkpoint,
        history_uuid: &Uuid,
    ) -> TranslogResult<Self> {
        let generation = checkpoint.generation;
        let path = TranslogHeader::generation_path(dir, generation);
        let mut file = match OpenOptions::new().read(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TranslogError::MissingFile(path))
            }
            Err(e) => return Err(e.into()),
        };
        validate_header(&mut file, generation, history_uuid)?;

        let len = file.metadata()?.len();
        if len < checkpoint.offset {
            return Err(TranslogError::corrupted(
                generation,
                len,
                format!("file is {} bytes but checkpoint covers {}", len, checkpoint.offset),
            ));
        }

        Ok(GenerationReader {
            generation,
            path,
            checkpoint,
            file: Mutex::new(file),
        })
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }


    pub(crate) fn num_ops(&self) -> u64 {
        self.checkpoint.num_ops
    }

    pub(crate) fn max_seq_no(&self) -> SeqNo {
        self.checkpoint.max_seq_no
    }

    pub(crate) fn size_in_bytes(&self) -> u64 {
        self.checkpoint.offset
    }

    /// Read the operation at `location`.
    pub(crate) fn read_at(&self, location: &TranslogLocation) -> TranslogResult<Operation> {
        if location.end() > self.checkpoint.offset {
            return Err(TranslogError::InvalidArgument(format!(
                "location {} beyond sealed generation end {}",
                location, self.checkpoint.offset
            )));
        }
        read_record_at(&self.file, location)
    }
}

/// Read and validate the header at the start of `file`.
pub(crate) fn validate_header(
    file: &mut File,
    generation: u64,
    history_uuid: &Uuid,
) -> TranslogResult<TranslogHeader> {
    let mut bytes = [0u8; TRANSLOG_HEADER_SIZE];
    file.seek(SeekFrom::Start(0))?;
    if let Err(e) = file.read_exact(&mut bytes) {
        return Err(TranslogError::corrupted(generation, 0, format!("header unreadable: {}", e)));
    }
    let header = TranslogHeader::from_bytes(&bytes).map_err(|e| TranslogError::from((generation, e)))?;
    if header.generation != generation {
        return Err(TranslogError::corrupted(
            generation,
            0,
            format!("header names generation {}", header.generation),
        ));
    }
    if header.history_uuid != *history_uuid {
        return Err(TranslogError::HistoryMismatch {
            expected: history_uuid.to_string(),
            found: header.history_uuid.to_string(),
        });
    }
    Ok(header)
}

/// Read one record through a shared handle.
pub(crate) fn read_record_at(file: &Mutex<File>, location: &TranslogLocation) -> TranslogResult<Operation> {
    let mut buf = vec![0u8; location.size as usize];
    {
        let mut file = file.lock();
        file.seek(SeekFrom::Start(location.offset))?;
        file.read_exact(&mut buf)?;
    }
    let (op, consumed) = decode_operation(&buf)
        .map_err(|e| TranslogError::corrupted(location.generation, location.offset, e))?;
    if consumed != buf.len() {
        return Err(TranslogError::corrupted(
            location.generation,
            location.offset,
            format!("record is {} bytes, location says {}", consumed, buf.len()),
        ));
    }
    Ok(op)
}

/// Decode every record between the header and `end_offset`.
///
/// Any framing or CRC failure inside that range is corruption.
pub(crate) fn read_generation(
    path: &Path,
    generation: u64,
    end_offset: u64,
) -> TranslogResult<Vec<(Operation, TranslogLocation)>> {
    let mut file = OpenOptions::new().read(true).open(path)?;
    let mut bytes = Vec::with_capacity(end_offset as usize);
    (&mut file).take(end_offset).read_to_end(&mut bytes)?;
    if (bytes.len() as u64) < end_offset {
        return Err(TranslogError::corrupted(
            generation,
            bytes.len() as u64,
            format!("expected {} bytes", end_offset),
        ));
    }

    let mut ops = Vec::new();
    let mut pos = TRANSLOG_HEADER_SIZE;
    while pos < bytes.len() {
        let (op, consumed) = decode_operation(&bytes[pos..])
            .map_err(|e| TranslogError::corrupted(generation, pos as u64, e))?;
        ops.push((op, TranslogLocation::new(generation, pos as u64, consumed as u32)));
        pos += consumed;
    }
    Ok(ops)
}
