//! Translog snapshots.
//!
//! A snapshot iterates the operations with seqNo in `[from, to]` across the
//! generations that existed when it was taken. Generations are visited
//! newest to oldest, and each generation's operations newest first, so the
//! first copy of a seqNo seen is the most recently appended one; later
//! (older) copies are skipped.
//!
//! Only one generation is decoded into memory at a time. The generations
//! are pinned for the snapshot's lifetime so pruning cannot delete them.

use crate::error::TranslogResult;
use crate::translog::reader::read_generation;
use parking_lot::Mutex;
use seqstore_core::{Operation, SeqNo};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

// ============================================================================
// Generation pinning
// ============================================================================

/// Reference counts of generations held by open snapshots
#[derive(Default)]
pub(crate) struct PinRegistry {
    counts: Mutex<BTreeMap<u64, usize>>,
}

impl PinRegistry {
    /// Pin `generations`; they stay pinned until the returned guard drops.
    pub(crate) fn pin(self: &Arc<Self>, generations: Vec<u64>) -> GenerationPins {
        let mut counts = self.counts.lock();
        for generation in &generations {
            *counts.entry(*generation).or_insert(0) += 1;
        }
        GenerationPins {
            registry: Arc::clone(self),
            generations,
        }
    }

    /// Oldest pinned generation.
    pub(crate) fn min_pinned(&self) -> Option<u64> {
        self.counts.lock().keys().next().copied()
    }

    fn release(&self, generations: &[u64]) {
        let mut counts = self.counts.lock();
        for generation in generations {
            if let Some(count) = counts.get_mut(generation) {
                *count -= 1;
                if *count == 0 {
                    counts.remove(generation);
                }
            }
        }
    }
}

/// Guard keeping a set of generations from being pruned
pub(crate) struct GenerationPins {
    registry: Arc<PinRegistry>,
    generations: Vec<u64>,
}

impl Drop for GenerationPins {
    fn drop(&mut self) {
        self.registry.release(&self.generations);
    }
}

// ============================================================================
// TranslogSnapshot
// ============================================================================

/// One generation as captured at snapshot time
pub(crate) struct SnapshotSource {
    pub(crate) generation: u64,
    pub(crate) path: PathBuf,
    pub(crate) end_offset: u64,
    pub(crate) num_ops: u64,
}

/// Finite, restartable iterator over a seqNo range of the translog
pub struct TranslogSnapshot {
    /// Newest generation first
    sources: Vec<SnapshotSource>,
    from_seq_no: SeqNo,
    to_seq_no: SeqNo,
    next_source: usize,
    /// Operations of the generation being read, in append order
    buffered: Vec<Operation>,
    seen: HashSet<SeqNo>,
    skipped: usize,
    _pins: GenerationPins,
}

impl TranslogSnapshot {
    pub(crate) fn new(
        sources: Vec<SnapshotSource>,
        from_seq_no: SeqNo,
        to_seq_no: SeqNo,
        pins: GenerationPins,
    ) -> Self {
        TranslogSnapshot {
            sources,
            from_seq_no,
            to_seq_no,
            next_source: 0,
            buffered: Vec::new(),
            seen: HashSet::new(),
            skipped: 0,
            _pins: pins,
        }
    }

    /// Next operation, or `None` when the snapshot is exhausted.
    ///
    /// # Errors
    /// Returns `TranslogError::Corrupted` if a record in range fails
    /// framing or CRC checks.
    pub fn next_operation(&mut self) -> TranslogResult<Option<Operation>> {
        loop {
            if let Some(op) = self.buffered.pop() {
                if self.seen.insert(op.seq_no()) {
                    return Ok(Some(op));
                }
                self.skipped += 1;
                continue;
            }
            let Some(source) = self.sources.get(self.next_source) else {
                return Ok(None);
            };
            self.next_source += 1;
            let (from, to) = (self.from_seq_no, self.to_seq_no);
            self.buffered = read_generation(&source.path, source.generation, source.end_offset)?
                .into_iter()
                .map(|(op, _)| op)
                .filter(|op| op.seq_no() >= from && op.seq_no() <= to)
                .collect();
        }
    }

    /// Start over from the newest generation.
    pub fn restart(&mut self) {
        self.next_source = 0;
        self.buffered.clear();
        self.seen.clear();
        self.skipped = 0;
    }

    /// Operations stored in the captured generations, in or out of range.
    pub fn total_operations(&self) -> u64 {
        self.sources.iter().map(|s| s.num_ops).sum()
    }

    /// Older duplicates skipped so far.
    pub fn skipped_operations(&self) -> usize {
        self.skipped
    }

    /// Generations covered, newest first.
    pub fn generations(&self) -> Vec<u64> {
        self.sources.iter().map(|s| s.generation).collect()
    }
}

impl Iterator for TranslogSnapshot {
    type Item = TranslogResult<Operation>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_operation().transpose()
    }
}

impl std::fmt::Debug for TranslogSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslogSnapshot")
            .field("generations", &self.generations())
            .field("from_seq_no", &self.from_seq_no)
            .field("to_seq_no", &self.to_seq_no)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pins_released_on_drop() {
        let registry = Arc::new(PinRegistry::default());
        let a = registry.pin(vec![3, 4]);
        let b = registry.pin(vec![4, 5]);
        assert_eq!(registry.min_pinned(), Some(3));
        drop(a);
        assert_eq!(registry.min_pinned(), Some(4));
        drop(b);
        assert_eq!(registry.min_pinned(), None);
    }
}
