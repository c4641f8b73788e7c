//! Sequenced operations currently inside the engine.
//!
//! A refresh or flush must see every operation admitted before it started.
//! Waiting on the processed checkpoint would block forever on a replica
//! with a seqNo gap, so the engine waits on this registry instead: only the
//! operations present when the wait starts are waited for.

use parking_lot::{Condvar, Mutex};
use seqstore_core::SeqNo;
use std::collections::BTreeMap;

#[derive(Default)]
pub(crate) struct InFlightOps {
    ops: Mutex<BTreeMap<SeqNo, usize>>,
    drained: Condvar,
}

impl InFlightOps {
    /// Register `seq_no` until the guard drops.
    pub(crate) fn begin(&self, seq_no: SeqNo) -> InFlightGuard<'_> {
        *self.ops.lock().entry(seq_no).or_insert(0) += 1;
        InFlightGuard { ops: self, seq_no }
    }

    /// Block until every operation registered at call time has finished.
    pub(crate) fn wait_for_admitted(&self) {
        let mut ops = self.ops.lock();
        let Some(&target) = ops.keys().next_back() else {
            return;
        };
        while ops.keys().next().is_some_and(|&seq_no| seq_no <= target) {
            self.drained.wait(&mut ops);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.ops.lock().values().sum()
    }

    fn end(&self, seq_no: SeqNo) {
        let mut ops = self.ops.lock();
        if let Some(count) = ops.get_mut(&seq_no) {
            *count -= 1;
            if *count == 0 {
                ops.remove(&seq_no);
            }
        }
        self.drained.notify_all();
    }
}

pub(crate) struct InFlightGuard<'a> {
    ops: &'a InFlightOps,
    seq_no: SeqNo,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.ops.end(self.seq_no);
    }
}
