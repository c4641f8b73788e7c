//! Background translog fsync for Standard durability.
//!
//! One named thread (`seqstore-translog-sync`) wakes every `interval_ms`
//! and syncs the translog if anything is unsynced. Writers in Standard mode
//! never wait for this thread; their operations become durable (and their
//! seqNos persisted) when it runs.

use parking_lot::{Condvar, Mutex};
use seqstore_core::{Error, Result};
use seqstore_durability::{DurabilityMode, Translog};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Default)]
struct Shutdown {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Handle to the sync thread; a no-op in Always mode
pub(crate) struct TranslogSyncer {
    shutdown: Arc<Shutdown>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TranslogSyncer {
    /// Spawn the sync thread if `translog` runs in Standard mode.
    pub(crate) fn start(translog: Arc<Translog>) -> Result<Self> {
        let shutdown = Arc::new(Shutdown::default());
        let handle = if let DurabilityMode::Standard { interval_ms, .. } = translog.durability() {
            let signal = Arc::clone(&shutdown);
            let interval = Duration::from_millis(interval_ms);
            let handle = std::thread::Builder::new()
                .name("seqstore-translog-sync".to_string())
                .spawn(move || run(translog, signal, interval))
                .map_err(|e| Error::illegal_state(format!("failed to spawn translog sync thread: {}", e)))?;
            Some(handle)
        } else {
            None
        };
        Ok(TranslogSyncer {
            shutdown,
            handle: Mutex::new(handle),
        })
    }

    /// True while the thread is alive.
    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Signal the thread and join it. Safe to call more than once.
    pub(crate) fn stop(&self) {
        *self.shutdown.stopped.lock() = true;
        self.shutdown.wake.notify_all();
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                warn!(target: "seqstore::translog", "Translog sync thread panicked");
            }
        }
    }
}

fn run(translog: Arc<Translog>, shutdown: Arc<Shutdown>, interval: Duration) {
    loop {
        {
            let mut stopped = shutdown.stopped.lock();
            if !*stopped {
                shutdown.wake.wait_for(&mut stopped, interval);
            }
            if *stopped {
                break;
            }
        }
        if !translog.is_open() {
            break;
        }
        if translog.sync_needed() {
            if let Err(e) = translog.sync() {
                // The translog closes itself; the engine fails on its next call.
                warn!(target: "seqstore::translog", error = %e, "Background translog sync failed");
                break;
            }
        }
    }
    debug!(target: "seqstore::translog", "Translog sync thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqstore_core::{Index, Operation};
    use seqstore_durability::TranslogConfig;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Instant;
    use tempfile::TempDir;

    const UUID: &str = "8c4f3a52-5d0c-4d4e-9a60-1f8d4a3b2c11";

    fn open(dir: &TempDir, durability: DurabilityMode) -> Arc<Translog> {
        Translog::create_empty(dir.path(), UUID, 1).unwrap();
        let config = TranslogConfig::for_testing().with_durability(durability);
        Arc::new(Translog::open(dir.path(), config, UUID).unwrap())
    }

    #[test]
    fn test_always_mode_spawns_nothing() {
        let dir = TempDir::new().unwrap();
        let syncer = TranslogSyncer::start(open(&dir, DurabilityMode::Always)).unwrap();
        assert!(!syncer.is_running());
        syncer.stop();
    }

    #[test]
    fn test_standard_mode_syncs_in_background() {
        let dir = TempDir::new().unwrap();
        let translog = open(
            &dir,
            DurabilityMode::Standard {
                interval_ms: 10,
                batch_size: 1000,
            },
        );
        let persisted = Arc::new(AtomicI64::new(-1));
        let sink = Arc::clone(&persisted);
        translog.set_persisted_seq_no_consumer(Arc::new(move |seq_no| {
            sink.fetch_max(seq_no, Ordering::SeqCst);
        }));

        let syncer = TranslogSyncer::start(Arc::clone(&translog)).unwrap();
        assert!(syncer.is_running());
        let op = Operation::Index(Index::replica("a", json!({}), 0, 1, 1));
        translog.append(&op).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while persisted.load(Ordering::SeqCst) < 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(persisted.load(Ordering::SeqCst), 0);
        assert!(!translog.sync_needed());

        syncer.stop();
        assert!(!syncer.is_running());
    }

    #[test]
    fn test_stop_does_not_wait_for_interval() {
        let dir = TempDir::new().unwrap();
        let translog = open(
            &dir,
            DurabilityMode::Standard {
                interval_ms: 60_000,
                batch_size: 1000,
            },
        );
        let syncer = TranslogSyncer::start(translog).unwrap();
        let start = Instant::now();
        syncer.stop();
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
