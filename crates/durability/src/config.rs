//! Translog configuration.
//!
//! Controls when appended operations are fsynced and when the active
//! generation is rolled.

use serde::{Deserialize, Serialize};

/// When the translog fsyncs
///
/// | Mode | fsync | Data Loss Window |
/// |------|-------|-----------------|
/// | Always | Before every write is acknowledged | Zero |
/// | Standard | Periodic, or every `batch_size` ops | Up to interval/batch |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurabilityMode {
    /// fsync before every write is acknowledged
    ///
    /// Concurrent writers share fsyncs: a writer whose location was already
    /// covered by someone else's sync returns immediately.
    Always,

    /// fsync every `interval_ms` from a background thread, or inline once
    /// `batch_size` unsynced operations accumulate
    Standard {
        /// Maximum time between fsyncs in milliseconds
        interval_ms: u64,
        /// Maximum unsynced operations before an inline fsync
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// True if every write waits for its fsync.
    pub fn requires_immediate_fsync(&self) -> bool {
        matches!(self, DurabilityMode::Always)
    }

    /// Background sync interval, if any.
    pub fn sync_interval_ms(&self) -> Option<u64> {
        match self {
            DurabilityMode::Always => None,
            DurabilityMode::Standard { interval_ms, .. } => Some(*interval_ms),
        }
    }

    /// Human-readable description of the mode
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::Always => "Always sync (safest, slowest)",
            DurabilityMode::Standard { .. } => "Standard (periodic sync)",
        }
    }

    /// `Standard { interval_ms: 5000, batch_size: 1000 }`.
    pub fn standard_default() -> Self {
        DurabilityMode::Standard {
            interval_ms: 5000,
            batch_size: 1000,
        }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Always
    }
}

/// Translog configuration parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslogConfig {
    /// Sync policy
    pub durability: DurabilityMode,

    /// Roll to a new generation once the active one exceeds this size (default: 64MB).
    pub generation_threshold_bytes: u64,
}

impl Default for TranslogConfig {
    fn default() -> Self {
        TranslogConfig {
            durability: DurabilityMode::default(),
            generation_threshold_bytes: 64 * 1024 * 1024, // 64MB
        }
    }
}

impl TranslogConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set durability mode (builder pattern).
    pub fn with_durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    /// Set generation roll threshold (builder pattern).
    pub fn with_generation_threshold_bytes(mut self, bytes: u64) -> Self {
        self.generation_threshold_bytes = bytes;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), TranslogConfigError> {
        if self.generation_threshold_bytes < 1024 {
            return Err(TranslogConfigError::GenerationTooSmall);
        }
        if let DurabilityMode::Standard {
            interval_ms,
            batch_size,
        } = self.durability
        {
            if interval_ms == 0 {
                return Err(TranslogConfigError::ZeroSyncInterval);
            }
            if batch_size == 0 {
                return Err(TranslogConfigError::ZeroBatchSize);
            }
        }
        Ok(())
    }

    /// Create a configuration optimized for testing (small generations).
    pub fn for_testing() -> Self {
        TranslogConfig {
            durability: DurabilityMode::Always,
            generation_threshold_bytes: 64 * 1024, // 64KB for faster rolls in tests
        }
    }
}

/// Translog configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslogConfigError {
    /// Generation threshold is too small (minimum 1KB).
    #[error("Generation threshold must be at least 1KB")]
    GenerationTooSmall,

    /// Standard mode with a zero interval.
    #[error("Sync interval must be greater than zero")]
    ZeroSyncInterval,

    /// Standard mode with a zero batch size.
    #[error("Sync batch size must be greater than zero")]
    ZeroBatchSize,
}
