//! Engine configuration via `engine.toml`
//!
//! A default `engine.toml` is written into the shard directory on first
//! open. To change settings, edit the file and reopen the shard.

use seqstore_core::Error;
use seqstore_durability::{DurabilityMode, TranslogConfig};
use seqstore_storage::IndexConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error as ThisError;

/// Config file name placed in the shard directory.
pub const CONFIG_FILE_NAME: &str = "engine.toml";

/// Configuration errors
#[derive(Debug, ThisError)]
pub enum ConfigError {
    /// The file could not be read or written
    #[error("config file '{path}': {reason}")]
    File {
        /// Path of the config file
        path: String,
        /// Underlying failure
        reason: String,
    },

    /// The file is not valid TOML for this config
    #[error("failed to parse config file '{path}': {reason}")]
    Parse {
        /// Path of the config file
        path: String,
        /// Parser message
        reason: String,
    },

    /// A setting is out of range
    #[error("invalid setting '{field}': {reason}")]
    Invalid {
        /// Offending setting
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

/// What a newly promoted primary does about seqNos below its max seqNo
/// that it never processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GapFillPolicy {
    /// Fill every gap with a NoOp when promoted.
    #[default]
    OnPromotion,
    /// Leave gaps; `fill_seq_no_gaps` can still be called explicitly.
    Never,
}

/// Engine configuration loaded from `engine.toml`.
///
/// # Example
///
/// ```toml
/// durability = "always"
/// sync_interval_ms = 5000
/// retention_operations = 0
/// gap_fill = "on_promotion"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Durability mode: `"always"` or `"standard"`.
    pub durability: String,
    /// Background fsync interval in Standard mode.
    pub sync_interval_ms: u64,
    /// Unsynced operations that force an inline fsync in Standard mode.
    pub sync_batch_size: usize,
    /// Translog generation roll threshold.
    pub generation_threshold_bytes: u64,
    /// Uncommitted translog size above which a flush is due.
    pub flush_threshold_bytes: u64,
    /// Operations kept below the global checkpoint for peer recovery.
    pub retention_operations: u64,
    /// How long version-map delete entries outlive a refresh.
    pub gc_deletes_ms: u64,
    /// Unknown fields extend the mapping instead of being rejected.
    pub dynamic_mapping: bool,
    /// Record a NoOp when a sequenced document is rejected.
    pub noop_on_document_failure: bool,
    /// Gap handling on promotion.
    pub gap_fill: GapFillPolicy,
    /// Largest serialized document source accepted.
    pub max_document_bytes: usize,
    /// Translog operations held in memory per replay batch.
    pub recovery_batch_ops: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            durability: "always".to_string(),
            sync_interval_ms: 5000,
            sync_batch_size: 1000,
            generation_threshold_bytes: 64 * 1024 * 1024,
            flush_threshold_bytes: 512 * 1024 * 1024,
            retention_operations: 0,
            gc_deletes_ms: 60_000,
            dynamic_mapping: true,
            noop_on_document_failure: true,
            gap_fill: GapFillPolicy::OnPromotion,
            max_document_bytes: 10 * 1024 * 1024,
            recovery_batch_ops: 4096,
        }
    }
}

impl EngineConfig {
    /// Small generations and Always durability.
    pub fn for_testing() -> Self {
        EngineConfig {
            generation_threshold_bytes: 64 * 1024,
            flush_threshold_bytes: 1024 * 1024,
            ..Self::default()
        }
    }

    /// Set the durability string (builder pattern).
    pub fn with_durability(mut self, durability: &str) -> Self {
        self.durability = durability.to_string();
        self
    }

    /// Set the Standard-mode sync interval and batch size (builder pattern).
    pub fn with_sync(mut self, interval_ms: u64, batch_size: usize) -> Self {
        self.sync_interval_ms = interval_ms;
        self.sync_batch_size = batch_size;
        self
    }

    /// Set the retained operation count (builder pattern).
    pub fn with_retention_operations(mut self, operations: u64) -> Self {
        self.retention_operations = operations;
        self
    }

    /// Set the delete GC interval (builder pattern).
    pub fn with_gc_deletes_ms(mut self, ms: u64) -> Self {
        self.gc_deletes_ms = ms;
        self
    }

    /// Toggle dynamic mapping (builder pattern).
    pub fn with_dynamic_mapping(mut self, enabled: bool) -> Self {
        self.dynamic_mapping = enabled;
        self
    }

    /// Toggle NoOps for rejected documents (builder pattern).
    pub fn with_noop_on_document_failure(mut self, enabled: bool) -> Self {
        self.noop_on_document_failure = enabled;
        self
    }

    /// Set the gap-fill policy (builder pattern).
    pub fn with_gap_fill(mut self, policy: GapFillPolicy) -> Self {
        self.gap_fill = policy;
        self
    }

    /// Set the document size limit (builder pattern).
    pub fn with_max_document_bytes(mut self, bytes: usize) -> Self {
        self.max_document_bytes = bytes;
        self
    }

    /// Set the replay batch size (builder pattern).
    pub fn with_recovery_batch_ops(mut self, operations: usize) -> Self {
        self.recovery_batch_ops = operations;
        self
    }

    /// Set the flush threshold (builder pattern).
    pub fn with_flush_threshold_bytes(mut self, bytes: u64) -> Self {
        self.flush_threshold_bytes = bytes;
        self
    }

    /// Set the translog generation threshold (builder pattern).
    pub fn with_generation_threshold_bytes(mut self, bytes: u64) -> Self {
        self.generation_threshold_bytes = bytes;
        self
    }

    /// Parse the durability string into a `DurabilityMode`.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not `"standard"` or `"always"`.
    pub fn durability_mode(&self) -> Result<DurabilityMode, ConfigError> {
        match self.durability.as_str() {
            "always" => Ok(DurabilityMode::Always),
            "standard" => Ok(DurabilityMode::Standard {
                interval_ms: self.sync_interval_ms,
                batch_size: self.sync_batch_size,
            }),
            other => Err(ConfigError::invalid(
                "durability",
                format!("'{}', expected \"standard\" or \"always\"", other),
            )),
        }
    }

    /// Translog settings derived from this config.
    pub fn translog_config(&self) -> Result<TranslogConfig, ConfigError> {
        Ok(TranslogConfig::new()
            .with_durability(self.durability_mode()?)
            .with_generation_threshold_bytes(self.generation_threshold_bytes))
    }

    /// Index settings derived from this config.
    pub fn index_config(&self) -> IndexConfig {
        IndexConfig::default().with_max_document_bytes(self.max_document_bytes)
    }

    /// Check every setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.translog_config()?
            .validate()
            .map_err(|e| ConfigError::invalid("translog", e.to_string()))?;
        if self.flush_threshold_bytes == 0 {
            return Err(ConfigError::invalid("flush_threshold_bytes", "must be greater than zero"));
        }
        if self.max_document_bytes == 0 {
            return Err(ConfigError::invalid("max_document_bytes", "must be greater than zero"));
        }
        if self.recovery_batch_ops == 0 {
            return Err(ConfigError::invalid("recovery_batch_ops", "must be greater than zero"));
        }
        if self.retention_operations > i64::MAX as u64 {
            return Err(ConfigError::invalid("retention_operations", "too large"));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# seqstore shard configuration
#
# Durability mode: "always" (default) or "standard"
#   "always"   = fsync before a write is acknowledged
#   "standard" = background fsync every sync_interval_ms, may lose the
#                last interval on crash
durability = "always"
sync_interval_ms = 5000
sync_batch_size = 1000

# Translog generation roll threshold (default: 64MB)
generation_threshold_bytes = 67108864

# Uncommitted translog size that makes a flush due (default: 512MB)
flush_threshold_bytes = 536870912

# Operations kept below the global checkpoint for peer recovery
retention_operations = 0

# How long deletes stay in the version map after a refresh
gc_deletes_ms = 60000

# Add unknown fields to the mapping instead of rejecting the document
dynamic_mapping = true

# Consume the seqNo of a rejected document with a NoOp
noop_on_document_failure = true

# Gap handling when promoted to primary: "on_promotion" or "never"
gap_fill = "on_promotion"

# Largest document source accepted (default: 10MB)
max_document_bytes = 10485760

# Translog operations sorted and applied together during local recovery
recovery_batch_ops = 4096
"#
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: EngineConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| ConfigError::File {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|e| ConfigError::File {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}
