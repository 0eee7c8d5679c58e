//! # Pipeline Configuration
//!
//! Timeouts, device quirks and hashing policy for the southbound pipeline.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     OFSB_REQUEST_TIMEOUT_MS=5000                                       │
//! │     OFSB_GROUP_EXISTS_SIGNAL=GROUPEXISTS                               │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/ofsb/pipeline.toml (Linux)                               │
//! │     ~/Library/Application Support/org.ofsb.ofsb/pipeline.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # pipeline.toml
//! [transaction]
//! request_timeout_ms = 10000
//! barrier_timeout_ms = 30000
//! sweep_interval_ms = 250
//!
//! [device]
//! group_exists_signal = "GROUPEXISTS"
//! group_exists_text_fallback = true
//! outbound_queue_capacity = 1024
//! stale_marking = true
//!
//! [flow_hash]
//! include_flags = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use ofsb_core::FlowHashPolicy;

use crate::error::{PipelineError, PipelineResult};

// =============================================================================
// Transaction Settings
// =============================================================================

/// Deadlines for outstanding requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSettings {
    /// Deadline for a flow-mod / group-mod reply (milliseconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Deadline for a barrier reply (milliseconds).
    #[serde(default = "default_barrier_timeout")]
    pub barrier_timeout_ms: u64,

    /// How often the connection looks for expired requests (milliseconds).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_barrier_timeout() -> u64 {
    30_000
}

fn default_sweep_interval() -> u64 {
    250
}

impl Default for TransactionSettings {
    fn default() -> Self {
        TransactionSettings {
            request_timeout_ms: default_request_timeout(),
            barrier_timeout_ms: default_barrier_timeout(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

impl TransactionSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn barrier_timeout(&self) -> Duration {
        Duration::from_millis(self.barrier_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

// =============================================================================
// Device Settings
// =============================================================================

/// Per-device behaviour shared by all connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Text some devices put in a group-mod error when the group exists.
    #[serde(default = "default_group_exists_signal")]
    pub group_exists_signal: String,

    /// Match `group_exists_signal` when the error code is not
    /// `OFPGMFC_GROUP_EXISTS`.
    #[serde(default = "default_true")]
    pub group_exists_text_fallback: bool,

    /// Messages queued for the writer before `send` fails fast.
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Write a stale-flow marker before removing a flow.
    #[serde(default = "default_true")]
    pub stale_marking: bool,
}

fn default_group_exists_signal() -> String {
    "GROUPEXISTS".to_string()
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    1024
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            group_exists_signal: default_group_exists_signal(),
            group_exists_text_fallback: true,
            outbound_queue_capacity: default_queue_capacity(),
            stale_marking: true,
        }
    }
}

// =============================================================================
// Main Pipeline Configuration
// =============================================================================

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub transaction: TransactionSettings,

    #[serde(default)]
    pub device: DeviceSettings,

    #[serde(default)]
    pub flow_hash: FlowHashPolicy,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (pipeline.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> PipelineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading pipeline config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load pipeline config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> PipelineResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| PipelineError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PipelineError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| PipelineError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Pipeline config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> PipelineResult<()> {
        if self.transaction.request_timeout_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "request_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.transaction.barrier_timeout_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "barrier_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.transaction.sweep_interval_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "sweep_interval_ms must be greater than 0".into(),
            ));
        }

        if self.device.outbound_queue_capacity == 0 {
            return Err(PipelineError::InvalidConfig(
                "outbound_queue_capacity must be greater than 0".into(),
            ));
        }

        if self.device.group_exists_text_fallback && self.device.group_exists_signal.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "group_exists_signal must not be empty when the text fallback is enabled".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(ms) = env_u64("OFSB_REQUEST_TIMEOUT_MS") {
            debug!(ms, "Overriding request timeout from environment");
            self.transaction.request_timeout_ms = ms;
        }

        if let Some(ms) = env_u64("OFSB_BARRIER_TIMEOUT_MS") {
            self.transaction.barrier_timeout_ms = ms;
        }

        if let Some(ms) = env_u64("OFSB_SWEEP_INTERVAL_MS") {
            self.transaction.sweep_interval_ms = ms;
        }

        if let Ok(signal) = std::env::var("OFSB_GROUP_EXISTS_SIGNAL") {
            debug!(signal = %signal, "Overriding group-exists signal from environment");
            self.device.group_exists_signal = signal;
        }

        if let Some(enabled) = env_bool("OFSB_GROUP_EXISTS_TEXT_FALLBACK") {
            self.device.group_exists_text_fallback = enabled;
        }

        if let Some(enabled) = env_bool("OFSB_STALE_MARKING") {
            self.device.stale_marking = enabled;
        }

        if let Some(enabled) = env_bool("OFSB_FLOW_HASH_INCLUDE_FLAGS") {
            debug!(enabled, "Overriding flow hash policy from environment");
            self.flow_hash.include_flags = enabled;
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "ofsb", "ofsb")
            .map(|dirs| dirs.config_dir().join("pipeline.toml"))
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring non-numeric environment override");
            None
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            warn!(key, value = %raw, "Ignoring non-boolean environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.transaction.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.device.group_exists_signal, "GROUPEXISTS");
        assert!(config.device.group_exists_text_fallback);
        assert!(!config.flow_hash.include_flags);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = PipelineConfig::default();
        config.transaction.request_timeout_ms = 0;
        assert!(config.validate().unwrap_err().is_config_error());

        let mut config = PipelineConfig::default();
        config.device.group_exists_signal = "  ".into();
        assert!(config.validate().is_err());

        // Empty signal is fine once the fallback is off
        config.device.group_exists_text_fallback = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [transaction]
            request_timeout_ms = 500

            [flow_hash]
            include_flags = true
            "#,
        )
        .unwrap();

        assert_eq!(config.transaction.request_timeout_ms, 500);
        assert_eq!(config.transaction.barrier_timeout_ms, 30_000);
        assert!(config.flow_hash.include_flags);
        assert_eq!(config.device, DeviceSettings::default());
    }

    #[test]
    fn test_toml_serialization() {
        let config = PipelineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[transaction]"));
        assert!(toml_str.contains("[device]"));
        assert!(toml_str.contains("[flow_hash]"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let path = std::env::temp_dir()
            .join(format!("ofsb-config-{}", uuid::Uuid::new_v4()))
            .join("pipeline.toml");

        let mut config = PipelineConfig::default();
        config.transaction.sweep_interval_ms = 100;
        config.save(Some(path.clone())).unwrap();

        let loaded = PipelineConfig::load(Some(path.clone())).unwrap();
        assert_eq!(loaded.transaction.sweep_interval_ms, 100);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
