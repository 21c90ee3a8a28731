//! Configuration management for Sealpost
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (SEALPOST_* prefix, highest precedence)
//! 2. sealpost.local.toml (gitignored, local overrides)
//! 3. sealpost.toml (project config)
//! 4. ~/.config/sealpost/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Sealpost configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealpostConfig {
    pub boxer: BoxerConfig,
    pub sender: SenderConfig,
    pub outbox: OutboxConfig,
    pub deliverer: DelivererConfig,
}

/// Wire version used for newly boxed messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum WireVersion {
    V1,
    #[default]
    V2,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoxerConfig {
    pub default_version: WireVersion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// How many cached messages are read to compute prev pointers.
    pub history_window: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            history_window: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub data_dir: PathBuf,
    pub file_name: String,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".sealpost/outbox"),
            file_name: "outbox.log".to_string(),
        }
    }
}

impl OutboxConfig {
    /// Full path of the outbox file.
    pub fn path(&self) -> PathBuf {
        self.data_dir.join(&self.file_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelivererConfig {
    pub enabled: bool,
    /// Period of the background sweep when no enqueue wakes the worker.
    pub sweep_interval_ms: u64,
    /// Pending wake signals held before further signals are coalesced.
    pub wake_queue_capacity: usize,
    /// Failed attempts before a record is parked in the error state.
    pub max_attempts: u32,
}

impl Default for DelivererConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_ms: 30_000,
            wake_queue_capacity: 100,
            max_attempts: 5,
        }
    }
}

impl DelivererConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl SealpostConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Configuration tuned for tests: short sweep, small queue.
    pub fn testing() -> Self {
        Self {
            deliverer: DelivererConfig {
                sweep_interval_ms: 50,
                wake_queue_capacity: 8,
                max_attempts: 3,
                ..Default::default()
            },
            sender: SenderConfig { history_window: 20 },
            ..Default::default()
        }
    }

    /// Resolve relative paths to absolute
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();

        if self.outbox.data_dir.is_relative() {
            self.outbox.data_dir = base.join(&self.outbox.data_dir);
        }
    }

    /// Rejects values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.deliverer.sweep_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "deliverer.sweep_interval_ms must be positive".to_string(),
            ));
        }
        if self.deliverer.wake_queue_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "deliverer.wake_queue_capacity must be positive".to_string(),
            ));
        }
        if self.deliverer.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "deliverer.max_attempts must be positive".to_string(),
            ));
        }
        if self.sender.history_window == 0 {
            return Err(ConfigError::ValidationError(
                "sender.history_window must be positive".to_string(),
            ));
        }
        if self.outbox.file_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "outbox.file_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SealpostConfig::default();
        assert_eq!(config.boxer.default_version, WireVersion::V2);
        assert_eq!(config.deliverer.sweep_interval(), Duration::from_secs(30));
        assert_eq!(config.deliverer.wake_queue_capacity, 100);
        assert_eq!(config.sender.history_window, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_testing_config() {
        let config = SealpostConfig::testing();
        assert_eq!(config.deliverer.sweep_interval_ms, 50);
        assert_eq!(config.deliverer.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_interval() {
        let mut config = SealpostConfig::default();
        config.deliverer.sweep_interval_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("sweep_interval_ms")
        ));
    }

    #[test]
    fn test_path_resolution() {
        let mut config = SealpostConfig::default();
        config.resolve_paths("/home/user/project");

        assert_eq!(
            config.outbox.data_dir,
            PathBuf::from("/home/user/project/.sealpost/outbox")
        );
        assert_eq!(
            config.outbox.path(),
            PathBuf::from("/home/user/project/.sealpost/outbox/outbox.log")
        );
    }
}
