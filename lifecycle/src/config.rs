//! Engine configuration
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `CIVIC_SLA_LOW_HOURS` | `120` | SLA budget for low priority |
//! | `CIVIC_SLA_MEDIUM_HOURS` | `96` | SLA budget for medium priority |
//! | `CIVIC_SLA_HIGH_HOURS` | `48` | SLA budget for high priority |
//! | `CIVIC_SLA_URGENT_HOURS` | `24` | SLA budget for urgent priority |
//! | `CIVIC_EVENT_CAPACITY` | `256` | Broadcast buffer per event bus |
//! | `CIVIC_NOTIFICATIONS_ENABLED` | `true` | Dispatch notifications after decisions |
//! | `CIVIC_MAX_MESSAGE_LEN` | `4000` | Longest accepted channel message |
//!
//! A TOML file with the same fields can be loaded with
//! [`EngineConfig::from_toml_file`]:
//!
//! ```toml
//! event_capacity = 512
//!
//! [sla]
//! low_hours = 168
//! medium_hours = 96
//! high_hours = 48
//! urgent_hours = 12
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::sla::SlaPolicy;

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Runtime configuration for the lifecycle engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial SLA table (adjustable at runtime by an admin)
    pub sla: SlaPolicy,
    /// Broadcast channel capacity of the event bus
    pub event_capacity: usize,
    /// Whether notifications are dispatched at all
    pub notifications_enabled: bool,
    /// Maximum characters in a channel message
    pub max_message_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sla: SlaPolicy::default(),
            event_capacity: 256,
            notifications_enabled: true,
            max_message_len: 4000,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(h) = parse_env("CIVIC_SLA_LOW_HOURS") {
            config.sla.low_hours = h;
        }
        if let Some(h) = parse_env("CIVIC_SLA_MEDIUM_HOURS") {
            config.sla.medium_hours = h;
        }
        if let Some(h) = parse_env("CIVIC_SLA_HIGH_HOURS") {
            config.sla.high_hours = h;
        }
        if let Some(h) = parse_env("CIVIC_SLA_URGENT_HOURS") {
            config.sla.urgent_hours = h;
        }
        if let Some(n) = parse_env("CIVIC_EVENT_CAPACITY") {
            config.event_capacity = n;
        }
        if let Ok(val) = std::env::var("CIVIC_NOTIFICATIONS_ENABLED") {
            config.notifications_enabled = parse_bool(&val);
        }
        if let Some(n) = parse_env("CIVIC_MAX_MESSAGE_LEN") {
            config.max_message_len = n;
        }

        config
    }

    /// Load config from a TOML file; missing fields take their defaults
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sla
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        if self.max_message_len == 0 {
            return Err(ConfigError::Invalid(
                "max_message_len must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Accepts "1", "true", or "yes" (case-insensitive) as enabled
fn parse_bool(val: &str) -> bool {
    matches!(val.trim().to_lowercase().as_str(), "1" | "true" | "yes")
}
