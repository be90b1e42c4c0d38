//! Configuration module
//!
//! Loaded from `~/.config/charging-network/config.toml` unless the
//! `CHARGING_NETWORK_CONFIG` environment variable points elsewhere. Every
//! section is optional.
//!
//! ```toml
//! [logging]
//! level = "info"
//! format = "text"        # or "json"
//!
//! [timeline]
//! retention = 50
//! resolution = "second"  # millisecond | second | minute
//! backfill = "ordered"   # ordered | prepend
//!
//! [router]
//! request_timeout_ms = 10000
//! affinity_ttl_secs = 86400   # 0 disables expiry
//! affinity_capacity = 10000
//!
//! [events]
//! capacity = 1024
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::events::event_bus::DEFAULT_CAPACITY;
use crate::application::roaming::{RouterSettings, DEFAULT_AFFINITY_CAPACITY};
use crate::domain::status::timeline::DEFAULT_RETENTION;
use crate::domain::{BackfillPolicy, TimelineSettings, TimestampResolution};
use crate::shared::ConfigError;

pub const CONFIG_ENV_VAR: &str = "CHARGING_NETWORK_CONFIG";

/// `~/.config/charging-network/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("charging-network")
        .join("config.toml")
}

/// Path from the environment variable, falling back to [`default_config_path`].
pub fn config_path_from_env() -> PathBuf {
    std::env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub timeline: TimelineConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

impl AppConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.timeline.retention == 0 {
            return Err(ConfigError::Invalid(
                "timeline.retention must be at least 1".to_string(),
            ));
        }
        if self.router.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "router.request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.events.capacity == 0 {
            return Err(ConfigError::Invalid(
                "events.capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineConfig {
    #[serde(default = "default_retention")]
    pub retention: usize,
    #[serde(default)]
    pub resolution: TimestampResolution,
    #[serde(default)]
    pub backfill: BackfillPolicy,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            retention: default_retention(),
            resolution: TimestampResolution::default(),
            backfill: BackfillPolicy::default(),
        }
    }
}

fn default_retention() -> usize {
    DEFAULT_RETENTION
}

impl From<&TimelineConfig> for TimelineSettings {
    fn from(config: &TimelineConfig) -> Self {
        Self {
            retention: config.retention,
            resolution: config.resolution,
            backfill: config.backfill,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_affinity_ttl_secs")]
    pub affinity_ttl_secs: u64,
    #[serde(default = "default_affinity_capacity")]
    pub affinity_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            affinity_ttl_secs: default_affinity_ttl_secs(),
            affinity_capacity: default_affinity_capacity(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_affinity_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_affinity_capacity() -> usize {
    DEFAULT_AFFINITY_CAPACITY
}

impl From<&RouterConfig> for RouterSettings {
    fn from(config: &RouterConfig) -> Self {
        let ttl = i64::try_from(config.affinity_ttl_secs).unwrap_or(i64::MAX);
        Self {
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            affinity_ttl: (ttl > 0).then(|| chrono::Duration::seconds(ttl.min(i64::MAX / 1000))),
            affinity_capacity: config.affinity_capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

fn default_event_capacity() -> usize {
    DEFAULT_CAPACITY
}
