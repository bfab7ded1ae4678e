//! topicbridge configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transform::DEFAULT_TRANSFORM_TYPES;

/// Slowest accepted update rate (Hz); slower requests are clamped to it
pub const MIN_UPDATE_RATE: f64 = 0.01;

/// Main topicbridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Log file name, placed under the data dir; stderr when unset
    #[serde(rename = "log-file")]
    pub log_file: Option<String>,

    /// Subscription synchronizer and pipeline settings
    pub bridge: BridgeConfig,

    /// Client socket settings
    pub server: ServerConfig,
}

impl Config {
    /// Reject settings the bridge cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.bridge.robot_model.trim().is_empty() {
            return Err(eyre::eyre!("bridge.robot-model must not be empty"));
        }
        if self.bridge.sync_interval_ms == 0 {
            return Err(eyre::eyre!("bridge.sync-interval-ms must be greater than zero"));
        }
        if self.bridge.ping_interval_ms == 0 {
            return Err(eyre::eyre!("bridge.ping-interval-ms must be greater than zero"));
        }
        if !(self.server.max_update_rate.is_finite() && self.server.max_update_rate >= MIN_UPDATE_RATE) {
            return Err(eyre::eyre!(
                "server.max-update-rate must be a number of at least {}, got {}",
                MIN_UPDATE_RATE,
                self.server.max_update_rate
            ));
        }
        if self.server.max_message_size == 0 {
            return Err(eyre::eyre!("server.max-message-size must be greater than zero"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .topicbridge.yml
        let local_config = PathBuf::from(".topicbridge.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/topicbridge/topicbridge.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("topicbridge").join("topicbridge.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Subscription synchronizer and pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Robot model; the transform target frame is `<model lowercased>/base_link`
    #[serde(rename = "robot-model")]
    pub robot_model: String,

    /// Warn about topics that cannot be served instead of skipping quietly
    #[serde(rename = "strict-topics")]
    pub strict_topics: bool,

    /// Reconciliation period in milliseconds
    #[serde(rename = "sync-interval-ms")]
    pub sync_interval_ms: u64,

    /// Liveness probe period in milliseconds
    #[serde(rename = "ping-interval-ms")]
    pub ping_interval_ms: u64,

    /// Type-name fragments whose messages get a `_transform`
    #[serde(rename = "transform-types")]
    pub transform_types: Vec<String>,

    /// Throttle comparison tolerance in microseconds
    #[serde(rename = "throttle-epsilon-us")]
    pub throttle_epsilon_us: u64,

    /// Outbound dispatch queue capacity
    #[serde(rename = "dispatch-buffer")]
    pub dispatch_buffer: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            robot_model: "robot".to_string(),
            strict_topics: false,
            sync_interval_ms: 1000,
            ping_interval_ms: 5000,
            transform_types: DEFAULT_TRANSFORM_TYPES.iter().map(|s| s.to_string()).collect(),
            throttle_epsilon_us: 100,
            dispatch_buffer: 1024,
        }
    }
}

impl BridgeConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn throttle_epsilon(&self) -> Duration {
        Duration::from_micros(self.throttle_epsilon_us)
    }

    /// Target frame for transform lookups
    pub fn base_frame(&self) -> String {
        format!("{}/base_link", self.robot_model.trim().to_lowercase())
    }
}

/// Client socket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Unix socket clients connect to
    #[serde(rename = "socket-path")]
    pub socket_path: PathBuf,

    /// Update rate (Hz) for subscriptions that do not ask for one
    #[serde(rename = "max-update-rate")]
    pub max_update_rate: f64,

    /// Longest accepted client line in bytes
    #[serde(rename = "max-message-size")]
    pub max_message_size: usize,

    /// Per-client outbound queue capacity
    #[serde(rename = "client-buffer")]
    pub client_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            max_update_rate: 24.0,
            max_message_size: 64 * 1024,
            client_buffer: 256,
        }
    }
}

impl ServerConfig {
    /// Interval between records for a given client rate; falls back to the
    /// default rate for missing or non-positive values and clamps slow rates
    /// to [`MIN_UPDATE_RATE`]
    pub fn interval_for_rate(&self, rate: Option<f64>) -> Duration {
        let slowest = Duration::from_secs_f64(1.0 / MIN_UPDATE_RATE);
        let rate = rate
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(self.max_update_rate)
            .max(MIN_UPDATE_RATE);
        Duration::try_from_secs_f64(1.0 / rate).unwrap_or(slowest).min(slowest)
    }
}

/// `$XDG_RUNTIME_DIR/topicbridge/bridge.sock`, or under the temp dir
fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("topicbridge")
        .join("bridge.sock")
}
