//! Configuration loading and typed config structures for the Crossing controller.
//!
//! The canonical configuration lives in `crossing-config.yaml` in the working
//! directory. This module defines strongly-typed structs that mirror the YAML
//! structure, a loader that reads the file, and [`CrossingConfig::validate`]
//! which rejects combinations the controller cannot run with.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but describes an unusable controller.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level controller configuration.
///
/// Mirrors the structure of `crossing-config.yaml`. All fields have
/// defaults, so an empty document is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CrossingConfig {
    /// Listener and session limits.
    #[serde(default)]
    pub server: ServerSettings,

    /// Phase duration bounds.
    #[serde(default)]
    pub timing: TimingConfig,

    /// Vehicle weights used to compute demand.
    #[serde(default)]
    pub weights: WeightsConfig,

    /// Periods of the three scheduler loops.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CrossingConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `CROSSING_HOST` overrides `server.host`
    /// - `CROSSING_PORT` overrides `server.port` (ignored if unparseable)
    /// - `CROSSING_LOG_LEVEL` overrides `logging.level`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string and apply env overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config = Self::parse_without_env(yaml)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string, ignoring the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse_without_env(yaml: &str) -> Result<Self, ConfigError> {
        // serde_yml rejects an empty document; treat it as all-defaults.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }

    /// Override selected values with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CROSSING_HOST") {
            self.server.host = val;
        }
        if let Some(port) = std::env::var("CROSSING_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
        {
            self.server.port = port;
        }
        if let Ok(val) = std::env::var("CROSSING_LOG_LEVEL") {
            self.logging.level = val;
        }
    }

    /// Check that the configuration describes a runnable controller.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first violated rule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timing.validate()?;
        self.weights.validate()?;
        self.scheduler.validate()?;
        self.server.validate()
    }
}

/// Listener and per-session limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerSettings {
    /// The host address to bind to (e.g. `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: String,

    /// The TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of concurrently registered sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Seconds without inbound traffic before a session is dropped.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Longest accepted frame, in bytes, excluding the newline.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Frames that may wait in one session's outbound queue.
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

impl ServerSettings {
    /// The inactivity timeout as a [`Duration`].
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(invalid("server.max_sessions must be at least 1"));
        }
        if self.idle_timeout_secs == 0 {
            return Err(invalid("server.idle_timeout_secs must be at least 1"));
        }
        if self.max_frame_bytes == 0 {
            return Err(invalid("server.max_frame_bytes must be at least 1"));
        }
        if self.outbound_queue == 0 {
            return Err(invalid("server.outbound_queue must be at least 1"));
        }
        Ok(())
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_sessions: default_max_sessions(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_frame_bytes: default_max_frame_bytes(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

/// Phase duration bounds, all in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TimingConfig {
    /// Shortest green phase (`MIN_GREEN`).
    #[serde(default = "default_min_green_secs")]
    pub min_green_secs: u64,

    /// Longest green phase (`MAX_GREEN`).
    #[serde(default = "default_max_green_secs")]
    pub max_green_secs: u64,

    /// Fixed yellow phase length (`YELLOW_DURATION`).
    #[serde(default = "default_yellow_secs")]
    pub yellow_secs: u64,

    /// Lower bound a full four-phase cycle must be able to reach
    /// (`MIN_CYCLE_TIME`).
    #[serde(default = "default_min_cycle_secs")]
    pub min_cycle_secs: u64,
}

impl TimingConfig {
    /// Longest possible cycle: both groups at `MAX_GREEN` plus two yellows.
    pub const fn max_cycle_secs(&self) -> u64 {
        self.max_green_secs
            .saturating_add(self.yellow_secs)
            .saturating_mul(2)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.min_green_secs == 0 {
            return Err(invalid("timing.min_green_secs must be at least 1"));
        }
        if self.min_green_secs > self.max_green_secs {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "timing.min_green_secs ({}) exceeds timing.max_green_secs ({})",
                    self.min_green_secs, self.max_green_secs
                ),
            });
        }
        if self.yellow_secs == 0 {
            return Err(invalid("timing.yellow_secs must be at least 1"));
        }
        if self.min_cycle_secs > self.max_cycle_secs() {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "timing.min_cycle_secs ({}) is unreachable; the longest cycle is {}s",
                    self.min_cycle_secs,
                    self.max_cycle_secs()
                ),
            });
        }
        Ok(())
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            min_green_secs: default_min_green_secs(),
            max_green_secs: default_max_green_secs(),
            yellow_secs: default_yellow_secs(),
            min_cycle_secs: default_min_cycle_secs(),
        }
    }
}

/// Relative weight of each vehicle class in the demand score.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct WeightsConfig {
    /// Weight of one normal vehicle.
    #[serde(default = "default_normal_weight")]
    pub normal: f64,

    /// Weight of one heavy vehicle.
    #[serde(default = "default_heavy_weight")]
    pub heavy: f64,
}

impl WeightsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("weights.normal", self.normal), ("weights.heavy", self.heavy)] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid {
                    reason: format!("{name} must be a finite non-negative number, got {value}"),
                });
            }
        }
        Ok(())
    }
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            normal: default_normal_weight(),
            heavy: default_heavy_weight(),
        }
    }
}

/// Periods of the phase-advance, broadcast, and idle-cleanup loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    /// Phase-advance loop period in milliseconds.
    #[serde(default = "default_phase_advance_ms")]
    pub phase_advance_ms: u64,

    /// Broadcast loop period in milliseconds.
    #[serde(default = "default_broadcast_ms")]
    pub broadcast_ms: u64,

    /// Idle-cleanup loop period in milliseconds.
    #[serde(default = "default_cleanup_ms")]
    pub cleanup_ms: u64,
}

impl SchedulerConfig {
    /// Phase-advance period as a [`Duration`].
    pub const fn phase_advance(&self) -> Duration {
        Duration::from_millis(self.phase_advance_ms)
    }

    /// Broadcast period as a [`Duration`].
    pub const fn broadcast(&self) -> Duration {
        Duration::from_millis(self.broadcast_ms)
    }

    /// Idle-cleanup period as a [`Duration`].
    pub const fn cleanup(&self) -> Duration {
        Duration::from_millis(self.cleanup_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.phase_advance_ms == 0 || self.broadcast_ms == 0 || self.cleanup_ms == 0 {
            return Err(invalid("scheduler intervals must be at least 1ms"));
        }
        Ok(())
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            phase_advance_ms: default_phase_advance_ms(),
            broadcast_ms: default_broadcast_ms(),
            cleanup_ms: default_cleanup_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn invalid(reason: &str) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_port() -> u16 {
    8765
}

const fn default_max_sessions() -> usize {
    100
}

const fn default_idle_timeout_secs() -> u64 {
    120
}

const fn default_max_frame_bytes() -> usize {
    64 * 1024
}

const fn default_outbound_queue() -> usize {
    64
}

const fn default_min_green_secs() -> u64 {
    5
}

const fn default_max_green_secs() -> u64 {
    60
}

const fn default_yellow_secs() -> u64 {
    3
}

const fn default_min_cycle_secs() -> u64 {
    16
}

const fn default_normal_weight() -> f64 {
    1.0
}

const fn default_heavy_weight() -> f64 {
    2.5
}

const fn default_phase_advance_ms() -> u64 {
    100
}

const fn default_broadcast_ms() -> u64 {
    500
}

const fn default_cleanup_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_owned()
}
