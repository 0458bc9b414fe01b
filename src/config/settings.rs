//! Configuration settings for studysync.
//!
//! Settings are loaded from `~/.studysync/config.yaml`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::args::OutputFormat;
use crate::config::Paths;
use crate::error::StudySyncError;
use crate::features::sync::{ReconnectMode, RejectionPolicy};

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,
    /// Remote API settings.
    pub api: ApiConfig,
    /// Queue replay settings.
    pub sync: SyncConfig,
    /// Connectivity probing settings.
    pub connectivity: ConnectivityConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default output format.
    #[serde(default = "default_output_format")]
    pub default_output: OutputFormat,
    /// Color output setting.
    #[serde(default = "default_color")]
    pub color: ColorSetting,
    /// Active user when `--user` is not given.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Color output setting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColorSetting {
    /// Auto-detect based on terminal.
    #[default]
    Auto,
    /// Always use colors.
    Always,
    /// Never use colors.
    Never,
}

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL of the hosted backend.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer token sent with every request.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// How rejected operations are handled.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectionMode {
    /// Keep rejected operations queued forever.
    RetryForever,
    /// Move operations to the dead-letter partition after `max_rejections`.
    #[default]
    DeadLetter,
}

/// Queue replay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Sync automatically on reconnect, or wait for confirmation.
    #[serde(default)]
    pub reconnect_mode: ReconnectMode,
    /// Seconds to wait for completion signals before clearing "syncing".
    #[serde(default = "default_completion_wait")]
    pub completion_wait_secs: u64,
    /// Rejection handling.
    #[serde(default)]
    pub rejection_policy: RejectionMode,
    /// Rejections before an operation is dead-lettered.
    #[serde(default = "default_max_rejections")]
    pub max_rejections: u32,
    /// Register background-sync tags when operations are queued.
    #[serde(default = "default_true")]
    pub background_sync: bool,
}

/// Connectivity probing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// Seconds between probes while watching.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,
    /// Probe connect timeout in milliseconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Identical consecutive readings required before reporting a transition.
    #[serde(default = "default_debounce_samples")]
    pub debounce_samples: u32,
}

// Default value functions for serde
const fn default_output_format() -> OutputFormat {
    OutputFormat::Pretty
}

const fn default_color() -> ColorSetting {
    ColorSetting::Auto
}

fn default_base_url() -> String {
    "http://localhost:8080/api".to_string()
}

const fn default_timeout_secs() -> u64 {
    15
}

const fn default_completion_wait() -> u64 {
    5
}

const fn default_max_rejections() -> u32 {
    5
}

const fn default_true() -> bool {
    true
}

const fn default_probe_interval() -> u64 {
    3
}

const fn default_probe_timeout() -> u64 {
    1500
}

const fn default_debounce_samples() -> u32 {
    2
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_output: default_output_format(),
            color: default_color(),
            user_id: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect_mode: ReconnectMode::default(),
            completion_wait_secs: default_completion_wait(),
            rejection_policy: RejectionMode::default(),
            max_rejections: default_max_rejections(),
            background_sync: default_true(),
        }
    }
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: default_probe_interval(),
            probe_timeout_ms: default_probe_timeout(),
            debounce_samples: default_debounce_samples(),
        }
    }
}

impl SyncConfig {
    /// Resolve the configured rejection policy.
    #[must_use]
    pub fn rejection_policy(&self) -> RejectionPolicy {
        match self.rejection_policy {
            RejectionMode::RetryForever => RejectionPolicy::RetryForever,
            RejectionMode::DeadLetter => RejectionPolicy::DeadLetter {
                max_attempts: self.max_rejections.max(1),
            },
        }
    }

    /// Bounded wait for completion signals.
    #[must_use]
    pub const fn completion_wait(&self) -> Duration {
        Duration::from_secs(self.completion_wait_secs)
    }
}

impl ConnectivityConfig {
    /// Interval between probes.
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// Connect timeout for a single probe.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Config {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self, StudySyncError> {
        let paths = Paths::new()?;
        Self::load_from_path(&paths.config_file)
    }

    /// Load configuration from a specific path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, StudySyncError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|e| {
            StudySyncError::Config(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;

        serde_yaml::from_str(&contents).map_err(|e| {
            StudySyncError::Config(format!(
                "Failed to parse config file {}: {e}",
                path.display()
            ))
        })
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_to_path(&self, path: &std::path::Path) -> Result<(), StudySyncError> {
        let contents = serde_yaml::to_string(self)
            .map_err(|e| StudySyncError::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, contents).map_err(|e| {
            StudySyncError::Config(format!(
                "Failed to write config file {}: {e}",
                path.display()
            ))
        })
    }
}
