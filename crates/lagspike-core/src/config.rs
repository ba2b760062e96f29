//! Configuration management for lagspike
//!
//! Handles loading and validation of `lagspike.toml` files. Every field has
//! a default, so an empty file (or no file at all) is a valid configuration.
//!
//! ```toml
//! [general]
//! log_level = "info"
//! log_format = "pretty"
//!
//! [detector]
//! threshold_ms = 200
//! cooldown_ms = 15000
//!
//! [threads]
//! all_threads = false
//! main_thread_prefix = "server thread"
//!
//! [noise]
//! enabled = true
//! max_run_frames = 2
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::detector::DetectorConfig;
use crate::error::{ConfigError, Result};
use crate::logging::LogConfig;
use crate::noise::NoiseFilterConfig;
use crate::selection::ThreadSelection;

/// Environment variable naming the config file for [`Config::load`].
pub const CONFIG_ENV: &str = "LAGSPIKE_CONFIG";

/// Environment variable overriding `threads.all_threads`.
pub const ALL_THREADS_ENV: &str = "LAGSPIKE_ALL_THREADS";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Stall detection settings
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Which threads a report covers
    #[serde(default)]
    pub threads: ThreadSelection,

    /// Idle-thread suppression
    #[serde(default)]
    pub noise: NoiseFilterConfig,
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, ANSI colored
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

/// General configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log line format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Optional append-only log file
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GeneralConfig {
    #[must_use]
    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            level: self.log_level.clone(),
            format: self.log_format,
            file: self.log_file.clone(),
        }
    }
}

impl Config {
    /// Load from `$LAGSPIKE_CONFIG` if set, defaults otherwise, then apply
    /// environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_with(None)
    }

    /// Like [`Config::load`], with `path` taking precedence over
    /// `$LAGSPIKE_CONFIG`.
    pub fn load_with(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match path.or(env_path.as_deref()) {
            Some(path) => Self::load_from(path)?,
            None => Self::default(),
        };
        config.apply_all_threads_override(std::env::var(ALL_THREADS_ENV).ok().as_deref())?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let display = path.display().to_string();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(display).into());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(display, e.to_string()))?;
        Self::from_toml(&text)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML, e.g. for `lagspike config`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    pub fn validate(&self) -> Result<()> {
        if self.detector.threshold_ms == 0 {
            return Err(ConfigError::ValidationError("detector.threshold_ms must be > 0".into()).into());
        }
        if self.threads.main_thread_prefix.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "threads.main_thread_prefix must not be empty".into(),
            )
            .into());
        }
        if self.general.log_level.trim().is_empty() {
            return Err(ConfigError::ValidationError("general.log_level must not be empty".into()).into());
        }
        Ok(())
    }

    /// Apply a `LAGSPIKE_ALL_THREADS` value. `None` leaves the config alone.
    pub fn apply_all_threads_override(&mut self, value: Option<&str>) -> Result<()> {
        let Some(value) = value else {
            return Ok(());
        };
        self.threads.all_threads = match value.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "{ALL_THREADS_ENV} must be true or false, got {other:?}"
                ))
                .into());
            }
        };
        Ok(())
    }
}
