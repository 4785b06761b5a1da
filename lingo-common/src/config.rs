//! Configuration loading and config file resolution
//!
//! Bootstrap configuration lives in a small TOML file. Every field has a
//! compiled default, so a missing file (or a missing section) never prevents
//! startup: the loader warns and falls back to defaults. A file that exists
//! but cannot be parsed, or that carries an invalid retry policy, is an error.
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `LINGO_CONFIG` environment variable
//! 3. Platform config directory (`~/.config/lingo/config.toml` on Linux)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "LINGO_CONFIG";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Backoff for remote calls wrapped in the retry executor (optional)
    #[serde(default)]
    pub retry: RetrySettings,

    /// History data source parameters (optional)
    #[serde(default)]
    pub history: HistorySettings,

    /// Sync event bus parameters (optional)
    #[serde(default)]
    pub events: EventSettings,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Retry executor settings, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            growth_factor: default_growth_factor(),
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            growth_factor: self.growth_factor,
        }
    }
}

/// History data source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySettings {
    /// Display-row cap for the live history subscription
    #[serde(default = "default_history_row_limit")]
    pub row_limit: usize,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            row_limit: default_history_row_limit(),
        }
    }
}

/// Sync event bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSettings {
    #[serde(default = "default_event_capacity")]
    pub capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            capacity: default_event_capacity(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    5000
}

fn default_growth_factor() -> f64 {
    2.0
}

fn default_history_row_limit() -> usize {
    200
}

fn default_event_capacity() -> usize {
    256
}

impl TomlConfig {
    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file is missing
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = Self::from_toml_str(&content).map_err(|e| match e {
                    Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
                    other => other,
                })?;
                info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Config file {} not found, using compiled defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<()> {
        self.retry
            .to_policy()
            .validate()
            .map_err(|e| Error::Config(format!("[retry] {}", e)))?;

        if self.history.row_limit == 0 {
            return Err(Error::Config(
                "[history] row_limit must be at least 1".to_string(),
            ));
        }
        if self.events.capacity == 0 {
            return Err(Error::Config(
                "[events] capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resolve the config file path following the priority order
///
/// Returns `None` when no argument or environment override is given and the
/// platform config directory cannot be determined.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    default_config_path()
}

/// Platform default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("lingo").join("config.toml"))
}

/// Resolve and load configuration
///
/// Missing files degrade to defaults; malformed files are errors.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) => TomlConfig::load(&path),
        None => {
            warn!("Could not determine config directory, using compiled defaults");
            Ok(TomlConfig::default())
        }
    }
}
