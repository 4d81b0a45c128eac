//! # breakmaps-config
//!
//! Configuration management for breakmaps.
//!
//! Loads configuration from:
//! 1. `~/.breakmaps/config.toml` (global), or an explicit file
//! 2. Environment variables (highest priority)
//!
//! Command-line flags are applied on top by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub mod logging;

/// Default number of nested levels created by a run.
pub const DEFAULT_MAX_DEPTH: u64 = 4 * 1024 * 1024;

/// Extra inodes/blocks demanded on top of `max_depth`.
pub const DEFAULT_SAFETY_MARGIN: u64 = 10;

/// Levels between two progress samples.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 1000;

/// Line buffer size of the interactive runner (one byte is reserved, as for a C string).
pub const DEFAULT_MAX_LINE: usize = 1024;

pub const DEFAULT_MAP_LISTING: &str = "/proc/self/map_files";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub descent: DescentConfig,
    pub maps: MapsConfig,
    pub shell: ShellConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load config from the global location, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                debug!("Loading global config from {:?}", global_path);
                config = Self::read_file(&global_path)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from an explicit file. Environment overrides still apply.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {:?}", path);
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Global config path: ~/.breakmaps/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".breakmaps/config.toml"))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(depth) = std::env::var("BREAKMAPS_MAX_DEPTH") {
            self.descent.max_depth = depth.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "BREAKMAPS_MAX_DEPTH",
                reason: format!("{:?} is not a number", depth),
            })?;
        }
        if let Ok(listing) = std::env::var("BREAKMAPS_MAP_LISTING") {
            self.maps.listing = PathBuf::from(listing);
        }
        Ok(())
    }

    /// Reject values the engines cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.descent.max_depth == 0 {
            return Err(ConfigError::Invalid {
                key: "descent.max_depth",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.descent.progress_interval == 0 {
            return Err(ConfigError::Invalid {
                key: "descent.progress_interval",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.shell.max_line < 2 {
            return Err(ConfigError::Invalid {
                key: "shell.max_line",
                reason: format!("{} leaves no room for a command", self.shell.max_line),
            });
        }
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        Config::default().to_toml()
    }

    pub fn to_toml(&self) -> String {
        // Every field is a plain scalar or path; serialization cannot fail.
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

/// Descent and unwind tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescentConfig {
    /// Number of nested levels to create
    pub max_depth: u64,
    /// Inodes/blocks required on top of `max_depth`
    pub safety_margin: u64,
    /// Levels between progress samples
    pub progress_interval: u64,
}

impl Default for DescentConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            safety_margin: DEFAULT_SAFETY_MARGIN,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Mapped-region enumeration source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapsConfig {
    pub listing: PathBuf,
}

impl Default for MapsConfig {
    fn default() -> Self {
        Self {
            listing: PathBuf::from(DEFAULT_MAP_LISTING),
        }
    }
}

/// Interactive runner settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Line buffer size; at most `max_line - 1` bytes of a line are kept
    pub max_line: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            max_line: DEFAULT_MAX_LINE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when neither BREAKMAPS_LOG nor RUST_LOG is set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
