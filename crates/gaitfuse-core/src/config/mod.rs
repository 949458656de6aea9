//! Configuration management for gaitfuse.
//!
//! Configuration is loaded from `~/.gaitfuse/config.toml` (or the platform
//! config directory) with defaults taken from the reference training setup.
//! The resulting struct is passed explicitly to every stage that needs it.

mod types;
mod validate;

pub use types::*;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration structure for gaitfuse.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// GEI descriptor store
    pub gei: GeiConfig,

    /// Backbone selection
    pub model: ModelConfig,

    /// Training loop
    pub training: TrainingConfig,

    /// Retrieval evaluation
    pub evaluation: EvaluationConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Returns default configuration if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_or_default(&Self::default_path())
    }

    /// Load `path` if it exists, otherwise return the defaults.
    ///
    /// A file that exists but fails to parse or validate is an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path.
    ///
    /// Uses platform-appropriate directories:
    /// - macOS: ~/Library/Application Support/com.gaitfuse.gaitfuse/config.toml
    /// - Linux: ~/.config/gaitfuse/config.toml
    /// - Windows: C:\Users\<User>\AppData\Roaming\gaitfuse\config\config.toml
    ///
    /// Falls back to ~/.gaitfuse/config.toml if directory detection fails.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("com", "gaitfuse", "gaitfuse")
            .map(|dirs| dirs.config_dir().to_path_buf().join("config.toml"))
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".gaitfuse").join("config.toml")
            })
    }

    /// Get the resolved GEI descriptor directory (with ~ expansion).
    pub fn gei_dir(&self) -> PathBuf {
        expand(&self.gei.dir)
    }

    /// Get the resolved checkpoint directory (with ~ expansion).
    pub fn save_dir(&self) -> PathBuf {
        expand(&self.training.save_dir)
    }

    /// Get the resolved result file path (with ~ expansion).
    pub fn result_file(&self) -> PathBuf {
        expand(&self.evaluation.result_file)
    }

    /// Serialize the config to a pretty TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

fn expand(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&path_str).into_owned())
}
