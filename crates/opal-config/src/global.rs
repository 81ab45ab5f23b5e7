//! Global Configuration (~/.opal/config.toml)
//!
//! Handles user-level configuration stored in the home directory.

use crate::interop::InteropConfig;
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global configuration from ~/.opal/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Default settings for new projects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,

    /// Native interop configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interop: Option<InteropConfig>,
}

/// Default settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfig {
    /// Default edition for new projects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edition: Option<String>,

    /// Default author
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Default license
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

impl GlobalConfig {
    /// Load global configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the global configuration
    pub fn validate(&self) -> ConfigResult<()> {
        // Validate edition if present
        if let Some(defaults) = &self.defaults {
            if let Some(edition) = &defaults.edition {
                if !is_valid_edition(edition) {
                    return Err(ConfigError::InvalidValue {
                        field: "defaults.edition".to_string(),
                        reason: format!("invalid edition '{}'", edition),
                    });
                }
            }
        }

        // Validate interop config if present
        if let Some(interop) = &self.interop {
            interop.validate()?;
        }

        Ok(())
    }

    /// Get the global config file path (~/.opal/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".opal").join("config.toml"))
    }

    /// Get the default edition
    pub fn default_edition(&self) -> Option<&str> {
        self.defaults.as_ref().and_then(|d| d.edition.as_deref())
    }

    /// Merge another global config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &GlobalConfig) {
        if other.defaults.is_some() {
            self.defaults = other.defaults.clone();
        }
        if other.interop.is_some() {
            self.interop = other.interop.clone();
        }
    }
}

/// Check if edition is valid
fn is_valid_edition(edition: &str) -> bool {
    matches!(edition, "2026" | "2027" | "2028")
}
