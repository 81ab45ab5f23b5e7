//! Native Interop Configuration
//!
//! Settings for the native interop layer: accessor bounds checking, native
//! library search paths, and block ownership defaults. The `[interop]`
//! section may appear in both the project and global config files; project
//! values override global ones.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Bounds checking mode for block accessors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoundsCheckMode {
    /// Accessor offsets are never validated against block extents
    #[default]
    Off,

    /// Accessor offsets are validated on blocks with a known extent
    Checked,
}

impl BoundsCheckMode {
    /// Check whether accessors should validate offsets
    pub fn is_checked(&self) -> bool {
        matches!(self, BoundsCheckMode::Checked)
    }
}

/// Native interop configuration from the `[interop]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct InteropConfig {
    /// Bounds checking mode for block accessors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds_check: Option<BoundsCheckMode>,

    /// Additional directories searched for native libraries
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub library_paths: Vec<PathBuf>,

    /// Release scope-bound blocks automatically when the scope exits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autorelease: Option<bool>,
}

impl InteropConfig {
    /// Get the effective bounds checking mode (default: off)
    pub fn bounds_check_mode(&self) -> BoundsCheckMode {
        self.bounds_check.unwrap_or_default()
    }

    /// Check whether scope-bound blocks are released automatically (default: true)
    pub fn autorelease_enabled(&self) -> bool {
        self.autorelease.unwrap_or(true)
    }

    /// Validate the interop configuration
    pub fn validate(&self) -> ConfigResult<()> {
        for path in &self.library_paths {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "interop.library_paths".to_string(),
                    reason: "path cannot be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Merge another interop config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &InteropConfig) {
        if other.bounds_check.is_some() {
            self.bounds_check = other.bounds_check;
        }
        if !other.library_paths.is_empty() {
            self.library_paths = other.library_paths.clone();
        }
        if other.autorelease.is_some() {
            self.autorelease = other.autorelease;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interop_section() {
        let toml = r#"
bounds_check = "checked"
library_paths = ["/opt/native/lib"]
autorelease = false
"#;

        let config: InteropConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.bounds_check_mode(), BoundsCheckMode::Checked);
        assert_eq!(config.library_paths, vec![PathBuf::from("/opt/native/lib")]);
        assert!(!config.autorelease_enabled());
    }

    #[test]
    fn test_defaults() {
        let config = InteropConfig::default();
        assert_eq!(config.bounds_check_mode(), BoundsCheckMode::Off);
        assert!(!config.bounds_check_mode().is_checked());
        assert!(config.autorelease_enabled());
        assert!(config.library_paths.is_empty());
    }

    #[test]
    fn test_empty_library_path_rejected() {
        let config = InteropConfig {
            library_paths: vec![PathBuf::new()],
            ..Default::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_configs() {
        let mut base = InteropConfig {
            bounds_check: Some(BoundsCheckMode::Off),
            library_paths: vec![PathBuf::from("/usr/lib")],
            autorelease: None,
        };
        let override_config = InteropConfig {
            bounds_check: Some(BoundsCheckMode::Checked),
            library_paths: vec![],
            autorelease: Some(false),
        };

        base.merge(&override_config);
        assert_eq!(base.bounds_check_mode(), BoundsCheckMode::Checked);
        assert_eq!(base.library_paths, vec![PathBuf::from("/usr/lib")]);
        assert!(!base.autorelease_enabled());
    }
}
