//! Project Configuration (opal.toml)
//!
//! Handles project-level configuration stored in `opal.toml` at the project root.

use crate::interop::InteropConfig;
use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Project configuration from opal.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Package metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<PackageConfig>,

    /// Native interop configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interop: Option<InteropConfig>,
}

/// Package metadata configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PackageConfig {
    /// Package name
    pub name: String,

    /// Package version (semver)
    pub version: String,

    /// Opal edition (e.g., "2026")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edition: Option<String>,

    /// Package description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Package authors
    #[serde(default)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,

    /// License identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

impl ProjectConfig {
    /// Load project configuration from a file
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

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        // Validate package config if present
        if let Some(pkg) = &self.package {
            if pkg.name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "package.name".to_string(),
                    reason: "name cannot be empty".to_string(),
                });
            }

            // Basic semver validation (just check format, not full parsing)
            if !is_valid_version(&pkg.version) {
                return Err(ConfigError::InvalidVersion(pkg.version.clone()));
            }

            // Validate edition if present
            if let Some(edition) = &pkg.edition {
                if !is_valid_edition(edition) {
                    return Err(ConfigError::InvalidValue {
                        field: "package.edition".to_string(),
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

    /// Get the package name, if present
    pub fn package_name(&self) -> Option<&str> {
        self.package.as_ref().map(|p| p.name.as_str())
    }

    /// Get the package version, if present
    pub fn package_version(&self) -> Option<&str> {
        self.package.as_ref().map(|p| p.version.as_str())
    }

    /// Get the edition, if present
    pub fn edition(&self) -> Option<&str> {
        self.package.as_ref().and_then(|p| p.edition.as_deref())
    }

    /// Merge another project config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &ProjectConfig) {
        if other.package.is_some() {
            self.package = other.package.clone();
        }
        if other.interop.is_some() {
            self.interop = other.interop.clone();
        }
    }
}

/// Basic semver validation (simplified)
fn is_valid_version(version: &str) -> bool {
    if version.is_empty() {
        return false;
    }

    // Split on '-' or '+' to separate version from pre-release/build
    let main_version = version.split(['-', '+']).next().unwrap_or("");

    if main_version.is_empty() {
        return false;
    }

    // Main version should be X.Y or X.Y.Z where X, Y, Z are digits
    let parts: Vec<&str> = main_version.split('.').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return false;
    }

    // All main version parts must be non-empty digits
    parts
        .iter()
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

/// Check if edition is valid
fn is_valid_edition(edition: &str) -> bool {
    matches!(edition, "2026" | "2027" | "2028") // Future-proof
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interop::BoundsCheckMode;

    #[test]
    fn test_parse_minimal_project_config() {
        let toml = r#"
[package]
name = "my-app"
version = "0.1.0"
"#;

        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.package_name(), Some("my-app"));
        assert_eq!(config.package_version(), Some("0.1.0"));
    }

    #[test]
    fn test_parse_full_project_config() {
        let toml = r#"
[package]
name = "my-app"
version = "1.0.0"
edition = "2026"
description = "A test application"
authors = ["Alice <alice@example.com>"]

[interop]
bounds_check = "checked"
library_paths = ["native/lib"]
autorelease = true
"#;

        let config: ProjectConfig = toml::from_str(toml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.package_name(), Some("my-app"));
        assert_eq!(config.edition(), Some("2026"));
        assert_eq!(
            config.interop.as_ref().unwrap().bounds_check,
            Some(BoundsCheckMode::Checked)
        );
    }

    #[test]
    fn test_version_validation() {
        assert!(is_valid_version("1.0.0"));
        assert!(is_valid_version("0.1.0"));
        assert!(is_valid_version("1.0"));
        assert!(is_valid_version("1.0.0-alpha"));
        assert!(!is_valid_version(""));
        assert!(!is_valid_version("1"));
        assert!(!is_valid_version("invalid"));
    }

    #[test]
    fn test_edition_validation() {
        assert!(is_valid_edition("2026"));
        assert!(is_valid_edition("2027"));
        assert!(!is_valid_edition("2025"));
        assert!(!is_valid_edition("invalid"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let toml = r#"
[package]
name = "my-app"
version = "0.1.0"
publisher = "nobody"
"#;

        assert!(toml::from_str::<ProjectConfig>(toml).is_err());
    }

    #[test]
    fn test_merge_configs() {
        let mut base = ProjectConfig::default();
        let override_config = ProjectConfig {
            package: Some(PackageConfig {
                name: "override".to_string(),
                version: "2.0.0".to_string(),
                edition: None,
                description: None,
                authors: vec![],
                license: None,
            }),
            ..Default::default()
        };

        base.merge(&override_config);
        assert_eq!(base.package_name(), Some("override"));
    }
}
