//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::GlobalConfig;
use crate::interop::{BoundsCheckMode, InteropConfig};
use crate::project::ProjectConfig;
use crate::ConfigResult;
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.opal/config.toml) - lowest priority
/// 2. Project config (./opal.toml) - overrides global
/// 3. Environment variables (OPAL_*) - overrides project
/// 4. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone)]
pub struct Config {
    /// Project configuration
    pub project: ProjectConfig,

    /// Global configuration
    pub global: GlobalConfig,

    /// Project root directory (where opal.toml was found)
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find opal.toml, then loads and merges
    /// global config if it exists.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        // Find project root (directory containing opal.toml)
        let (project_root, project_config) = self.find_project_config(start_dir)?;

        // Load global config (optional)
        let global_config = self.load_global_config().unwrap_or_default();

        // Apply environment variable overrides
        let project_config = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config().unwrap_or_default();

        let project_root = config_path.parent().map(|p| p.to_path_buf());

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Find project configuration by walking up directory tree
    ///
    /// Returns (project_root, project_config) or error if not found
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join("opal.toml");

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            // Try parent directory
            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => {
                    // Reached filesystem root without finding opal.toml
                    // Return default config with no project root
                    return Ok((None, ProjectConfig::default()));
                }
            }
        }
    }

    /// Load global configuration from ~/.opal/config.toml
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        // Get or cache global config path
        if self.global_config_path.is_none() {
            self.global_config_path = Some(GlobalConfig::global_config_path()?);
        }

        let path = self.global_config_path.as_ref().unwrap();

        // Global config is optional - if it doesn't exist, return default
        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(path)
    }

    /// Apply environment variable overrides to project config
    ///
    /// Environment variables follow the pattern: OPAL_<SECTION>_<KEY>
    /// Example: OPAL_BOUNDS_CHECK=checked
    fn apply_env_overrides(&self, mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
        // Check for OPAL_EDITION
        if let Ok(edition) = env::var("OPAL_EDITION") {
            if let Some(pkg) = config.package.as_mut() {
                pkg.edition = Some(edition);
            }
        }

        // Check for OPAL_BOUNDS_CHECK
        if let Ok(mode) = env::var("OPAL_BOUNDS_CHECK") {
            let checked = matches!(mode.to_lowercase().as_str(), "checked" | "true" | "1" | "yes");
            if config.interop.is_none() {
                config.interop = Some(Default::default());
            }
            if let Some(interop) = config.interop.as_mut() {
                interop.bounds_check = Some(if checked {
                    BoundsCheckMode::Checked
                } else {
                    BoundsCheckMode::Off
                });
            }
        }

        // Check for OPAL_AUTORELEASE
        if let Ok(autorelease) = env::var("OPAL_AUTORELEASE") {
            let autorelease_bool =
                matches!(autorelease.to_lowercase().as_str(), "true" | "1" | "yes");
            if config.interop.is_none() {
                config.interop = Some(Default::default());
            }
            if let Some(interop) = config.interop.as_mut() {
                interop.autorelease = Some(autorelease_bool);
            }
        }

        // Check for OPAL_LIBRARY_PATH (PATH-style list of directories)
        if let Ok(paths) = env::var("OPAL_LIBRARY_PATH") {
            let extra: Vec<PathBuf> = env::split_paths(&paths).collect();
            if !extra.is_empty() {
                if config.interop.is_none() {
                    config.interop = Some(Default::default());
                }
                if let Some(interop) = config.interop.as_mut() {
                    interop.library_paths.extend(extra);
                }
            }
        }

        Ok(config)
    }

    /// Get the global configuration directory (~/.opal)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(crate::ConfigError::HomeNotFound)?;
        Ok(home.join(".opal"))
    }

    /// Ensure global configuration directory exists
    pub fn ensure_global_config_dir() -> ConfigResult<PathBuf> {
        let dir = Self::global_config_dir()?;
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Get the effective edition (project > global > default)
    pub fn edition(&self) -> &str {
        self.project
            .edition()
            .or_else(|| self.global.default_edition())
            .unwrap_or("2026")
    }

    /// Get the effective interop configuration (project overrides global)
    pub fn interop(&self) -> InteropConfig {
        let mut interop = self.global.interop.clone().unwrap_or_default();
        if let Some(project) = &self.project.interop {
            interop.merge(project);
        }
        interop
    }

    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Get the package name
    pub fn package_name(&self) -> Option<&str> {
        self.project.package_name()
    }

    /// Check if this is a project (has opal.toml)
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }
}
