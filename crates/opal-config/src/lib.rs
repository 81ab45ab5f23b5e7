//! Opal Configuration System
//!
//! Provides configuration management for Opal projects including:
//! - Project configuration (opal.toml)
//! - Global user configuration (~/.opal/config.toml)
//! - Native interop settings (bounds checking, library search paths)
//! - Configuration precedence and merging
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Global config (~/.opal/config.toml)
//! 2. Project config (./opal.toml)
//! 3. Environment variables (OPAL_*)
//! 4. CLI flags
//!
//! # Example
//!
//! ```no_run
//! use opal_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! ```

pub mod global;
pub mod interop;
pub mod loader;
pub mod project;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid semver version: {0}")]
    InvalidVersion(String),

    #[error("Invalid path: {0}")]
    InvalidPath(PathBuf),

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use global::GlobalConfig;
pub use interop::{BoundsCheckMode, InteropConfig};
pub use loader::{Config, ConfigLoader};
pub use project::ProjectConfig;
