//! # Settings
//!
//! TOML configuration for the application.
//!
//! ```toml
//! [engine]
//! alternative_policy = "first_match"   # or "all_matching"
//! cartesian_warning_threshold = 20
//! ```
//!
//! Every key is optional. Without `--config`, `eql.toml` in the working
//! directory is used when present.

use eql_core::{EngineConfig, EqlError};
use serde::Deserialize;
use std::path::Path;

/// Configuration file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "eql.toml";

/// Maximum configuration file size (64 KB).
const MAX_CONFIG_FILE_SIZE: u64 = 64 * 1024;

/// Application settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub engine: EngineConfig,
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, EqlError> {
        toml::from_str(text).map_err(|e| EqlError::InvalidConfig(e.to_string()))
    }

    /// Load settings from `path`, or from [`DEFAULT_CONFIG_FILE`] when it
    /// exists. Falls back to the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, EqlError> {
        let path = match path {
            Some(path) => path,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if !default.is_file() {
                    tracing::debug!("no configuration file, using defaults");
                    return Ok(Self::default());
                }
                default
            }
        };

        let metadata = std::fs::metadata(path).map_err(|e| {
            EqlError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(EqlError::InvalidConfig(format!(
                "config file is {} bytes (maximum {})",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            EqlError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        let settings = Self::from_toml(&text)?;
        tracing::debug!(path = %path.display(), ?settings, "configuration loaded");
        Ok(settings)
    }
}

// =============================================================================
// TESTS
// =============================================================================
