//! Configuration System
//!
//! Layered configuration for the observer graph: built-in defaults, the user's
//! global config file, workspace config files and `OBSGRAPH__*` environment
//! overrides, in increasing order of precedence.

use crate::logging::LoggingConfig;
use crate::observer::{NamingPolicyFilter, ResolutionPolicy, UniquenessPolicy};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

mod facade;
mod merge;
mod paths;
mod sources;

pub use facade::ConfigLoader;
pub use paths::{default_snapshot_path, global_config_path};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObsGraphConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub transfer: TransferConfig,

    /// Defaults for naming policy filters created by the filter factory
    #[serde(default)]
    pub naming: NamingConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Export and import behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Log every relational table entry during export and import
    #[serde(default)]
    pub verbose_tables: bool,

    /// Round-trip the relational table through its codec before exporting
    #[serde(default = "default_true")]
    pub verify_table_codec: bool,

    /// Rebuild the table after import and compare it with the streamed one
    #[serde(default = "default_true")]
    pub cross_check_import: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            verbose_tables: false,
            verify_table_codec: true,
            cross_check_import: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamingConfig {
    #[serde(default)]
    pub uniqueness: UniquenessPolicy,

    #[serde(default)]
    pub uniqueness_resolution: ResolutionPolicy,

    #[serde(default)]
    pub validity_resolution: ResolutionPolicy,

    /// Regular expression a whole name must match; empty uses the built-in rule
    #[serde(default)]
    pub validation_pattern: String,
}

impl NamingConfig {
    /// Build a naming filter with these defaults.
    pub fn filter(&self) -> NamingPolicyFilter {
        let mut filter = NamingPolicyFilter::new(
            self.uniqueness,
            self.uniqueness_resolution,
            self.validity_resolution,
        );
        if let Err(e) = filter.set_validation_pattern(&self.validation_pattern) {
            warn!(pattern = %self.validation_pattern, error = %e, "Ignoring invalid name pattern");
        }
        filter
    }
}

/// Storage paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Naming(String),
    Storage(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Naming(msg) => write!(f, "Naming: {}", msg),
            ValidationError::Storage(msg) => write!(f, "Storage: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl ObsGraphConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if !self.naming.validation_pattern.is_empty() {
            if let Err(e) = Regex::new(&self.naming.validation_pattern) {
                errors.push(ValidationError::Naming(format!(
                    "invalid validation pattern '{}': {}",
                    self.naming.validation_pattern, e
                )));
            }
        }

        if self.storage.snapshot_path.as_os_str().is_empty() {
            errors.push(ValidationError::Storage(
                "Snapshot path cannot be empty".to_string(),
            ));
        }

        if self.logging.format != "json" && self.logging.format != "text" {
            errors.push(ValidationError::Logging(format!(
                "Invalid log format: {}",
                self.logging.format
            )));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
