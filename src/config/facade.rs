//! Entry point for loading [`ObsGraphConfig`] from every source.

use super::merge::merge_policy;
use super::sources::{global_file, workspace_file};
use super::ObsGraphConfig;
use config::{ConfigError, Environment, File};
use std::path::Path;
use tracing::debug;

/// Prefix of environment overrides, e.g. `OBSGRAPH__TRANSFER__VERBOSE_TABLES=true`.
const ENV_PREFIX: &str = "OBSGRAPH";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace.
    ///
    /// Precedence, lowest first: defaults, global file, workspace files,
    /// environment.
    pub fn load(workspace_root: &Path) -> Result<ObsGraphConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        debug!(workspace = %workspace_root.display(), "Loaded configuration");
        config.try_deserialize()
    }

    /// Load configuration from a single file on top of the defaults.
    pub fn load_from_file(path: &Path) -> Result<ObsGraphConfig, ConfigError> {
        merge_policy::builder_with_defaults()?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()
    }

    pub fn default() -> ObsGraphConfig {
        ObsGraphConfig::default()
    }
}
