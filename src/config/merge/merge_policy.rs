//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("transfer.verbose_tables", false)?
        .set_default("transfer.verify_table_codec", true)?
        .set_default("transfer.cross_check_import", true)?
        .set_default("naming.uniqueness", "prohibit_duplicate_names")?
        .set_default("naming.uniqueness_resolution", "auto_rename")?
        .set_default("naming.validity_resolution", "auto_rename")
}
