//! Configuration Loader
//!
//! Layered loading through the `config` crate: defaults, then an optional TOML file, then
//! `NOTIFIER__` environment overrides. The result is validated before it is returned.

use config::{Config, Environment, File, FileFormat};
use std::path::Path;
use tracing::debug;

use super::NotifierConfig;
use crate::error::Result;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "NOTIFIER";
/// Separator between the prefix and path segments of environment overrides
pub const ENV_SEPARATOR: &str = "__";

impl NotifierConfig {
    /// Load from a TOML file plus environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading notifier configuration");
        let builder = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(true));
        Self::build(builder)
    }

    /// Load from environment overrides only
    pub fn from_env() -> Result<Self> {
        Self::build(Config::builder())
    }

    /// Parse a TOML document, ignoring the environment
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        let parsed: NotifierConfig = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;
        let parsed: NotifierConfig = config.try_deserialize()?;
        parsed.validate()?;
        debug!(
            notification_table = %parsed.database.notification_table,
            lease_table = %parsed.database.lease_table,
            collectors = parsed.collectors.len(),
            "Notifier configuration loaded"
        );
        Ok(parsed)
    }
}
