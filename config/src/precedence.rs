//! # Configuration Precedence
//!
//! Assembles the effective configuration from every source.
//!
//! # Precedence Order
//! 1. Environment variables (highest priority)
//! 2. Configuration file named by `CDC_CONFIG_FILE`
//! 3. Default values (lowest priority)

use crate::config::Config;
use crate::error::ConfigError;
use crate::file_loader::load_from_file;
use crate::loader::apply_env;
use std::path::Path;
use validator::Validate;

/// Environment variable naming the configuration file.
pub const CONFIG_FILE_ENV: &str = "CDC_CONFIG_FILE";

/// Load, merge and validate the configuration.
///
/// ## Usage
/// ```rust,no_run
/// fn main() -> Result<(), config::ConfigError> {
///     let config = config::load()?;
///     println!("Max in-flight deliveries: {}", config.sink.max_in_flight);
///     Ok(())
/// }
/// ```
pub fn load() -> Result<Config, ConfigError> {
    let file = std::env::var(CONFIG_FILE_ENV).ok();
    load_with_file(file.as_deref().map(Path::new))
}

/// Same as [`load`] with an explicit file instead of `CDC_CONFIG_FILE`.
pub fn load_with_file(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let config = load_from_file(path)?;
            tracing::info!(path = %path.display(), "Loaded configuration file");
            config
        }
        None => {
            tracing::debug!("No configuration file given, starting from defaults");
            Config::default()
        }
    };

    apply_env(&mut config)?;
    config.validate()?;

    Ok(config)
}
