//! # Environment Variable Loader
//!
//! Loads configuration from environment variables following 12-factor app
//! principles.
//!
//! # Naming Convention
//! - `CDC_*`: Agent and connector settings
//! - `DB_*`: Source database settings
//! - `SINK_*`: Remote sink settings
//! - `SRV_*`: Control server settings
//! - `OB_*`: Observability settings
//!
//! Only variables that are set override the base configuration.

use crate::config::{CommandConfig, Config};
use crate::error::ConfigError;
use std::env;
use std::str::FromStr;

/// Load configuration from defaults overridden by environment variables.
///
/// # M-CANONICAL-DOCS
///
/// ## Environment Variables
/// ### Agent (`CDC_*`)
/// - `CDC_AUTO_START`: Start on boot (true/false)
/// - `CDC_STREAM_CAPACITY`: Broadcast buffer capacity
/// - `CDC_SOURCE_TYPE`: Origin tag stamped on events
/// - `CDC_CONNECTOR_NAME`, `CDC_CONNECTOR_CLASS`: Connector identity
/// - `CDC_CAPTURE_COMMAND`: Connector executable
/// - `CDC_CAPTURE_ARGS`: Whitespace-separated connector arguments
///
/// ### Database (`DB_*`)
/// - `DB_HOSTNAME`, `DB_PORT`, `DB_USER`, `DB_PASSWORD`
/// - `DB_SERVER_ID`, `DB_SERVER_NAME`, `DB_INCLUDE_SCHEMA_CHANGES`
/// - `DB_OFFSET_STORAGE`, `DB_OFFSET_FILE`, `DB_OFFSET_FLUSH_INTERVAL_MS`
///
/// ### Sink (`SINK_*`)
/// - `SINK_URL`
/// - `SINK_CONNECT_TIMEOUT_MS`, `SINK_READ_TIMEOUT_MS`, `SINK_WRITE_TIMEOUT_MS`
/// - `SINK_MAX_IN_FLIGHT`, `SINK_RETRY_COUNT`, `SINK_RETRY_BACKOFF_MS`,
///   `SINK_MAX_BACKOFF_MS`
///
/// ### Server (`SRV_*`) and Observability (`OB_*`)
/// - `SRV_HOST`, `SRV_PORT`
/// - `OB_METRICS_ENABLED`, `OB_LOGGING_LEVEL`, `OB_JSON_LOGS`
pub fn load_from_env() -> Result<Config, ConfigError> {
    let mut config = Config::default();
    apply_env(&mut config)?;
    Ok(config)
}

/// Apply every set environment variable on top of `config`.
pub fn apply_env(config: &mut Config) -> Result<(), ConfigError> {
    let agent = &mut config.agent;
    override_parsed("CDC_AUTO_START", &mut agent.auto_start)?;
    override_parsed("CDC_STREAM_CAPACITY", &mut agent.stream_capacity)?;
    override_string("CDC_SOURCE_TYPE", &mut agent.source_type);

    let capture = &mut config.capture;
    override_string("CDC_CONNECTOR_NAME", &mut capture.connector.name);
    override_string("CDC_CONNECTOR_CLASS", &mut capture.connector.connector_class);
    if let Ok(program) = env::var("CDC_CAPTURE_COMMAND") {
        let args = env::var("CDC_CAPTURE_ARGS")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        capture.command = Some(CommandConfig { program, args });
    }

    let db = &mut capture.database;
    override_string("DB_HOSTNAME", &mut db.hostname);
    override_parsed("DB_PORT", &mut db.port)?;
    override_string("DB_USER", &mut db.user);
    override_string("DB_PASSWORD", &mut db.password);
    override_parsed("DB_SERVER_ID", &mut db.server_id)?;
    override_string("DB_SERVER_NAME", &mut db.server_name);
    override_parsed("DB_INCLUDE_SCHEMA_CHANGES", &mut db.include_schema_changes)?;

    let offset = &mut capture.offset;
    override_string("DB_OFFSET_STORAGE", &mut offset.storage);
    override_string("DB_OFFSET_FILE", &mut offset.file_filename);
    override_parsed("DB_OFFSET_FLUSH_INTERVAL_MS", &mut offset.flush_interval_ms)?;

    let sink = &mut config.sink;
    override_string("SINK_URL", &mut sink.url);
    override_parsed("SINK_CONNECT_TIMEOUT_MS", &mut sink.connect_timeout_ms)?;
    override_parsed("SINK_READ_TIMEOUT_MS", &mut sink.read_timeout_ms)?;
    override_parsed("SINK_WRITE_TIMEOUT_MS", &mut sink.write_timeout_ms)?;
    override_parsed("SINK_MAX_IN_FLIGHT", &mut sink.max_in_flight)?;
    override_parsed("SINK_RETRY_COUNT", &mut sink.retry_count)?;
    override_parsed("SINK_RETRY_BACKOFF_MS", &mut sink.retry_backoff_ms)?;
    override_parsed("SINK_MAX_BACKOFF_MS", &mut sink.max_backoff_ms)?;

    override_string("SRV_HOST", &mut config.server.host);
    override_parsed("SRV_PORT", &mut config.server.port)?;

    let observability = &mut config.observability;
    override_parsed("OB_METRICS_ENABLED", &mut observability.metrics_enabled)?;
    override_string("OB_LOGGING_LEVEL", &mut observability.logging_level);
    override_parsed("OB_JSON_LOGS", &mut observability.json_logs)?;

    Ok(())
}

fn override_string(key: &str, target: &mut String) {
    if let Ok(value) = env::var(key) {
        *target = value;
    }
}

fn override_parsed<T>(key: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display
{
    if let Ok(raw) = env::var(key) {
        *target = raw.parse::<T>().map_err(|e| ConfigError::InvalidEnv {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string()
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: &[&str] = &[
        "CDC_AUTO_START",
        "CDC_CAPTURE_COMMAND",
        "CDC_CAPTURE_ARGS",
        "DB_HOSTNAME",
        "DB_PORT",
        "SINK_URL",
        "SINK_MAX_IN_FLIGHT",
        "SINK_RETRY_COUNT",
        "OB_LOGGING_LEVEL"
    ];

    fn clear_env() {
        for key in KEYS {
            unsafe {
                env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_load_from_env_defaults() {
        clear_env();
        let config = load_from_env().unwrap();
        assert_eq!(config, Config::default());
        assert!(config.capture.command.is_none());
    }

    #[test]
    #[serial]
    fn test_load_from_env_overrides() {
        clear_env();
        unsafe {
            env::set_var("CDC_AUTO_START", "false");
            env::set_var("DB_HOSTNAME", "mysql.internal");
            env::set_var("DB_PORT", "3307");
            env::set_var("SINK_URL", "https://sink.example.com/events");
            env::set_var("SINK_MAX_IN_FLIGHT", "16");
            env::set_var("SINK_RETRY_COUNT", "5");
        }

        let config = load_from_env().unwrap();
        assert!(!config.agent.auto_start);
        assert_eq!(config.capture.database.hostname, "mysql.internal");
        assert_eq!(config.capture.database.port, 3307);
        assert_eq!(config.sink.url, "https://sink.example.com/events");
        assert_eq!(config.sink.max_in_flight, 16);
        assert_eq!(config.sink.retry_count, 5);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_capture_command_from_env() {
        clear_env();
        unsafe {
            env::set_var("CDC_CAPTURE_COMMAND", "/opt/debezium/run.sh");
            env::set_var("CDC_CAPTURE_ARGS", "--format json  --quiet");
        }

        let config = load_from_env().unwrap();
        let command = config.capture.command.unwrap();
        assert_eq!(command.program, "/opt/debezium/run.sh");
        assert_eq!(command.args, vec!["--format", "json", "--quiet"]);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_numeric_env_is_an_error() {
        clear_env();
        unsafe {
            env::set_var("SINK_MAX_IN_FLIGHT", "lots");
        }

        let err = load_from_env().unwrap_err();
        match err {
            ConfigError::InvalidEnv { key, value, .. } => {
                assert_eq!(key, "SINK_MAX_IN_FLIGHT");
                assert_eq!(value, "lots");
            }
            other => panic!("Expected InvalidEnv, got {other:?}")
        }

        clear_env();
    }
}
