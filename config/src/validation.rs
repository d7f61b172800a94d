//! # Configuration Validation
//!
//! Provides validation for all configuration structures using the `validator` crate.

use crate::config::Config;
use validator::Validate;

/// Validate configuration structure.
///
/// # M-CANONICAL-DOCS
///
/// ## Validation Rules
/// ### Agent
/// - `stream_capacity`: 1-1000000
/// - `source_type`: 1-64 characters
///
/// ### Capture
/// - `database.hostname`, `database.user`, `database.server_name`: 1-255 characters
/// - `database.port`: 1-65535
/// - `database.server_id`: at least 1
/// - `offset.flush_interval_ms`: at least 1
/// - `command.program`: non-empty when a command is configured
///
/// ### Sink
/// - `url`: must be a valid URL
/// - timeouts: 1-300000 ms
/// - `max_in_flight`: 1-10000
/// - `retry_count`: 0-20
/// - `retry_backoff_ms`: 1-60000
///
/// ### Observability
/// - `logging_level`: must be "trace", "debug", "info", "warn", or "error"
pub fn validate(config: &Config) -> Result<(), validator::ValidationErrors> {
    config.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandConfig;

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_validate_invalid_sink_url() {
        let mut config = Config::default();
        config.sink.url = "not a url".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_zero_max_in_flight() {
        let mut config = Config::default();
        config.sink.max_in_flight = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_retry_count_bounds() {
        let mut config = Config::default();
        config.sink.retry_count = 0;
        assert!(validate(&config).is_ok());

        config.sink.retry_count = 21;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_invalid_database_port() {
        let mut config = Config::default();
        config.capture.database.port = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_empty_command_program() {
        let mut config = Config::default();
        config.capture.command = Some(CommandConfig {
            program: String::new(),
            args: vec![]
        });
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_invalid_logging_level() {
        let mut config = Config::default();
        config.observability.logging_level = "verbose".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_validate_valid_logging_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let mut config = Config::default();
            config.observability.logging_level = level.to_string();
            assert!(validate(&config).is_ok());
        }
    }

    #[test]
    fn test_validate_zero_stream_capacity() {
        let mut config = Config::default();
        config.agent.stream_capacity = 0;
        assert!(validate(&config).is_err());
    }
}
