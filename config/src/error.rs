//! Errors raised while assembling the configuration.

use crate::file_loader::ConfigFileError;

/// Configuration loading error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidEnv {
        key: String,
        value: String,
        reason: String
    },

    #[error("Config file error: {0}")]
    File(#[from] ConfigFileError),

    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_env_display() {
        let err = ConfigError::InvalidEnv {
            key: "SRV_PORT".to_string(),
            value: "http".to_string(),
            reason: "invalid digit found in string".to_string()
        };
        assert_eq!(
            err.to_string(),
            "Invalid value \"http\" for SRV_PORT: invalid digit found in string"
        );
    }

    #[test]
    fn test_file_error_conversion() {
        let err: ConfigError = ConfigFileError::NoExtension.into();
        assert!(matches!(err, ConfigError::File(ConfigFileError::NoExtension)));
    }
}
