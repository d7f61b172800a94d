//! # Configuration System
//!
//! Centralized configuration management for the CDC relay agent.
//!
//! This crate provides:
//! - Configuration structures for the agent, capture engine, sink, server
//!   and observability
//! - Environment variable loading (12-factor app principles)
//! - Configuration file loading (TOML/YAML)
//! - Configuration precedence (env > file > defaults)
//! - Configuration validation

pub mod config;
pub mod error;
pub mod file_loader;
pub mod loader;
pub mod precedence;
pub mod validation;

pub use config::{
    AgentConfig, CaptureConfig, CommandConfig, Config, ConnectorConfig, DatabaseConfig,
    ObservabilityConfig, OffsetConfig, ServerConfig, SinkConfig,
};
pub use error::ConfigError;
pub use file_loader::{ConfigFileError, load_from_file, load_from_toml, load_from_yaml};
pub use loader::{apply_env, load_from_env};
pub use precedence::{CONFIG_FILE_ENV, load, load_with_file};
pub use validation::validate;
pub use validator::Validate;
