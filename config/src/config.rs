//! # Configuration Structures
//!
//! This module defines all configuration structures for the CDC relay agent.
//!
//! All configuration structures:
//! - Use `serde` for serialization/deserialization with per-field defaults
//! - Use `validator` for input validation
//! - Can be loaded from a file and overridden from the environment

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use validator::Validate;

/// Main configuration structure for the CDC relay agent.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Aggregates every tunable of the agent: lifecycle behavior, the capture
/// engine settings handed to the connector, the remote sink, the control
/// server and observability.
///
/// ## Usage
/// ```rust,no_run
/// use config::Config;
///
/// let config = Config::default();
/// println!("Sink URL: {}", config.sink.url);
/// ```
///
/// ## Validation
/// All nested configurations must pass their own validation rules.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct Config {
    /// Agent lifecycle and stream settings
    #[serde(default)]
    #[validate(nested)]
    pub agent: AgentConfig,

    /// Change-capture engine settings
    #[serde(default)]
    #[validate(nested)]
    pub capture: CaptureConfig,

    /// Remote delivery sink settings
    #[serde(default)]
    #[validate(nested)]
    pub sink: SinkConfig,

    /// Control server settings
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,

    /// Logging and metrics settings
    #[serde(default)]
    #[validate(nested)]
    pub observability: ObservabilityConfig
}

/// Agent lifecycle configuration.
///
/// ## Fields
/// - `auto_start`: Start the agent as soon as the process is up (default: true)
/// - `stream_capacity`: Capacity of the captured-event broadcast buffer
///   (default: 4096). Once full, the oldest buffered events are overwritten
///   and counted as lagged.
/// - `source_type`: Origin tag stamped on every event (default: "mysql")
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct AgentConfig {
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,

    #[serde(default = "default_stream_capacity")]
    #[validate(range(min = 1, max = 1_000_000))]
    pub stream_capacity: usize,

    #[serde(default = "default_source_type")]
    #[validate(length(min = 1, max = 64))]
    pub source_type: String
}

fn default_auto_start() -> bool {
    true
}

fn default_stream_capacity() -> usize {
    4096
}

fn default_source_type() -> String {
    "mysql".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            auto_start: default_auto_start(),
            stream_capacity: default_stream_capacity(),
            source_type: default_source_type()
        }
    }
}

/// Change-capture engine configuration.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Settings consumed by the external change-capture connector. The agent does
/// not interpret most of them; they are rendered as Debezium properties via
/// [`CaptureConfig::to_properties`] and handed over to the connector.
///
/// ## Fields
/// - `connector`: Connector name, class and extra pass-through properties
/// - `database`: Source database coordinates and credentials
/// - `offset`: Offset storage settings owned by the connector
/// - `command`: Connector process to spawn (optional)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct CaptureConfig {
    #[serde(default)]
    #[validate(nested)]
    pub connector: ConnectorConfig,

    #[serde(default)]
    #[validate(nested)]
    pub database: DatabaseConfig,

    #[serde(default)]
    #[validate(nested)]
    pub offset: OffsetConfig,

    #[serde(default)]
    #[validate(nested)]
    pub command: Option<CommandConfig>
}

impl CaptureConfig {
    /// Renders the capture settings as connector properties.
    ///
    /// Extra `connector.properties` are applied last and may override any
    /// rendered key.
    pub fn to_properties(&self) -> BTreeMap<String, String> {
        let db = &self.database;
        let mut props = BTreeMap::new();

        props.insert(
            "connector.class".to_string(),
            self.connector.connector_class.clone()
        );
        props.insert("name".to_string(), self.connector.name.clone());
        props.insert("database.hostname".to_string(), db.hostname.clone());
        props.insert("database.port".to_string(), db.port.to_string());
        props.insert("database.user".to_string(), db.user.clone());
        props.insert("database.password".to_string(), db.password.clone());
        props.insert("database.server.id".to_string(), db.server_id.to_string());
        props.insert("database.server.name".to_string(), db.server_name.clone());
        props.insert("database.include.list".to_string(), ".*".to_string());
        props.insert("table.include.list".to_string(), ".*".to_string());
        props.insert(
            "include.schema.changes".to_string(),
            db.include_schema_changes.to_string()
        );
        props.insert("offset.storage".to_string(), self.offset.storage.clone());
        props.insert(
            "offset.storage.file.filename".to_string(),
            self.offset.file_filename.clone()
        );
        props.insert(
            "offset.flush.interval.ms".to_string(),
            self.offset.flush_interval_ms.to_string()
        );

        for (key, value) in &self.connector.properties {
            props.insert(key.clone(), value.clone());
        }

        props
    }
}

/// Connector identity.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ConnectorConfig {
    /// Connector name
    #[serde(default = "default_connector_name")]
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    /// Fully qualified connector class
    #[serde(default = "default_connector_class")]
    #[validate(length(min = 1))]
    pub connector_class: String,

    /// Extra properties passed through to the connector verbatim
    #[serde(default)]
    pub properties: BTreeMap<String, String>
}

fn default_connector_name() -> String {
    "cdc-agent-connector".to_string()
}

fn default_connector_class() -> String {
    "io.debezium.connector.mysql.MySqlConnector".to_string()
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            name: default_connector_name(),
            connector_class: default_connector_class(),
            properties: BTreeMap::new()
        }
    }
}

/// Source database configuration.
///
/// ## Fields
/// - `hostname`: Database server hostname (default: "localhost")
/// - `port`: Database server port (default: 3306)
/// - `user`: Replication user (default: "debezium")
/// - `password`: Replication password (default: "")
/// - `server_id`: Numeric replica server id (default: 1)
/// - `server_name`: Logical server name (default: "cdc-agent")
/// - `include_schema_changes`: Emit schema-change records (default: false)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_hostname")]
    #[validate(length(min = 1, max = 255))]
    pub hostname: String,

    #[serde(default = "default_database_port")]
    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    #[serde(default = "default_database_user")]
    #[validate(length(min = 1, max = 255))]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_database_server_id")]
    #[validate(range(min = 1))]
    pub server_id: u32,

    #[serde(default = "default_database_server_name")]
    #[validate(length(min = 1, max = 255))]
    pub server_name: String,

    #[serde(default)]
    pub include_schema_changes: bool
}

fn default_database_hostname() -> String {
    "localhost".to_string()
}

fn default_database_port() -> u16 {
    3306
}

fn default_database_user() -> String {
    "debezium".to_string()
}

fn default_database_server_id() -> u32 {
    1
}

fn default_database_server_name() -> String {
    "cdc-agent".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            hostname: default_database_hostname(),
            port: default_database_port(),
            user: default_database_user(),
            password: String::new(),
            server_id: default_database_server_id(),
            server_name: default_database_server_name(),
            include_schema_changes: false
        }
    }
}

/// Offset storage owned by the connector.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct OffsetConfig {
    /// Offset backing store identifier
    #[serde(default = "default_offset_storage")]
    #[validate(length(min = 1))]
    pub storage: String,

    /// Offset file location
    #[serde(default = "default_offset_file")]
    #[validate(length(min = 1))]
    pub file_filename: String,

    /// Offset flush interval in milliseconds
    #[serde(default = "default_offset_flush_interval_ms")]
    #[validate(range(min = 1))]
    pub flush_interval_ms: u64
}

fn default_offset_storage() -> String {
    "org.apache.kafka.connect.storage.FileOffsetBackingStore".to_string()
}

fn default_offset_file() -> String {
    "offsets.dat".to_string()
}

fn default_offset_flush_interval_ms() -> u64 {
    60000
}

impl Default for OffsetConfig {
    fn default() -> Self {
        Self {
            storage: default_offset_storage(),
            file_filename: default_offset_file(),
            flush_interval_ms: default_offset_flush_interval_ms()
        }
    }
}

/// Connector process to spawn when running a real capture source.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct CommandConfig {
    /// Executable to run
    #[validate(length(min = 1))]
    pub program: String,

    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>
}

/// Remote delivery sink configuration.
///
/// # M-CANONICAL-DOCS
///
/// ## Fields
/// - `url`: Endpoint every event is POSTed to
/// - `connect_timeout_ms`: TCP connect timeout (default: 5000)
/// - `read_timeout_ms`: Response read timeout (default: 10000)
/// - `write_timeout_ms`: Request write timeout (default: 10000)
/// - `max_in_flight`: Maximum concurrent deliveries (default: 100)
/// - `retry_count`: Retries after the first attempt (default: 3)
/// - `retry_backoff_ms`: First backoff delay, doubled on each retry
///   (default: 1000)
/// - `max_backoff_ms`: Upper bound for a single backoff delay (default: 30000)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct SinkConfig {
    #[serde(default = "default_sink_url")]
    #[validate(url)]
    pub url: String,

    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 1, max = 300_000))]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_read_timeout_ms")]
    #[validate(range(min = 1, max = 300_000))]
    pub read_timeout_ms: u64,

    #[serde(default = "default_write_timeout_ms")]
    #[validate(range(min = 1, max = 300_000))]
    pub write_timeout_ms: u64,

    #[serde(default = "default_max_in_flight")]
    #[validate(range(min = 1, max = 10_000))]
    pub max_in_flight: usize,

    #[serde(default = "default_retry_count")]
    #[validate(range(max = 20))]
    pub retry_count: u32,

    #[serde(default = "default_retry_backoff_ms")]
    #[validate(range(min = 1, max = 60_000))]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    #[validate(range(min = 1, max = 600_000))]
    pub max_backoff_ms: u64
}

fn default_sink_url() -> String {
    "http://localhost:8081/api/events".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_read_timeout_ms() -> u64 {
    10000
}

fn default_write_timeout_ms() -> u64 {
    10000
}

fn default_max_in_flight() -> usize {
    100
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    30000
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            url: default_sink_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            max_in_flight: default_max_in_flight(),
            retry_count: default_retry_count(),
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms()
        }
    }
}

impl SinkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Whole-request budget: writing the body plus reading the answer.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms + self.write_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Control server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_server_host")]
    #[validate(length(min = 1, max = 255))]
    pub host: String,

    /// Port to bind to
    #[serde(default = "default_server_port")]
    #[validate(range(min = 1, max = 65535))]
    pub port: u16
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port()
        }
    }
}

/// Observability configuration.
///
/// ## Fields
/// - `metrics_enabled`: Install the Prometheus recorder (default: true)
/// - `logging_level`: Log level (default: "info")
/// - `json_logs`: Emit logs as JSON lines (default: false)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct ObservabilityConfig {
    #[serde(default = "default_observability_metrics_enabled")]
    pub metrics_enabled: bool,

    #[serde(default = "default_observability_logging_level")]
    #[validate(custom(function = "validate_logging_level"))]
    pub logging_level: String,

    #[serde(default)]
    pub json_logs: bool
}

fn default_observability_metrics_enabled() -> bool {
    true
}

fn default_observability_logging_level() -> String {
    "info".to_string()
}

fn validate_logging_level(value: &str) -> Result<(), validator::ValidationError> {
    match value {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(validator::ValidationError::new("Invalid logging level"))
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_observability_metrics_enabled(),
            logging_level: default_observability_logging_level(),
            json_logs: false
        }
    }
}
