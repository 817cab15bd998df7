//! Configuration structures for fleet-ingest.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags
//! (each of which can also be supplied through the environment).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Kafka configuration
    pub kafka: KafkaConfig,

    /// Batching configuration
    #[serde(default)]
    pub batch: BatchConfig,

    /// Warehouse sink configuration
    pub sink: SinkConfig,

    /// Fleet simulator configuration
    #[serde(default)]
    pub producer: ProducerConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Kafka client configuration shared by the consumer and the producer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers
    pub bootstrap_servers: Vec<String>,

    /// Topic carrying vehicle positions
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Consumer group ID
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Session timeout in milliseconds
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u32,

    /// Max poll interval in milliseconds (must exceed the longest sink write)
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u32,

    /// Broker-side wait for fetch.min.bytes
    #[serde(default = "default_fetch_wait_max_ms")]
    pub fetch_wait_max_ms: u32,

    /// Auto offset reset strategy
    #[serde(default)]
    pub auto_offset_reset: OffsetReset,

    /// Security configuration
    #[serde(default)]
    pub security: KafkaSecurityConfig,
}

/// Kafka auto offset reset strategy.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    /// Start from earliest offset
    #[default]
    Earliest,
    /// Start from latest offset
    Latest,
}

impl OffsetReset {
    /// librdkafka property value.
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

/// Kafka security configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KafkaSecurityConfig {
    /// Security protocol (PLAINTEXT, SSL, SASL_SSL, SASL_PLAINTEXT)
    pub protocol: Option<String>,

    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512)
    pub sasl_mechanism: Option<String>,

    /// SASL username
    pub sasl_username: Option<String>,

    /// SASL password
    pub sasl_password: Option<String>,

    /// SSL CA certificate location
    pub ssl_ca_location: Option<PathBuf>,
}

/// Batch flush thresholds and loop timing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchConfig {
    /// Flush once this many events are buffered
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Flush a non-empty batch once its first event is this old
    #[serde(default = "default_max_batch_time_ms")]
    pub max_batch_time_ms: u64,

    /// Upper bound on a single poll; shutdown is observed within this interval
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// First delay before re-attempting a failed write (doubles per attempt)
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_batch_time_ms: default_max_batch_time_ms(),
            poll_timeout_ms: default_poll_timeout_ms(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl BatchConfig {
    /// Poll timeout as a duration.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Max batch age as a duration.
    pub fn max_batch_time(&self) -> Duration {
        Duration::from_millis(self.max_batch_time_ms)
    }
}

/// Sink backend selector.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// PostgreSQL (or wire-compatible warehouse)
    #[default]
    Postgres,
    /// Snowflake SQL API
    Snowflake,
}

/// Warehouse sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    /// Which backend to write to
    #[serde(default)]
    pub kind: SinkKind,

    /// Destination table
    #[serde(default = "default_table")]
    pub table: String,

    /// Bound on one batch write, connection included
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// PostgreSQL connection (when kind is postgres)
    #[serde(default)]
    pub postgres: Option<PostgresSinkConfig>,

    /// Snowflake connection (when kind is snowflake)
    #[serde(default)]
    pub snowflake: Option<SnowflakeSinkConfig>,
}

impl SinkConfig {
    /// Write timeout as a duration.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// PostgreSQL connection parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostgresSinkConfig {
    /// Database host
    pub host: String,

    /// Database port
    #[serde(default = "default_postgres_port")]
    pub port: u16,

    /// Database name
    pub database: String,

    /// Username
    pub user: String,

    /// Password
    #[serde(default)]
    pub password: Option<String>,
}

/// Snowflake token type sent in `X-Snowflake-Authorization-Token-Type`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SnowflakeTokenType {
    /// Key-pair JWT
    #[default]
    KeypairJwt,
    /// OAuth access token
    Oauth,
    /// Programmatic access token
    ProgrammaticAccessToken,
}

impl SnowflakeTokenType {
    /// Header value.
    pub fn header_value(&self) -> &'static str {
        match self {
            SnowflakeTokenType::KeypairJwt => "KEYPAIR_JWT",
            SnowflakeTokenType::Oauth => "OAUTH",
            SnowflakeTokenType::ProgrammaticAccessToken => "PROGRAMMATIC_ACCESS_TOKEN",
        }
    }
}

/// Snowflake SQL API parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnowflakeSinkConfig {
    /// Account identifier (`<org>-<account>` or locator)
    pub account: String,

    /// Override for the API base URL (defaults to the account host)
    #[serde(default)]
    pub base_url: Option<String>,

    /// Bearer token
    #[serde(default)]
    pub token: Option<String>,

    /// Token type
    #[serde(default)]
    pub token_type: SnowflakeTokenType,

    /// Virtual warehouse
    #[serde(default = "default_snowflake_warehouse")]
    pub warehouse: String,

    /// Database
    #[serde(default = "default_snowflake_database")]
    pub database: String,

    /// Schema
    #[serde(default = "default_snowflake_schema")]
    pub schema: String,

    /// Role
    #[serde(default)]
    pub role: Option<String>,
}

impl SnowflakeSinkConfig {
    /// SQL API base URL.
    pub fn api_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}.snowflakecomputing.com", self.account),
        }
    }
}

/// Fleet simulator configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProducerConfig {
    /// Kafka client id
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Number of simulated vehicles
    #[serde(default = "default_fleet_size")]
    pub fleet_size: usize,

    /// Interval between fleet-wide updates
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Per-message delivery timeout
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    /// How long to wait for in-flight messages on exit
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            fleet_size: default_fleet_size(),
            interval_ms: default_interval_ms(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            flush_timeout_ms: default_flush_timeout_ms(),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Metrics HTTP port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Health check HTTP port
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            health_port: default_health_port(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_topic() -> String {
    "vehicle_positions".to_string()
}
fn default_consumer_group() -> String {
    "vehicle-tracking-consumer-group".to_string()
}
fn default_session_timeout_ms() -> u32 {
    30000
}
fn default_max_poll_interval_ms() -> u32 {
    300000
}
fn default_fetch_wait_max_ms() -> u32 {
    500
}
fn default_batch_size() -> usize {
    10
}
fn default_max_batch_time_ms() -> u64 {
    5000
}
fn default_poll_timeout_ms() -> u64 {
    1000
}
fn default_retry_base_delay_ms() -> u64 {
    100
}
fn default_table() -> String {
    "vehicle_positions".to_string()
}
fn default_write_timeout_ms() -> u64 {
    30000
}
fn default_postgres_port() -> u16 {
    5432
}
fn default_snowflake_warehouse() -> String {
    "VEHICLE_TRACKING_WH".to_string()
}
fn default_snowflake_database() -> String {
    "VEHICLE_TRACKING_DB".to_string()
}
fn default_snowflake_schema() -> String {
    "VEHICLE_DATA".to_string()
}
fn default_client_id() -> String {
    "vehicle-position-producer".to_string()
}
fn default_fleet_size() -> usize {
    5
}
fn default_interval_ms() -> u64 {
    5000
}
fn default_delivery_timeout_ms() -> u64 {
    10000
}
fn default_flush_timeout_ms() -> u64 {
    30000
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_health_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.kafka.bootstrap_servers.is_empty() {
            return Err(crate::Error::Config(
                "At least one bootstrap server required".into(),
            ));
        }

        if self.kafka.topic.is_empty() {
            return Err(crate::Error::Config("Kafka topic is required".into()));
        }

        if self.kafka.consumer_group.is_empty() {
            return Err(crate::Error::Config("Consumer group is required".into()));
        }

        if self.batch.batch_size == 0 {
            return Err(crate::Error::Config("Batch size must be at least 1".into()));
        }

        if self.batch.poll_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "Poll timeout must be greater than zero".into(),
            ));
        }

        if self.batch.poll_timeout_ms > self.batch.max_batch_time_ms {
            return Err(crate::Error::Config(format!(
                "Poll timeout ({}ms) must not exceed max batch time ({}ms)",
                self.batch.poll_timeout_ms, self.batch.max_batch_time_ms
            )));
        }

        if self.sink.table.is_empty() {
            return Err(crate::Error::Config("Sink table is required".into()));
        }

        if !is_valid_table_name(&self.sink.table) {
            return Err(crate::Error::Config(format!(
                "Sink table '{}' must be an identifier, optionally schema-qualified",
                self.sink.table
            )));
        }

        match self.sink.kind {
            SinkKind::Postgres if self.sink.postgres.is_none() => {
                return Err(crate::Error::Config(
                    "Postgres sink selected but [sink.postgres] is missing".into(),
                ));
            }
            SinkKind::Snowflake => match &self.sink.snowflake {
                None => {
                    return Err(crate::Error::Config(
                        "Snowflake sink selected but [sink.snowflake] is missing".into(),
                    ));
                }
                Some(sf) if sf.token.as_deref().map_or(true, str::is_empty) => {
                    return Err(crate::Error::Config("Snowflake token is required".into()));
                }
                Some(_) => {}
            },
            _ => {}
        }

        if self.sink.write_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "Sink write timeout must be greater than zero".into(),
            ));
        }

        if self.producer.fleet_size == 0 {
            return Err(crate::Error::Config(
                "Producer fleet size must be at least 1".into(),
            ));
        }

        if self.producer.interval_ms == 0 {
            return Err(crate::Error::Config(
                "Producer interval must be greater than zero".into(),
            ));
        }

        if u64::from(self.kafka.max_poll_interval_ms) <= self.sink.write_timeout_ms {
            tracing::warn!(
                max_poll_interval_ms = self.kafka.max_poll_interval_ms,
                write_timeout_ms = self.sink.write_timeout_ms,
                "max.poll.interval.ms does not exceed the sink write timeout; a slow write may trigger a rebalance"
            );
        }

        Ok(())
    }
}

/// `name` or `schema.name`, ASCII letters, digits and underscores.
fn is_valid_table_name(table: &str) -> bool {
    let parts: Vec<&str> = table.split('.').collect();
    parts.len() <= 3
        && parts.iter().all(|part| {
            !part.is_empty()
                && !part.starts_with(|c: char| c.is_ascii_digit())
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
