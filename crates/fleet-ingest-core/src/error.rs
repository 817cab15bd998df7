//! Error types for the fleet-ingest core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.
//! Per-event and per-batch failures (`DecodeError`, `IntakeError`, `WriteError`)
//! are returned as values and handled by the ingestion loop; only startup
//! failures and a failed shutdown drain surface as a top-level [`Error`].

use thiserror::Error;

/// Result type alias for fleet-ingest operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka setup or client error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Intake error surfaced outside the poll loop
    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),

    /// Sink write error surfaced outside the poll loop
    #[error("Sink error: {0}")]
    Sink(#[from] WriteError),

    /// Accumulator misuse
    #[error("Accumulator error: {0}")]
    Accumulator(#[from] AccumulatorError),

    /// Final flush on shutdown failed; the buffered events were dropped
    #[error("Drain failed: {dropped} buffered events dropped: {source}")]
    DrainFailed {
        dropped: usize,
        #[source]
        source: WriteError,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Kafka client errors raised while building consumers and producers.
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Failed to create a client against the brokers
    #[error("Connection failed to {broker}: {message}")]
    ConnectionFailed { broker: String, message: String },

    /// Subscription or consumer group error
    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    /// Producer delivery failed
    #[error("Delivery failed for key {key}: {message}")]
    Delivery { key: String, message: String },

    /// Producer flush did not complete in time
    #[error("Flush failed: {0}")]
    Flush(String),
}

/// Errors surfaced by the partition intake.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntakeError {
    /// Reached the current end of a partition. Informational, not a failure.
    #[error("End of partition {partition}")]
    EndOfPartition { partition: i32 },

    /// Broker or network failure. The transport reconnects on its own.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Storing the read position failed
    #[error("Offset commit failed: {0}")]
    OffsetCommit(String),
}

impl IntakeError {
    /// True for conditions that are expected during normal operation.
    pub fn is_informational(&self) -> bool {
        matches!(self, IntakeError::EndOfPartition { .. })
    }
}

/// Errors raised when a payload cannot be turned into a position event.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Payload was absent
    #[error("Empty payload")]
    EmptyPayload,

    /// Payload is not a JSON object
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// `vehicle_id` or `timestamp` was absent or null
    #[error("Missing required field: {field}")]
    MissingRequiredField { field: &'static str },

    /// A present field held a value of the wrong shape
    #[error("Invalid field {field}: {message}")]
    InvalidField { field: &'static str, message: String },
}

/// Batch-level sink write failures. No partial write is ever visible.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriteError {
    /// Could not reach or authenticate against the destination
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Destination rejected the statement (constraint, type, permission)
    #[error("Statement rejected: {0}")]
    Rejected(String),

    /// Write did not complete within the configured bound
    #[error("Write timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Transaction commit failed after the insert
    #[error("Commit failed: {0}")]
    Commit(String),
}

/// Errors raised by illegal accumulator transitions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccumulatorError {
    /// `accept` was called while a batch is handed to the sink
    #[error("Flush in progress: cannot accept events until the outstanding write resolves")]
    FlushInProgress,

    /// A flush outcome was reported with no outstanding flush
    #[error("No flush in progress")]
    NoFlushInProgress,
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<tokio_postgres::Error> for WriteError {
    fn from(err: tokio_postgres::Error) -> Self {
        if err.is_closed() {
            WriteError::Connection(err.to_string())
        } else if err.as_db_error().is_some() {
            WriteError::Rejected(err.to_string())
        } else {
            WriteError::Connection(err.to_string())
        }
    }
}

impl From<reqwest::Error> for WriteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WriteError::Timeout { elapsed_ms: 0 }
        } else {
            WriteError::Connection(err.to_string())
        }
    }
}
