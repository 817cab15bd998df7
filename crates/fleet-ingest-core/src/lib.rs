//! fleet-ingest core - vehicle telemetry batching and delivery pipeline
//!
//! This library consumes vehicle position events from Apache Kafka and
//! delivers them to a warehouse table in bounded batches with:
//!
//! - Flush on batch size or batch age, whichever comes first
//! - At-least-once delivery: offsets committed only after a durable write
//! - Failed batches retained and re-attempted unchanged
//! - A single final flush on shutdown

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod health;
pub mod kafka;
pub mod metrics;
pub mod simulator;
pub mod sink;

// Re-export commonly used types
pub use config::Config;
pub use engine::{DrainReport, IngestionEngine};
pub use error::{AccumulatorError, DecodeError, IntakeError, KafkaError, WriteError};
pub use error::{Error, Result};
