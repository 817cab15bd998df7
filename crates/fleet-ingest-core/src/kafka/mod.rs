//! Kafka intake and publishing.
//!
//! The ingestion loop only sees the [`EventSource`] trait; [`KafkaIntake`]
//! is its production implementation.

mod consumer;
mod offset;
mod producer;
mod source;

pub use consumer::{IntakeContext, KafkaIntake, KafkaIntakeBuilder};
pub use offset::{OffsetTracker, PartitionOffsets};
pub use producer::PositionPublisher;
pub use source::{Envelope, EventSource, PollResult};
