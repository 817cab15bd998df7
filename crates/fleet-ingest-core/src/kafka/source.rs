//! The intake seam between the ingestion loop and the message transport.

use super::PartitionOffsets;
use crate::error::IntakeError;
use async_trait::async_trait;
use std::time::Duration;

/// A consumed message with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Message key (the vehicle id, when the producer set one)
    pub key: Option<Vec<u8>>,

    /// Raw payload
    pub payload: Option<Vec<u8>>,

    /// Topic name
    pub topic: String,

    /// Partition number
    pub partition: i32,

    /// Offset within the partition
    pub offset: i64,

    /// Broker timestamp (milliseconds since epoch, 0 if absent)
    pub timestamp: i64,
}

impl Envelope {
    /// Message key as a string.
    pub fn key_str(&self) -> Option<&str> {
        self.key.as_ref().and_then(|k| std::str::from_utf8(k).ok())
    }

    /// Payload bytes, empty if absent.
    pub fn payload_bytes(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }
}

/// Outcome of a single poll.
#[derive(Debug)]
pub enum PollResult {
    /// A message was received.
    Message(Envelope),
    /// Nothing arrived within the timeout.
    Empty,
    /// The transport reported a condition; see [`IntakeError::is_informational`].
    Error(IntakeError),
}

/// Source of position messages with manually stored read positions.
#[async_trait]
pub trait EventSource: Send {
    /// Wait up to `timeout` for the next message.
    async fn poll(&mut self, timeout: Duration) -> PollResult;

    /// Store `offset + 1` for every partition in `offsets`.
    async fn commit(&mut self, offsets: &PartitionOffsets) -> Result<(), IntakeError>;

    /// Flush stored positions synchronously and leave the group.
    async fn close(&mut self) -> Result<(), IntakeError>;
}
