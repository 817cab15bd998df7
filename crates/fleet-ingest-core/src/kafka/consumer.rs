//! Kafka partition intake with manual offset commits.
//!
//! Auto-commit and auto offset store are disabled: a position is only stored
//! after the batch containing it was durably written. Partition EOF events are
//! enabled and surface as [`IntakeError::EndOfPartition`].

use super::source::{Envelope, EventSource, PollResult};
use super::PartitionOffsets;
use crate::config::{KafkaConfig, KafkaSecurityConfig};
use crate::error::IntakeError;
use crate::{Error, KafkaError, Result};
use async_trait::async_trait;
use rdkafka::consumer::{
    BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::error::KafkaError as RdKafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, ClientContext, Offset, TopicPartitionList};
use std::time::Duration;
use tracing::{debug, info, warn};

const WATERMARK_TIMEOUT: Duration = Duration::from_secs(5);

/// Consumer context that logs partition assignments.
pub struct IntakeContext;

impl ClientContext for IntakeContext {}

impl ConsumerContext for IntakeContext {
    fn post_rebalance(&self, base_consumer: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                for element in tpl.elements() {
                    match base_consumer.fetch_watermarks(
                        element.topic(),
                        element.partition(),
                        WATERMARK_TIMEOUT,
                    ) {
                        Ok((low, high)) => info!(
                            topic = %element.topic(),
                            partition = element.partition(),
                            low_watermark = low,
                            high_watermark = high,
                            "Partition assigned"
                        ),
                        Err(e) => warn!(
                            topic = %element.topic(),
                            partition = element.partition(),
                            error = %e,
                            "Partition assigned, watermarks unavailable"
                        ),
                    }
                }
            }
            Rebalance::Revoke(tpl) => {
                info!(partitions = tpl.count(), "Partitions revoked");
            }
            Rebalance::Error(e) => {
                warn!(error = %e, "Rebalance error");
            }
        }
    }
}

/// Builder for creating a [`KafkaIntake`].
pub struct KafkaIntakeBuilder {
    config: KafkaConfig,
}

impl KafkaIntakeBuilder {
    /// Create a new intake builder.
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }

    /// Build the consumer and subscribe to the configured topic.
    pub fn build(self) -> Result<KafkaIntake> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", self.config.bootstrap_servers.join(","))
            .set("group.id", &self.config.consumer_group)
            // Offsets are committed only after a durable sink write
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "true")
            .set("auto.offset.reset", self.config.auto_offset_reset.as_str())
            .set(
                "session.timeout.ms",
                self.config.session_timeout_ms.to_string(),
            )
            // Must exceed the longest sink write or the group evicts us mid-flush
            .set(
                "max.poll.interval.ms",
                self.config.max_poll_interval_ms.to_string(),
            )
            .set("fetch.wait.max.ms", self.config.fetch_wait_max_ms.to_string());

        apply_security(&mut client_config, &self.config.security);

        let consumer: StreamConsumer<IntakeContext> = client_config
            .create_with_context(IntakeContext)
            .map_err(|e| {
                Error::Kafka(KafkaError::ConnectionFailed {
                    broker: self.config.bootstrap_servers.join(","),
                    message: e.to_string(),
                })
            })?;

        consumer
            .subscribe(&[&self.config.topic])
            .map_err(|e| Error::Kafka(KafkaError::ConsumerGroup(e.to_string())))?;

        info!(
            topic = %self.config.topic,
            group = %self.config.consumer_group,
            servers = %self.config.bootstrap_servers.join(","),
            "Kafka consumer subscribed"
        );

        Ok(KafkaIntake {
            consumer,
            topic: self.config.topic,
            committed: PartitionOffsets::new(),
            closed: false,
        })
    }
}

/// Apply optional security settings to a client config.
pub(crate) fn apply_security(client_config: &mut ClientConfig, security: &KafkaSecurityConfig) {
    if let Some(ref protocol) = security.protocol {
        client_config.set("security.protocol", protocol);
    }
    if let Some(ref mechanism) = security.sasl_mechanism {
        client_config.set("sasl.mechanism", mechanism);
    }
    if let Some(ref username) = security.sasl_username {
        client_config.set("sasl.username", username);
    }
    if let Some(ref password) = security.sasl_password {
        client_config.set("sasl.password", password);
    }
    if let Some(ref path) = security.ssl_ca_location {
        client_config.set("ssl.ca.location", path.to_string_lossy().as_ref());
    }
}

/// Kafka-backed [`EventSource`].
pub struct KafkaIntake {
    consumer: StreamConsumer<IntakeContext>,
    topic: String,
    committed: PartitionOffsets,
    closed: bool,
}

impl KafkaIntake {
    /// Get the topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Get the current partition assignment.
    pub fn assignment(&self) -> Result<Vec<(String, i32)>> {
        let tpl = self
            .consumer
            .assignment()
            .map_err(|e| Error::Kafka(KafkaError::ConsumerGroup(e.to_string())))?;

        Ok(tpl
            .elements()
            .iter()
            .map(|e| (e.topic().to_string(), e.partition()))
            .collect())
    }

    fn convert_message(msg: &BorrowedMessage<'_>) -> Envelope {
        Envelope {
            key: msg.key().map(|k| k.to_vec()),
            payload: msg.payload().map(|v| v.to_vec()),
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            timestamp: msg.timestamp().to_millis().unwrap_or(0),
        }
    }

    fn commit_list(
        &self,
        offsets: &PartitionOffsets,
        mode: CommitMode,
    ) -> std::result::Result<(), IntakeError> {
        let mut tpl = TopicPartitionList::new();
        for ((topic, partition), offset) in offsets.iter() {
            // Committed offset is the next offset to read
            tpl.add_partition_offset(topic, partition, Offset::Offset(offset + 1))
                .map_err(|e| IntakeError::OffsetCommit(e.to_string()))?;
        }

        self.consumer
            .commit(&tpl, mode)
            .map_err(|e| IntakeError::OffsetCommit(e.to_string()))
    }
}

/// Map a transport error from `recv`.
fn map_poll_error(err: RdKafkaError) -> IntakeError {
    match err {
        RdKafkaError::PartitionEOF(partition) => IntakeError::EndOfPartition { partition },
        other => IntakeError::Transport(other.to_string()),
    }
}

#[async_trait]
impl EventSource for KafkaIntake {
    async fn poll(&mut self, timeout: Duration) -> PollResult {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Ok(Ok(msg)) => PollResult::Message(Self::convert_message(&msg)),
            Ok(Err(e)) => PollResult::Error(map_poll_error(e)),
            Err(_) => PollResult::Empty,
        }
    }

    async fn commit(&mut self, offsets: &PartitionOffsets) -> std::result::Result<(), IntakeError> {
        if offsets.is_empty() {
            return Ok(());
        }

        self.commit_list(offsets, CommitMode::Async)?;
        self.committed.merge(offsets);

        debug!(offsets = ?offsets, "Batch offsets committed");
        Ok(())
    }

    async fn close(&mut self) -> std::result::Result<(), IntakeError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = if self.committed.is_empty() {
            Ok(())
        } else {
            // Async commits may still be in flight; make the final positions durable
            self.commit_list(&self.committed, CommitMode::Sync)
        };

        self.consumer.unsubscribe();
        info!(topic = %self.topic, "Kafka consumer closed");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_eof_is_informational() {
        let err = map_poll_error(RdKafkaError::PartitionEOF(3));
        assert_eq!(err, IntakeError::EndOfPartition { partition: 3 });
        assert!(err.is_informational());
    }

    #[test]
    fn test_other_errors_are_transport() {
        let err = map_poll_error(RdKafkaError::NoMessageReceived);
        assert!(matches!(err, IntakeError::Transport(_)));
        assert!(!err.is_informational());
    }

    #[test]
    fn test_apply_security() {
        let mut client_config = ClientConfig::new();
        let security = KafkaSecurityConfig {
            protocol: Some("SASL_SSL".into()),
            sasl_mechanism: Some("PLAIN".into()),
            sasl_username: Some("fleet".into()),
            sasl_password: Some("secret".into()),
            ssl_ca_location: None,
        };
        apply_security(&mut client_config, &security);

        assert_eq!(client_config.get("security.protocol"), Some("SASL_SSL"));
        assert_eq!(client_config.get("sasl.username"), Some("fleet"));
        assert_eq!(client_config.get("ssl.ca.location"), None);
    }
}
