//! Publishes simulated position events to Kafka.

use crate::config::{KafkaConfig, ProducerConfig};
use crate::event::{encode, PositionEvent};
use crate::{Error, KafkaError, Result};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{debug, info};

/// Kafka producer keyed by vehicle id.
pub struct PositionPublisher {
    producer: FutureProducer,
    topic: String,
    delivery_timeout: Duration,
}

impl PositionPublisher {
    /// Create a publisher for the configured topic.
    pub fn new(kafka: &KafkaConfig, producer: &ProducerConfig) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", kafka.bootstrap_servers.join(","))
            .set("client.id", &producer.client_id)
            .set("acks", "all")
            .set("retries", "5")
            .set("message.timeout.ms", producer.delivery_timeout_ms.to_string());

        super::consumer::apply_security(&mut client_config, &kafka.security);

        let inner: FutureProducer = client_config.create().map_err(|e| {
            Error::Kafka(KafkaError::ConnectionFailed {
                broker: kafka.bootstrap_servers.join(","),
                message: e.to_string(),
            })
        })?;

        info!(
            topic = %kafka.topic,
            client_id = %producer.client_id,
            "Kafka producer created"
        );

        Ok(Self {
            producer: inner,
            topic: kafka.topic.clone(),
            delivery_timeout: Duration::from_millis(producer.delivery_timeout_ms),
        })
    }

    /// Send one event and wait for its delivery report.
    pub async fn publish(&self, event: &PositionEvent) -> Result<(i32, i64)> {
        let payload = encode(event);
        let record = FutureRecord::to(&self.topic)
            .key(&event.vehicle_id)
            .payload(&payload);

        match self.producer.send(record, self.delivery_timeout).await {
            Ok((partition, offset)) => {
                debug!(
                    vehicle_id = %event.vehicle_id,
                    partition = partition,
                    offset = offset,
                    "Position delivered"
                );
                Ok((partition, offset))
            }
            Err((e, _)) => Err(Error::Kafka(KafkaError::Delivery {
                key: event.vehicle_id.clone(),
                message: e.to_string(),
            })),
        }
    }

    /// Wait for in-flight messages to be delivered.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        self.producer
            .flush(timeout)
            .map_err(|e| Error::Kafka(KafkaError::Flush(e.to_string())))
    }

    /// Destination topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}
