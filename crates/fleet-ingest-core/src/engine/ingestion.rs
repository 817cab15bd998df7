//! Main ingestion loop.
//!
//! A single task drives `poll -> decode -> accept -> should_flush? -> write ->
//! commit` until the shutdown token is cancelled. Polls and retry backoff race
//! against cancellation; sink writes never do. Read positions are committed
//! only after the batch containing them was durably written.

use super::backoff::Backoff;
use crate::buffer::{BatchAccumulator, VehicleStateIndex};
use crate::config::{BatchConfig, Config};
use crate::event::decode;
use crate::health::{HealthCheck, COMPONENT_BUFFER, COMPONENT_KAFKA, COMPONENT_SINK};
use crate::kafka::{
    Envelope, EventSource, KafkaIntakeBuilder, OffsetTracker, PartitionOffsets, PollResult,
};
use crate::metrics::{ErrorType, IngestionMetrics};
use crate::sink::{build_sink, SinkWriter};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outcome of the shutdown drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Events written by the final flush
    pub events_flushed_on_drain: usize,
    /// Events discarded because the final flush failed
    pub dropped_on_drain: usize,
}

/// Main ingestion engine.
pub struct IngestionEngine {
    source: Box<dyn EventSource>,
    sink: Arc<dyn SinkWriter>,
    accumulator: BatchAccumulator,
    vehicles: Arc<VehicleStateIndex>,
    offsets: OffsetTracker,
    metrics: Arc<IngestionMetrics>,
    health: Arc<HealthCheck>,
    shutdown: CancellationToken,
    backoff: Backoff,
    poll_timeout: Duration,
}

impl IngestionEngine {
    /// Create an engine over an intake and a sink.
    pub fn new(
        source: Box<dyn EventSource>,
        sink: Arc<dyn SinkWriter>,
        batch: &BatchConfig,
    ) -> Self {
        let health = Arc::new(HealthCheck::new());
        health.register_component(COMPONENT_KAFKA);
        health.register_component(COMPONENT_BUFFER);
        health.register_component(COMPONENT_SINK);

        Self {
            source,
            sink,
            accumulator: BatchAccumulator::from_config(batch),
            vehicles: Arc::new(VehicleStateIndex::new()),
            offsets: OffsetTracker::new(),
            metrics: Arc::new(IngestionMetrics::new()),
            health,
            shutdown: CancellationToken::new(),
            backoff: Backoff::from_config(batch),
            poll_timeout: batch.poll_timeout(),
        }
    }

    /// Stop on an externally owned token instead of the engine's own.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Build the Kafka intake and the configured sink.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let source = KafkaIntakeBuilder::new(config.kafka.clone()).build()?;
        let sink = build_sink(&config.sink)?;

        info!(
            topic = %config.kafka.topic,
            sink = sink.name(),
            table = %config.sink.table,
            batch_size = config.batch.batch_size,
            max_batch_time_ms = config.batch.max_batch_time_ms,
            "Ingestion engine configured"
        );

        Ok(Self::new(Box::new(source), sink, &config.batch))
    }

    /// Run until the shutdown token is cancelled, then drain.
    ///
    /// Returns `Error::DrainFailed` if the final write of buffered events failed.
    pub async fn run(&mut self) -> Result<DrainReport> {
        self.health.engine_started();
        info!(sink = self.sink.name(), "Ingestion engine started");

        while !self.shutdown.is_cancelled() {
            if self.accumulator.retry_pending() {
                let delay = self
                    .backoff
                    .after_failures(self.accumulator.consecutive_failures());
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                self.flush_and_commit().await;
                continue;
            }

            let polled = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                polled = self.source.poll(self.poll_timeout) => polled,
            };
            self.handle_poll(polled).await;

            if self.accumulator.should_flush() {
                self.flush_and_commit().await;
            }
        }

        let result = self.drain().await;
        self.health.engine_stopped();
        result
    }

    async fn handle_poll(&mut self, polled: PollResult) {
        match polled {
            PollResult::Message(envelope) => {
                self.health.mark_healthy(COMPONENT_KAFKA);
                self.handle_message(envelope).await;
            }
            PollResult::Empty => {}
            PollResult::Error(e) if e.is_informational() => {
                debug!(error = %e, "Intake reached end of partition");
            }
            PollResult::Error(e) => {
                error!(error = %e, "Intake error, transport will reconnect");
                self.metrics.record_error(ErrorType::Intake);
                self.health
                    .mark_degraded(COMPONENT_KAFKA, &format!("Poll failed: {}", e));
            }
        }
    }

    async fn handle_message(&mut self, envelope: Envelope) {
        self.metrics.record_message();
        self.offsets
            .update_consumed(&envelope.topic, envelope.partition, envelope.offset);

        if let Err(e) =
            self.accumulator
                .track_offset(&envelope.topic, envelope.partition, envelope.offset)
        {
            error!(error = %e, offset = envelope.offset, "Offset not tracked");
            return;
        }

        match decode(envelope.payload_bytes()) {
            Ok(event) => {
                self.vehicles.update(&event);
                let vehicle_id = event.vehicle_id.clone();
                match self.accumulator.accept(event) {
                    Ok(count) => debug!(
                        vehicle_id = %vehicle_id,
                        partition = envelope.partition,
                        offset = envelope.offset,
                        batch_size = count,
                        "Event accepted"
                    ),
                    Err(e) => error!(vehicle_id = %vehicle_id, error = %e, "Event not accepted"),
                }
            }
            Err(e) => {
                warn!(
                    partition = envelope.partition,
                    offset = envelope.offset,
                    key = ?envelope.key_str(),
                    error = %e,
                    "Skipping undecodable message"
                );
                self.metrics.record_error(ErrorType::Decode);

                // Nothing buffered ahead of it: the position can be stored right away
                if let Some(offsets) = self.accumulator.take_idle_offsets() {
                    self.commit_offsets(&offsets).await;
                }
            }
        }

        self.update_gauges();
    }

    async fn flush_and_commit(&mut self) {
        if self.accumulator.is_empty() {
            return;
        }

        let started = Instant::now();
        let batch = self.accumulator.flush();
        let rows = batch.len();
        let written = self.sink.write(batch).await;

        match written {
            Ok(()) => {
                let flushed = match self.accumulator.flush_succeeded() {
                    Ok(flushed) => flushed,
                    Err(e) => {
                        error!(error = %e, "Accumulator out of step after write");
                        return;
                    }
                };
                let duration = started.elapsed();
                self.metrics.record_flush(rows, duration);
                self.health.mark_healthy(COMPONENT_SINK);
                self.health.mark_healthy(COMPONENT_BUFFER);
                info!(
                    rows = rows,
                    partitions = flushed.offsets().len(),
                    duration_ms = duration.as_millis() as u64,
                    "Batch written to sink"
                );
                self.commit_offsets(flushed.offsets()).await;
            }
            Err(e) => {
                let attempts = match self.accumulator.flush_failed() {
                    Ok(attempts) => attempts,
                    Err(err) => {
                        error!(error = %err, "Accumulator out of step after failed write");
                        return;
                    }
                };
                self.metrics.record_error(ErrorType::Sink);
                self.health
                    .mark_degraded(COMPONENT_SINK, &format!("Write failed: {}", e));
                self.health
                    .mark_degraded(COMPONENT_BUFFER, "Batch retained for retry");
                warn!(
                    rows = rows,
                    attempt = attempts,
                    retry_in_ms = self.backoff.after_failures(attempts).as_millis() as u64,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "Sink write failed, batch retained"
                );
            }
        }

        self.update_gauges();
    }

    async fn commit_offsets(&mut self, offsets: &PartitionOffsets) {
        if offsets.is_empty() {
            return;
        }

        match self.source.commit(offsets).await {
            Ok(()) => {
                self.offsets.mark_committed(offsets);
            }
            Err(e) => {
                // A later commit of a higher offset supersedes this one
                warn!(error = %e, "Offset commit failed");
                self.metrics.record_error(ErrorType::Commit);
                self.health
                    .mark_degraded(COMPONENT_KAFKA, &format!("Offset commit failed: {}", e));
            }
        }
    }

    async fn drain(&mut self) -> Result<DrainReport> {
        let buffered = self.accumulator.len();
        info!(buffered = buffered, "Shutdown observed, draining");

        let mut report = DrainReport::default();
        let mut outcome = Ok(());

        if buffered > 0 {
            let started = Instant::now();
            let batch = self.accumulator.flush();
            let written = self.sink.write(batch).await;

            match written {
                Ok(()) => {
                    if let Ok(flushed) = self.accumulator.flush_succeeded() {
                        self.metrics.record_flush(buffered, started.elapsed());
                        self.commit_offsets(flushed.offsets()).await;
                    }
                    report.events_flushed_on_drain = buffered;
                    info!(rows = buffered, "Final batch written");
                }
                Err(e) => {
                    let dropped = self.accumulator.discard();
                    error!(
                        dropped = dropped,
                        error = %e,
                        "Final write failed, buffered events dropped"
                    );
                    self.metrics.record_dropped(dropped);
                    self.health
                        .mark_unhealthy(COMPONENT_BUFFER, "Final write failed on shutdown");
                    report.dropped_on_drain = dropped;
                    outcome = Err(Error::DrainFailed { dropped, source: e });
                }
            }
        } else if let Some(offsets) = self.accumulator.take_idle_offsets() {
            self.commit_offsets(&offsets).await;
        }

        if let Err(e) = self.source.close().await {
            warn!(error = %e, "Intake close failed");
        }
        self.update_gauges();

        info!(
            flushed = report.events_flushed_on_drain,
            dropped = report.dropped_on_drain,
            "Ingestion engine stopped"
        );
        outcome.map(|()| report)
    }

    fn update_gauges(&self) {
        self.metrics
            .set_batch_record_count(self.accumulator.len() as u64);
        self.metrics
            .set_uncommitted_offsets(self.offsets.uncommitted());
        self.metrics
            .set_vehicles_tracked(self.vehicles.len() as u64);
    }

    /// Get metrics.
    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        self.metrics.clone()
    }

    /// Get health check.
    pub fn health(&self) -> Arc<HealthCheck> {
        self.health.clone()
    }

    /// Latest position per vehicle.
    pub fn vehicles(&self) -> Arc<VehicleStateIndex> {
        self.vehicles.clone()
    }

    /// Token that stops the loop when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Events buffered in the current batch.
    pub fn buffered(&self) -> usize {
        self.accumulator.len()
    }

    /// Consumed and committed positions.
    pub fn offsets(&self) -> &OffsetTracker {
        &self.offsets
    }
}
