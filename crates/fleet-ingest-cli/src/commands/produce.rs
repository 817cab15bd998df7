//! Produce command implementation: publishes a simulated fleet.

use anyhow::{Context, Result};
use chrono::Utc;
use fleet_ingest_core::kafka::PositionPublisher;
use fleet_ingest_core::simulator::FleetSimulator;
use fleet_ingest_core::Config;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Publish one position per vehicle every interval until stopped.
///
/// With `ticks` set, stops after that many fleet-wide updates.
pub async fn run(config: Config, ticks: Option<u64>) -> Result<()> {
    config.validate()?;

    let publisher = PositionPublisher::new(&config.kafka, &config.producer)
        .context("Failed to create Kafka producer")?;
    let mut fleet = FleetSimulator::with_thread_rng(config.producer.fleet_size);

    info!(
        topic = publisher.topic(),
        vehicles = fleet.len(),
        interval_ms = config.producer.interval_ms,
        "Fleet simulator started"
    );

    let shutdown = CancellationToken::new();
    super::spawn_signal_handler(shutdown.clone());

    let mut interval = tokio::time::interval(Duration::from_millis(config.producer.interval_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut completed: u64 = 0;
    let mut delivered: u64 = 0;
    let mut failed: u64 = 0;

    while ticks.map_or(true, |limit| completed < limit) {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        for event in fleet.tick(Utc::now().timestamp()) {
            match publisher.publish(&event).await {
                Ok(_) => delivered += 1,
                Err(e) => {
                    failed += 1;
                    warn!(vehicle_id = %event.vehicle_id, error = %e, "Position not delivered");
                }
            }
        }
        completed += 1;
        info!(tick = completed, delivered = delivered, failed = failed, "Fleet update sent");
    }

    publisher
        .flush(Duration::from_millis(config.producer.flush_timeout_ms))
        .context("Failed to flush Kafka producer")?;

    info!(delivered = delivered, failed = failed, "Fleet simulator stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_ingest_core::Error as CoreError;

    const CONFIG: &str = r#"
        [kafka]
        bootstrap_servers = ["localhost:9092"]

        [sink]
        kind = "postgres"

        [sink.postgres]
        host = "localhost"
        database = "fleet"
        user = "fleet"
    "#;

    #[tokio::test]
    async fn test_zero_interval_rejected_before_publishing() {
        let mut config: Config = toml::from_str(CONFIG).unwrap();
        config.producer.interval_ms = 0;

        let err = run(config, Some(1)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_fleet_rejected() {
        let mut config: Config = toml::from_str(CONFIG).unwrap();
        config.producer.fleet_size = 0;
        assert!(run(config, Some(1)).await.is_err());
    }
}
