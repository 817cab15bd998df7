//! Ingest command implementation.

use crate::server::{start_server, ServerState};
use anyhow::{Context, Result};
use fleet_ingest_core::config::SinkKind;
use fleet_ingest_core::sink::PostgresSink;
use fleet_ingest_core::{Config, IngestionEngine};
use std::sync::Arc;
use tracing::{info, warn};

/// Run the ingestion engine until a shutdown signal, then drain.
pub async fn run(config: Config, create_table: bool) -> Result<()> {
    info!(
        topic = %config.kafka.topic,
        group = %config.kafka.consumer_group,
        sink = ?config.sink.kind,
        "Starting ingestion engine"
    );

    if create_table {
        ensure_destination_table(&config).await?;
    }

    let mut engine = IngestionEngine::from_config(&config)?;
    let shutdown = engine.shutdown_token();

    let server_state = Arc::new(ServerState {
        health: engine.health(),
        metrics: engine.metrics(),
        vehicles: engine.vehicles(),
    });

    let server_shutdown = shutdown.child_token();
    let server = tokio::spawn(start_server(
        server_state,
        config.monitoring.health_port,
        config.monitoring.metrics_port,
        server_shutdown.clone(),
    ));

    super::spawn_signal_handler(shutdown);

    let outcome = engine.run().await;

    server_shutdown.cancel();
    if let Err(e) = server.await {
        warn!(error = %e, "HTTP server task ended abnormally");
    }

    let report = outcome?;
    info!(
        flushed_on_drain = report.events_flushed_on_drain,
        "Ingestion engine stopped"
    );
    Ok(())
}

async fn ensure_destination_table(config: &Config) -> Result<()> {
    match (config.sink.kind, config.sink.postgres.as_ref()) {
        (SinkKind::Postgres, Some(pg)) => {
            let sink = PostgresSink::new(pg, &config.sink.table, config.sink.write_timeout());
            sink.ensure_table()
                .await
                .with_context(|| format!("Failed to create table {}", config.sink.table))?;
            info!(table = %config.sink.table, "Destination table ready");
        }
        (SinkKind::Postgres, None) => {
            anyhow::bail!("Postgres sink selected but [sink.postgres] config is missing");
        }
        (SinkKind::Snowflake, _) => {
            warn!("--create-table is ignored for the snowflake sink");
        }
    }
    Ok(())
}
