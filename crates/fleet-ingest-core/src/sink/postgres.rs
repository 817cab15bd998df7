//! PostgreSQL sink.
//!
//! Opens a connection per write, inserts the batch inside one transaction and
//! commits. Dropping an uncommitted transaction rolls it back, so a timeout or
//! error at any step leaves no rows behind.

use super::{insert_statement, SinkWriter};
use crate::buffer::Batch;
use crate::config::PostgresSinkConfig;
use crate::error::WriteError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, warn};

/// Postgres allows at most 65535 bind parameters per statement.
const MAX_ROWS_PER_STATEMENT: usize = 1000;

/// Bulk-inserting PostgreSQL writer.
pub struct PostgresSink {
    config: tokio_postgres::Config,
    table: String,
    write_timeout: Duration,
}

impl PostgresSink {
    /// Create a writer for `table`.
    pub fn new(params: &PostgresSinkConfig, table: &str, write_timeout: Duration) -> Self {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&params.host)
            .port(params.port)
            .dbname(&params.database)
            .user(&params.user)
            .application_name("fleet-ingest")
            .connect_timeout(write_timeout);
        if let Some(ref password) = params.password {
            config.password(password);
        }

        Self {
            config,
            table: table.to_string(),
            write_timeout,
        }
    }

    /// Create the destination table if it does not exist.
    pub async fn ensure_table(&self) -> Result<(), WriteError> {
        let client = self.connect().await?;
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             VEHICLE_ID TEXT NOT NULL, \
             TIMESTAMP TIMESTAMPTZ NOT NULL, \
             LATITUDE DOUBLE PRECISION NOT NULL, \
             LONGITUDE DOUBLE PRECISION NOT NULL, \
             SPEED DOUBLE PRECISION NOT NULL, \
             VEHICLE_TYPE TEXT NOT NULL, \
             STATUS TEXT NOT NULL)",
            self.table
        );
        client.batch_execute(&ddl).await?;
        Ok(())
    }

    async fn connect(&self) -> Result<Client, WriteError> {
        let (client, connection) = self.config.connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(error = %e, "Postgres connection closed with error");
            }
        });
        Ok(client)
    }

    async fn write_batch(&self, batch: &Batch) -> Result<(), WriteError> {
        let mut client = self.connect().await?;
        let tx = client.transaction().await?;

        for chunk in batch.events().chunks(MAX_ROWS_PER_STATEMENT) {
            let timestamps: Vec<DateTime<Utc>> = chunk
                .iter()
                .map(|e| e.reported_at().unwrap_or_default())
                .collect();
            let types: Vec<&'static str> =
                chunk.iter().map(|e| e.vehicle_type.as_str()).collect();

            let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(chunk.len() * 7);
            for (i, event) in chunk.iter().enumerate() {
                params.push(&event.vehicle_id);
                params.push(&timestamps[i]);
                params.push(&event.latitude);
                params.push(&event.longitude);
                params.push(&event.speed);
                params.push(&types[i]);
                params.push(&event.status);
            }

            let sql = insert_statement(&self.table, chunk.len(), |i| format!("${}", i));
            tx.execute(sql.as_str(), &params).await?;
        }

        tx.commit()
            .await
            .map_err(|e| WriteError::Commit(e.to_string()))
    }
}

#[async_trait]
impl SinkWriter for PostgresSink {
    async fn write(&self, batch: &Batch) -> Result<(), WriteError> {
        if batch.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        match tokio::time::timeout(self.write_timeout, self.write_batch(batch)).await {
            Ok(Ok(())) => {
                debug!(
                    rows = batch.len(),
                    table = %self.table,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Batch committed to Postgres"
                );
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(WriteError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    fn name(&self) -> &str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        // Nothing listens here; an empty batch must not try to connect
        let sink = PostgresSink::new(
            &PostgresSinkConfig {
                host: "127.0.0.1".into(),
                port: 1,
                database: "fleet".into(),
                user: "fleet".into(),
                password: None,
            },
            "vehicle_positions",
            Duration::from_millis(200),
        );

        assert!(sink.write(&Batch::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_database_is_connection_error() {
        let sink = PostgresSink::new(
            &PostgresSinkConfig {
                host: "127.0.0.1".into(),
                port: 1,
                database: "fleet".into(),
                user: "fleet".into(),
                password: None,
            },
            "vehicle_positions",
            Duration::from_secs(2),
        );

        let mut acc = crate::buffer::BatchAccumulator::new(10, Duration::from_secs(5));
        acc.accept(crate::event::PositionEvent::new("VEH-0001", 1))
            .unwrap();

        let err = sink.write(acc.flush()).await.unwrap_err();
        assert!(
            matches!(err, WriteError::Connection(_) | WriteError::Timeout { .. }),
            "{:?}",
            err
        );
    }
}
