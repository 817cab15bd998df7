//! Warehouse sink writers.
//!
//! A write is all-or-nothing: either every row of the batch is durable at the
//! destination or none is. Writers never retry on their own; the ingestion
//! loop decides when to re-attempt.

mod postgres;
mod snowflake;

pub use postgres::PostgresSink;
pub use snowflake::SnowflakeSink;

use crate::buffer::Batch;
use crate::config::{SinkConfig, SinkKind};
use crate::error::WriteError;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Destination columns, in bind order.
pub const COLUMNS: [&str; 7] = [
    "VEHICLE_ID",
    "TIMESTAMP",
    "LATITUDE",
    "LONGITUDE",
    "SPEED",
    "VEHICLE_TYPE",
    "STATUS",
];

/// Writes accepted batches to a tabular store.
#[async_trait]
pub trait SinkWriter: Send + Sync {
    /// Durably write every event in `batch` as one transaction.
    async fn write(&self, batch: &Batch) -> std::result::Result<(), WriteError>;

    /// Backend name for logs and health reporting.
    fn name(&self) -> &str;
}

/// Build the writer selected by `config.kind`.
pub fn build_sink(config: &SinkConfig) -> Result<Arc<dyn SinkWriter>> {
    match config.kind {
        SinkKind::Postgres => {
            let pg = config.postgres.as_ref().ok_or_else(|| {
                Error::Config("Postgres sink selected but [sink.postgres] is missing".into())
            })?;
            Ok(Arc::new(PostgresSink::new(
                pg,
                &config.table,
                config.write_timeout(),
            )))
        }
        SinkKind::Snowflake => {
            let sf = config.snowflake.as_ref().ok_or_else(|| {
                Error::Config("Snowflake sink selected but [sink.snowflake] is missing".into())
            })?;
            Ok(Arc::new(SnowflakeSink::new(
                sf,
                &config.table,
                config.write_timeout(),
            )?))
        }
    }
}

/// Multi-row `INSERT` with one placeholder per value.
///
/// `placeholder` maps the 1-based parameter index to its SQL text.
pub(crate) fn insert_statement(
    table: &str,
    rows: usize,
    placeholder: impl Fn(usize) -> String,
) -> String {
    let mut sql = format!("INSERT INTO {} ({}) VALUES ", table, COLUMNS.join(", "));
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for col in 0..COLUMNS.len() {
            if col > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&placeholder(row * COLUMNS.len() + col + 1));
        }
        sql.push(')');
    }
    sql
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PostgresSinkConfig;

    #[test]
    fn test_insert_statement_numbered() {
        let sql = insert_statement("vehicle_positions", 2, |i| format!("${}", i));
        assert_eq!(
            sql,
            "INSERT INTO vehicle_positions (VEHICLE_ID, TIMESTAMP, LATITUDE, LONGITUDE, SPEED, \
             VEHICLE_TYPE, STATUS) VALUES ($1, $2, $3, $4, $5, $6, $7), \
             ($8, $9, $10, $11, $12, $13, $14)"
        );
    }

    #[test]
    fn test_insert_statement_positional() {
        let sql = insert_statement("VEHICLE_POSITIONS", 1, |_| "?".to_string());
        assert!(sql.ends_with("VALUES (?, ?, ?, ?, ?, ?, ?)"));
    }

    #[test]
    fn test_build_sink_requires_backend_section() {
        let mut config = SinkConfig {
            kind: SinkKind::Postgres,
            table: "vehicle_positions".into(),
            write_timeout_ms: 1000,
            postgres: None,
            snowflake: None,
        };
        assert!(build_sink(&config).is_err());

        config.postgres = Some(PostgresSinkConfig {
            host: "localhost".into(),
            port: 5432,
            database: "fleet".into(),
            user: "fleet".into(),
            password: None,
        });
        let sink = build_sink(&config).unwrap();
        assert_eq!(sink.name(), "postgres");
    }
}
