//! Snowflake sink over the SQL API v2.
//!
//! Each batch is one multi-row `INSERT` statement. Snowflake runs a single
//! statement in its own transaction, so the insert is atomic. Statements that
//! outlive the synchronous window return 202 and are polled by handle.

use super::{insert_statement, SinkWriter};
use crate::buffer::Batch;
use crate::config::SnowflakeSinkConfig;
use crate::error::WriteError;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

const STATEMENTS_PATH: &str = "/api/v2/statements";
const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    statement_handle: Option<String>,
}

/// Snowflake SQL API writer.
pub struct SnowflakeSink {
    client: reqwest::Client,
    base_url: String,
    token: String,
    token_type: &'static str,
    table: String,
    warehouse: String,
    database: String,
    schema: String,
    role: Option<String>,
    write_timeout: Duration,
}

impl SnowflakeSink {
    /// Create a writer for `table`.
    pub fn new(params: &SnowflakeSinkConfig, table: &str, write_timeout: Duration) -> Result<Self> {
        let token = params
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Config("Snowflake token is required".into()))?;

        let client = reqwest::Client::builder()
            .timeout(write_timeout)
            .user_agent(concat!("fleet-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: params.api_base_url(),
            token,
            token_type: params.token_type.header_value(),
            table: table.to_string(),
            warehouse: params.warehouse.clone(),
            database: params.database.clone(),
            schema: params.schema.clone(),
            role: params.role.clone(),
            write_timeout,
        })
    }

    /// Request body for a batch insert.
    fn statement_body(&self, batch: &Batch) -> Value {
        let mut bindings = Map::new();
        let mut index = 1;
        let mut bind = |kind: &str, value: String| {
            bindings.insert(index.to_string(), json!({ "type": kind, "value": value }));
            index += 1;
        };

        for event in batch.events() {
            let reported_at = event
                .reported_at()
                .unwrap_or_default()
                .to_rfc3339_opts(SecondsFormat::Secs, true);
            bind("TEXT", event.vehicle_id.clone());
            bind("TEXT", reported_at);
            bind("REAL", event.latitude.to_string());
            bind("REAL", event.longitude.to_string());
            bind("REAL", event.speed.to_string());
            bind("TEXT", event.vehicle_type.as_str().to_string());
            bind("TEXT", event.status.clone());
        }

        let mut body = json!({
            "statement": insert_statement(&self.table, batch.len(), |_| "?".to_string()),
            "timeout": self.write_timeout.as_secs().max(1),
            "warehouse": self.warehouse,
            "database": self.database,
            "schema": self.schema,
            "bindings": bindings,
        });
        if let Some(ref role) = self.role {
            body["role"] = Value::String(role.clone());
        }
        body
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header("X-Snowflake-Authorization-Token-Type", self.token_type)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn write_batch(&self, batch: &Batch) -> std::result::Result<(), WriteError> {
        let url = format!(
            "{}{}?requestId={}",
            self.base_url,
            STATEMENTS_PATH,
            Uuid::new_v4()
        );
        let response = self
            .authorized(self.client.post(&url))
            .json(&self.statement_body(batch))
            .send()
            .await?;

        let mut status = response.status();
        let mut body = read_body(response).await;

        // Still running: poll the statement handle until it settles
        while status == StatusCode::ACCEPTED {
            let handle = body.statement_handle.clone().ok_or_else(|| {
                WriteError::Rejected("202 response without a statement handle".into())
            })?;
            tokio::time::sleep(STATUS_POLL_INTERVAL).await;

            let url = format!("{}{}/{}", self.base_url, STATEMENTS_PATH, handle);
            let response = self.authorized(self.client.get(&url)).send().await?;
            status = response.status();
            body = read_body(response).await;
        }

        classify(status, &body)
    }
}

async fn read_body(response: reqwest::Response) -> StatementResponse {
    response.json().await.unwrap_or_default()
}

/// Map a settled response to the write outcome.
fn classify(status: StatusCode, body: &StatementResponse) -> std::result::Result<(), WriteError> {
    if status == StatusCode::OK {
        return Ok(());
    }

    let message = format!(
        "HTTP {} code={} {}",
        status.as_u16(),
        body.code.as_deref().unwrap_or("-"),
        body.message.as_deref().unwrap_or("")
    );

    match status {
        StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::REQUEST_TIMEOUT
        | StatusCode::TOO_MANY_REQUESTS => Err(WriteError::Connection(message)),
        s if s.is_server_error() => Err(WriteError::Connection(message)),
        _ => Err(WriteError::Rejected(message)),
    }
}

#[async_trait]
impl SinkWriter for SnowflakeSink {
    async fn write(&self, batch: &Batch) -> std::result::Result<(), WriteError> {
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
                    "Batch committed to Snowflake"
                );
                Ok(())
            }
            Ok(Err(WriteError::Timeout { .. })) | Err(_) => Err(WriteError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
            Ok(Err(e)) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "snowflake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BatchAccumulator;
    use crate::config::SnowflakeTokenType;
    use crate::event::{PositionEvent, VehicleType};

    fn sink() -> SnowflakeSink {
        SnowflakeSink::new(
            &SnowflakeSinkConfig {
                account: "myorg-fleet".into(),
                base_url: None,
                token: Some("token".into()),
                token_type: SnowflakeTokenType::KeypairJwt,
                warehouse: "VEHICLE_TRACKING_WH".into(),
                database: "VEHICLE_TRACKING_DB".into(),
                schema: "VEHICLE_DATA".into(),
                role: Some("LOADER".into()),
            },
            "VEHICLE_POSITIONS",
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[test]
    fn test_statement_body_bindings() {
        let mut acc = BatchAccumulator::new(10, Duration::from_secs(5));
        let mut event = PositionEvent::new("VEH-0004", 1_718_000_000);
        event.vehicle_type = VehicleType::Van;
        event.latitude = 37.5;
        event.speed = 12.25;
        event.status = "active".into();
        acc.accept(event).unwrap();
        acc.accept(PositionEvent::new("VEH-0005", 1_718_000_005))
            .unwrap();

        let body = sink().statement_body(acc.flush());

        assert!(body["statement"]
            .as_str()
            .unwrap()
            .starts_with("INSERT INTO VEHICLE_POSITIONS (VEHICLE_ID, TIMESTAMP"));
        assert_eq!(body["timeout"], 30);
        assert_eq!(body["warehouse"], "VEHICLE_TRACKING_WH");
        assert_eq!(body["role"], "LOADER");

        let bindings = body["bindings"].as_object().unwrap();
        assert_eq!(bindings.len(), 14);
        assert_eq!(bindings["1"]["value"], "VEH-0004");
        assert_eq!(bindings["2"]["value"], "2024-06-10T06:13:20Z");
        assert_eq!(bindings["3"]["type"], "REAL");
        assert_eq!(bindings["3"]["value"], "37.5");
        assert_eq!(bindings["5"]["value"], "12.25");
        assert_eq!(bindings["6"]["value"], "van");
        assert_eq!(bindings["8"]["value"], "VEH-0005");
        assert_eq!(bindings["13"]["value"], "sedan");
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let result = SnowflakeSink::new(
            &SnowflakeSinkConfig {
                account: "myorg-fleet".into(),
                base_url: None,
                token: None,
                token_type: SnowflakeTokenType::Oauth,
                warehouse: "WH".into(),
                database: "DB".into(),
                schema: "S".into(),
                role: None,
            },
            "VEHICLE_POSITIONS",
            Duration::from_secs(30),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_classify_status() {
        let body = StatementResponse {
            code: Some("002003".into()),
            message: Some("Table does not exist".into()),
            statement_handle: None,
        };

        assert!(classify(StatusCode::OK, &body).is_ok());
        assert!(matches!(
            classify(StatusCode::UNPROCESSABLE_ENTITY, &body),
            Err(WriteError::Rejected(msg)) if msg.contains("002003")
        ));
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, &body),
            Err(WriteError::Connection(_))
        ));
        assert!(matches!(
            classify(StatusCode::SERVICE_UNAVAILABLE, &body),
            Err(WriteError::Connection(_))
        ));
    }
}
