//! HTTP server for health, metrics and fleet state endpoints.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use fleet_ingest_core::buffer::VehicleStateIndex;
use fleet_ingest_core::event::PositionEvent;
use fleet_ingest_core::health::{ComponentStatus, HealthCheck, HealthStatus};
use fleet_ingest_core::metrics::IngestionMetrics;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Shared state for HTTP endpoints.
pub struct ServerState {
    pub health: Arc<HealthCheck>,
    pub metrics: Arc<IngestionMetrics>,
    pub vehicles: Arc<VehicleStateIndex>,
}

/// Health response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub engine_running: bool,
    pub uptime_seconds: u64,
    pub components: HashMap<String, ComponentStatusResponse>,
}

/// Component status response.
#[derive(Debug, Serialize)]
pub struct ComponentStatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&ComponentStatus> for ComponentStatusResponse {
    fn from(status: &ComponentStatus) -> Self {
        let (status, message) = match status {
            ComponentStatus::Healthy => ("healthy", None),
            ComponentStatus::Degraded(msg) => ("degraded", Some(msg.clone())),
            ComponentStatus::Unhealthy(msg) => ("unhealthy", Some(msg.clone())),
            ComponentStatus::Unknown => ("unknown", None),
        };
        ComponentStatusResponse {
            status: status.to_string(),
            message,
        }
    }
}

fn status_label(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Unhealthy => "unhealthy",
    }
}

/// Routes served on the health port.
fn health_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/vehicles", get(vehicles_handler))
        .with_state(state)
}

/// Routes served on the metrics port.
fn metrics_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve both listeners until `shutdown` is cancelled.
///
/// A listener that fails to bind is logged and skipped; the other keeps serving.
pub async fn start_server(
    state: Arc<ServerState>,
    health_port: u16,
    metrics_port: u16,
    shutdown: CancellationToken,
) {
    tokio::join!(
        serve("health", health_port, health_router(Arc::clone(&state)), shutdown.clone()),
        serve("metrics", metrics_port, metrics_router(state), shutdown),
    );
    info!("HTTP servers stopped");
}

async fn serve(name: &'static str, port: u16, router: Router, shutdown: CancellationToken) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(server = name, port = port, error = %e, "Failed to bind listener");
            return;
        }
    };
    info!(server = name, port = port, "Listening");

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;
    if let Err(e) = served {
        error!(server = name, error = %e, "Server error");
    }
}

fn probe(ok: bool) -> StatusCode {
    if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Overall and per-component status; 503 when anything is unhealthy.
async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let overall = state.health.overall_status();
    let components = state
        .health
        .get_all_statuses()
        .iter()
        .map(|(name, status)| (name.clone(), ComponentStatusResponse::from(status)))
        .collect();

    let response = HealthResponse {
        status: status_label(overall).to_string(),
        engine_running: state.health.is_engine_running(),
        uptime_seconds: state.health.uptime().as_secs(),
        components,
    };

    (probe(overall != HealthStatus::Unhealthy), Json(response))
}

/// Liveness: nothing is unhealthy.
async fn healthz_handler(State(state): State<Arc<ServerState>>) -> StatusCode {
    probe(state.health.is_operational())
}

/// Readiness: the loop is running and nothing is unhealthy.
async fn readyz_handler(State(state): State<Arc<ServerState>>) -> StatusCode {
    probe(state.health.is_ready())
}

/// Latest known position of every vehicle seen this run.
async fn vehicles_handler(State(state): State<Arc<ServerState>>) -> Json<Vec<PositionEvent>> {
    Json(state.vehicles.snapshot())
}

/// Text exposition of the ingestion metrics.
async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let content_type = [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")];
    (content_type, state.metrics.export_prometheus_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_ingest_core::health::COMPONENT_SINK;

    fn state() -> Arc<ServerState> {
        Arc::new(ServerState {
            health: Arc::new(HealthCheck::new()),
            metrics: Arc::new(IngestionMetrics::new()),
            vehicles: Arc::new(VehicleStateIndex::new()),
        })
    }

    #[test]
    fn test_component_status_conversion() {
        let response: ComponentStatusResponse = (&ComponentStatus::Healthy).into();
        assert_eq!(response.status, "healthy");
        assert!(response.message.is_none());

        let degraded = ComponentStatus::Degraded("write failed".to_string());
        let response: ComponentStatusResponse = (&degraded).into();
        assert_eq!(response.status, "degraded");
        assert_eq!(response.message, Some("write failed".to_string()));

        let unhealthy = ComponentStatus::Unhealthy("down".to_string());
        let response: ComponentStatusResponse = (&unhealthy).into();
        assert_eq!(response.status, "unhealthy");
        assert_eq!(response.message, Some("down".to_string()));

        let response: ComponentStatusResponse = (&ComponentStatus::Unknown).into();
        assert_eq!(response.status, "unknown");
        assert!(response.message.is_none());
    }

    #[tokio::test]
    async fn test_readyz_tracks_engine() {
        let state = state();
        assert_eq!(
            readyz_handler(State(Arc::clone(&state))).await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.health.engine_started();
        assert_eq!(readyz_handler(State(Arc::clone(&state))).await, StatusCode::OK);

        state.health.mark_unhealthy(COMPONENT_SINK, "unreachable");
        assert_eq!(
            readyz_handler(State(Arc::clone(&state))).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            healthz_handler(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_health_handler_status_code() {
        let state = state();
        state.health.mark_degraded(COMPONENT_SINK, "retrying");
        let response = health_handler(State(Arc::clone(&state))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        state.health.mark_unhealthy(COMPONENT_SINK, "drain failed");
        let response = health_handler(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_server_stops_on_cancel() {
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(start_server(state(), 0, 0, shutdown.clone()));
        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .expect("server did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_vehicles_handler_returns_snapshot() {
        let state = state();
        state.vehicles.update(&PositionEvent::new("VEH-0002", 1_718_000_000));
        state.vehicles.update(&PositionEvent::new("VEH-0001", 1_718_000_000));

        let Json(vehicles) = vehicles_handler(State(state)).await;
        let ids: Vec<&str> = vehicles.iter().map(|v| v.vehicle_id.as_str()).collect();
        assert_eq!(ids, vec!["VEH-0001", "VEH-0002"]);
    }
}
