//! Status command implementation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Health response from the server.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    engine_running: bool,
    #[serde(default)]
    uptime_seconds: u64,
    components: HashMap<String, ComponentStatus>,
}

/// Component status from the server.
#[derive(Debug, Deserialize)]
struct ComponentStatus {
    status: String,
    message: Option<String>,
}

/// Show status and health.
pub async fn run(url: &str, metrics_url: &str) -> Result<()> {
    println!("Checking health at {}...\n", url);

    let health_url = format!("{}/health", url.trim_end_matches('/'));
    let client = reqwest::Client::new();

    match client.get(&health_url).send().await {
        Ok(response) => {
            let status_code = response.status();
            match response.json::<HealthResponse>().await {
                Ok(health) => print_health_status(&health, status_code.as_u16()),
                Err(e) => {
                    println!("Failed to parse health response: {}", e);
                    println!("HTTP Status: {}", status_code);
                }
            }
        }
        Err(e) => {
            println!("Failed to connect to health endpoint: {}", e);
            println!("\nIs the fleet-ingest consumer running?");
            println!("Start it with: fleet-ingest ingest --config <path-to-config>");
            return Ok(());
        }
    }

    let metrics_url = format!("{}/metrics", metrics_url.trim_end_matches('/'));

    println!("\n--- Metrics ---");
    println!("Fetching from {}...\n", metrics_url);

    match client.get(&metrics_url).send().await {
        Ok(response) => {
            let text = response.text().await.context("Failed to read metrics")?;
            print_metrics(&parse_metrics(&text));
        }
        Err(e) => {
            println!("Failed to fetch metrics: {}", e);
        }
    }

    Ok(())
}

fn status_tag(status: &str) -> &'static str {
    match status {
        "healthy" => "[OK]",
        "degraded" => "[WARN]",
        "unhealthy" => "[FAIL]",
        _ => "[?]",
    }
}

fn print_health_status(health: &HealthResponse, status_code: u16) {
    println!(
        "{} Overall Status: {} (HTTP {})",
        status_tag(&health.status),
        health.status.to_uppercase(),
        status_code
    );
    println!(
        "Engine: {}, uptime {}s",
        if health.engine_running { "running" } else { "stopped" },
        health.uptime_seconds
    );
    println!();

    if !health.components.is_empty() {
        let mut names: Vec<&String> = health.components.keys().collect();
        names.sort();

        println!("Components:");
        for name in names {
            let status = &health.components[name];
            let tag = status_tag(&status.status);
            match &status.message {
                Some(msg) => println!("  {} {}: {} ({})", tag, name, status.status, msg),
                None => println!("  {} {}: {}", tag, name, status.status),
            }
        }
    }
}

/// Collect unlabelled samples by name; labelled `errors_total` samples are summed.
fn parse_metrics(metrics_text: &str) -> HashMap<String, u64> {
    let mut values: HashMap<String, u64> = HashMap::new();

    for line in metrics_text.lines() {
        if line.starts_with('#') || line.is_empty() {
            continue;
        }

        let mut parts = line.split_whitespace();
        let (Some(name), Some(raw)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(value) = raw.parse::<u64>() else {
            continue;
        };

        match name.split_once('{') {
            Some((base, _)) if base == "fleet_errors_total" => {
                *values.entry(base.to_string()).or_insert(0) += value;
            }
            Some(_) => {}
            None => {
                values.insert(name.to_string(), value);
            }
        }
    }

    values
}

fn print_metrics(values: &HashMap<String, u64>) {
    let rows = [
        ("fleet_messages_total", "Messages Consumed:  "),
        ("fleet_rows_flushed_total", "Rows Written:       "),
        ("fleet_flushes_total", "Batches Written:    "),
        ("fleet_errors_total", "Errors:             "),
        ("fleet_events_dropped_total", "Dropped on Drain:   "),
        ("fleet_batch_record_count", "Buffered Events:    "),
        ("fleet_uncommitted_offsets", "Uncommitted:        "),
        ("fleet_vehicles_tracked", "Vehicles Tracked:   "),
    ];

    for (name, label) in rows {
        if let Some(v) = values.get(name) {
            println!("{}{}", label, format_number(*v));
        }
    }

    if values.is_empty() {
        println!("No metrics available yet.");
    }
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_ingest_core::metrics::{ErrorType, IngestionMetrics};
    use std::time::Duration;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_500), "1.50K");
        assert_eq!(format_number(2_000_000), "2.00M");
        assert_eq!(format_number(3_000_000_000), "3.00B");
    }

    #[test]
    fn test_parse_exported_metrics() {
        let metrics = IngestionMetrics::new();
        metrics.record_message();
        metrics.record_message();
        metrics.record_error(ErrorType::Decode);
        metrics.record_error(ErrorType::Sink);
        metrics.record_flush(2, Duration::from_millis(40));

        let values = parse_metrics(&metrics.export_prometheus_text());
        assert_eq!(values.get("fleet_messages_total"), Some(&2));
        assert_eq!(values.get("fleet_errors_total"), Some(&2));
        assert_eq!(values.get("fleet_rows_flushed_total"), Some(&2));
        assert_eq!(values.get("fleet_flushes_total"), Some(&1));
    }

    #[test]
    fn test_health_response_parses() {
        let body = r#"{
            "status": "degraded",
            "engine_running": true,
            "uptime_seconds": 42,
            "components": {
                "sink": {"status": "degraded", "message": "Write failed: timeout"},
                "kafka": {"status": "healthy"}
            }
        }"#;
        let health: HealthResponse = serde_json::from_str(body).unwrap();
        assert_eq!(health.status, "degraded");
        assert!(health.engine_running);
        assert_eq!(health.components["kafka"].message, None);
        assert_eq!(status_tag(&health.components["sink"].status), "[WARN]");
    }
}
