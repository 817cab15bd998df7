//! Prometheus metrics export.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Histogram bucket boundaries in milliseconds for flush duration.
/// Converts to seconds: [0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
const FLUSH_DURATION_BUCKETS_MS: [u64; 7] = [100, 250, 500, 1000, 2500, 5000, 10000];

/// Error types for labeled metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Payload could not be decoded
    Decode,
    /// Transport error from the intake
    Intake,
    /// Sink write failed
    Sink,
    /// Offset commit failed
    Commit,
}

impl ErrorType {
    const ALL: [ErrorType; 4] = [
        ErrorType::Decode,
        ErrorType::Intake,
        ErrorType::Sink,
        ErrorType::Commit,
    ];

    /// Get the label value for Prometheus export.
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorType::Decode => "decode",
            ErrorType::Intake => "intake",
            ErrorType::Sink => "sink",
            ErrorType::Commit => "commit",
        }
    }

    fn index(&self) -> usize {
        match self {
            ErrorType::Decode => 0,
            ErrorType::Intake => 1,
            ErrorType::Sink => 2,
            ErrorType::Commit => 3,
        }
    }
}

/// Ingestion metrics with counters, gauges, and histograms.
#[derive(Default)]
pub struct IngestionMetrics {
    // === COUNTERS ===
    /// Messages received from the intake
    messages_total: AtomicU64,

    /// Errors by type, indexed by `ErrorType::index`
    errors: [AtomicU64; 4],

    /// Successful batch writes
    flushes_total: AtomicU64,

    /// Rows durably written
    rows_flushed_total: AtomicU64,

    /// Events discarded because the final write on shutdown failed
    events_dropped_total: AtomicU64,

    // === GAUGES ===
    /// Events waiting in the accumulator
    batch_record_count: AtomicU64,

    /// Consumed but not yet committed messages (sum across partitions)
    uncommitted_offsets: AtomicU64,

    /// Distinct vehicles seen
    vehicles_tracked: AtomicU64,

    // === HISTOGRAM: flush_duration_seconds ===
    flush_duration_sum_ms: AtomicU64,
    flush_duration_count: AtomicU64,
    /// Buckets: [0.1s, 0.25s, 0.5s, 1.0s, 2.5s, 5.0s, 10.0s, +Inf]
    flush_duration_buckets: [AtomicU64; 8],
}

impl IngestionMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self::default()
    }

    // === COUNTER RECORDING ===

    /// Record a message received.
    pub fn record_message(&self) {
        self.messages_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error with a specific type label.
    pub fn record_error(&self, error_type: ErrorType) {
        self.errors[error_type.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful flush with duration histogram.
    pub fn record_flush(&self, rows: usize, duration: Duration) {
        self.flushes_total.fetch_add(1, Ordering::Relaxed);
        self.rows_flushed_total
            .fetch_add(rows as u64, Ordering::Relaxed);

        let duration_ms = duration.as_millis() as u64;
        self.flush_duration_sum_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
        self.flush_duration_count.fetch_add(1, Ordering::Relaxed);

        // Buckets are cumulative (le = less than or equal)
        for (i, &bucket_ms) in FLUSH_DURATION_BUCKETS_MS.iter().enumerate() {
            if duration_ms <= bucket_ms {
                self.flush_duration_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.flush_duration_buckets[7].fetch_add(1, Ordering::Relaxed);
    }

    /// Record events dropped on a failed drain.
    pub fn record_dropped(&self, count: usize) {
        self.events_dropped_total
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    // === GAUGE UPDATES ===

    /// Update the buffered event count.
    pub fn set_batch_record_count(&self, count: u64) {
        self.batch_record_count.store(count, Ordering::Relaxed);
    }

    /// Update the uncommitted message count.
    pub fn set_uncommitted_offsets(&self, count: u64) {
        self.uncommitted_offsets.store(count, Ordering::Relaxed);
    }

    /// Update the number of tracked vehicles.
    pub fn set_vehicles_tracked(&self, count: u64) {
        self.vehicles_tracked.store(count, Ordering::Relaxed);
    }

    // === GETTERS ===

    /// Get total messages received.
    pub fn messages_total(&self) -> u64 {
        self.messages_total.load(Ordering::Relaxed)
    }

    /// Get error count by type.
    pub fn errors_by_type(&self, error_type: ErrorType) -> u64 {
        self.errors[error_type.index()].load(Ordering::Relaxed)
    }

    /// Get total errors across all types.
    pub fn errors_total(&self) -> u64 {
        self.errors.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    /// Get total successful flushes.
    pub fn flushes_total(&self) -> u64 {
        self.flushes_total.load(Ordering::Relaxed)
    }

    /// Get total rows written.
    pub fn rows_flushed_total(&self) -> u64 {
        self.rows_flushed_total.load(Ordering::Relaxed)
    }

    /// Get total events dropped on shutdown.
    pub fn events_dropped_total(&self) -> u64 {
        self.events_dropped_total.load(Ordering::Relaxed)
    }

    /// Get the buffered event count.
    pub fn batch_record_count(&self) -> u64 {
        self.batch_record_count.load(Ordering::Relaxed)
    }

    /// Get the uncommitted message count.
    pub fn uncommitted_offsets(&self) -> u64 {
        self.uncommitted_offsets.load(Ordering::Relaxed)
    }

    /// Get the number of tracked vehicles.
    pub fn vehicles_tracked(&self) -> u64 {
        self.vehicles_tracked.load(Ordering::Relaxed)
    }

    /// Get flush duration histogram data for Prometheus export.
    pub fn flush_duration_histogram(&self) -> FlushDurationHistogram {
        let mut buckets = [(0.0, 0); 7];
        for (i, bucket) in buckets.iter_mut().enumerate() {
            *bucket = (
                FLUSH_DURATION_BUCKETS_MS[i] as f64 / 1000.0,
                self.flush_duration_buckets[i].load(Ordering::Relaxed),
            );
        }

        FlushDurationHistogram {
            sum_seconds: self.flush_duration_sum_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            count: self.flush_duration_count.load(Ordering::Relaxed),
            buckets,
            inf_bucket: self.flush_duration_buckets[7].load(Ordering::Relaxed),
        }
    }

    /// Export all metrics in Prometheus text format with the `fleet` prefix.
    ///
    /// # Example
    /// ```
    /// use fleet_ingest_core::metrics::IngestionMetrics;
    ///
    /// let metrics = IngestionMetrics::new();
    /// metrics.record_message();
    /// let text = metrics.export_prometheus_text();
    /// assert!(text.contains("fleet_messages_total 1"));
    /// ```
    pub fn export_prometheus_text(&self) -> String {
        self.export_prometheus_text_with_prefix("fleet")
    }

    /// Export metrics in Prometheus text format with a custom prefix.
    pub fn export_prometheus_text_with_prefix(&self, prefix: &str) -> String {
        let mut out = String::with_capacity(4096);

        // === COUNTERS ===
        write_metric(
            &mut out,
            prefix,
            "messages_total",
            "counter",
            "Total messages consumed from Kafka",
            self.messages_total(),
        );

        let _ = writeln!(out, "# HELP {}_errors_total Errors by type", prefix);
        let _ = writeln!(out, "# TYPE {}_errors_total counter", prefix);
        for error_type in ErrorType::ALL {
            let _ = writeln!(
                out,
                "{}_errors_total{{type=\"{}\"}} {}",
                prefix,
                error_type.as_label(),
                self.errors_by_type(error_type)
            );
        }
        out.push('\n');

        write_metric(
            &mut out,
            prefix,
            "flushes_total",
            "counter",
            "Batches durably written to the sink",
            self.flushes_total(),
        );
        write_metric(
            &mut out,
            prefix,
            "rows_flushed_total",
            "counter",
            "Rows durably written to the sink",
            self.rows_flushed_total(),
        );
        write_metric(
            &mut out,
            prefix,
            "events_dropped_total",
            "counter",
            "Buffered events dropped because the final write failed",
            self.events_dropped_total(),
        );

        // === GAUGES ===
        write_metric(
            &mut out,
            prefix,
            "batch_record_count",
            "gauge",
            "Events buffered in the current batch",
            self.batch_record_count(),
        );
        write_metric(
            &mut out,
            prefix,
            "uncommitted_offsets",
            "gauge",
            "Messages consumed but not yet committed",
            self.uncommitted_offsets(),
        );
        write_metric(
            &mut out,
            prefix,
            "vehicles_tracked",
            "gauge",
            "Distinct vehicles with a known position",
            self.vehicles_tracked(),
        );

        // === HISTOGRAM: flush_duration_seconds ===
        let hist = self.flush_duration_histogram();

        let _ = writeln!(
            out,
            "# HELP {}_flush_duration_seconds Duration of successful sink writes",
            prefix
        );
        let _ = writeln!(out, "# TYPE {}_flush_duration_seconds histogram", prefix);
        for (le, count) in &hist.buckets {
            let _ = writeln!(
                out,
                "{}_flush_duration_seconds_bucket{{le=\"{}\"}} {}",
                prefix, le, count
            );
        }
        let _ = writeln!(
            out,
            "{}_flush_duration_seconds_bucket{{le=\"+Inf\"}} {}",
            prefix, hist.inf_bucket
        );
        let _ = writeln!(
            out,
            "{}_flush_duration_seconds_sum {}",
            prefix, hist.sum_seconds
        );
        let _ = writeln!(out, "{}_flush_duration_seconds_count {}", prefix, hist.count);

        out
    }
}

fn write_metric(out: &mut String, prefix: &str, name: &str, kind: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {}_{} {}", prefix, name, help);
    let _ = writeln!(out, "# TYPE {}_{} {}", prefix, name, kind);
    let _ = writeln!(out, "{}_{} {}", prefix, name, value);
    out.push('\n');
}

/// Flush duration histogram data for Prometheus export.
#[derive(Debug, Clone)]
pub struct FlushDurationHistogram {
    /// Sum of all durations in seconds
    pub sum_seconds: f64,
    /// Total number of observations
    pub count: u64,
    /// Bucket (upper bound in seconds, cumulative count) pairs
    pub buckets: [(f64, u64); 7],
    /// Count for +Inf bucket (equals total count)
    pub inf_bucket: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = IngestionMetrics::new();

        metrics.record_message();
        metrics.record_message();
        metrics.record_error(ErrorType::Decode);
        metrics.record_error(ErrorType::Sink);
        metrics.record_error(ErrorType::Sink);
        metrics.record_dropped(3);

        assert_eq!(metrics.messages_total(), 2);
        assert_eq!(metrics.errors_by_type(ErrorType::Decode), 1);
        assert_eq!(metrics.errors_by_type(ErrorType::Sink), 2);
        assert_eq!(metrics.errors_by_type(ErrorType::Commit), 0);
        assert_eq!(metrics.errors_total(), 3);
        assert_eq!(metrics.events_dropped_total(), 3);
    }

    #[test]
    fn test_gauges() {
        let metrics = IngestionMetrics::new();

        metrics.set_batch_record_count(9);
        metrics.set_uncommitted_offsets(12);
        metrics.set_vehicles_tracked(5);

        assert_eq!(metrics.batch_record_count(), 9);
        assert_eq!(metrics.uncommitted_offsets(), 12);
        assert_eq!(metrics.vehicles_tracked(), 5);

        metrics.set_batch_record_count(0);
        assert_eq!(metrics.batch_record_count(), 0);
    }

    #[test]
    fn test_histogram_buckets() {
        let metrics = IngestionMetrics::new();

        metrics.record_flush(10, Duration::from_millis(50));
        metrics.record_flush(10, Duration::from_millis(300));
        metrics.record_flush(1, Duration::from_secs(20));

        assert_eq!(metrics.flushes_total(), 3);
        assert_eq!(metrics.rows_flushed_total(), 21);

        let hist = metrics.flush_duration_histogram();
        assert_eq!(hist.count, 3);
        assert_eq!(hist.buckets[0], (0.1, 1));
        assert_eq!(hist.buckets[2], (0.5, 2));
        assert_eq!(hist.buckets[6], (10.0, 2));
        assert_eq!(hist.inf_bucket, 3);
        assert!((hist.sum_seconds - 20.35).abs() < 1e-9);
    }

    #[test]
    fn test_prometheus_text_export() {
        let metrics = IngestionMetrics::new();
        metrics.record_message();
        metrics.record_error(ErrorType::Decode);
        metrics.record_flush(10, Duration::from_millis(120));
        metrics.set_uncommitted_offsets(4);

        let text = metrics.export_prometheus_text();

        assert!(text.contains("# TYPE fleet_messages_total counter"));
        assert!(text.contains("fleet_messages_total 1"));
        assert!(text.contains("fleet_errors_total{type=\"decode\"} 1"));
        assert!(text.contains("fleet_errors_total{type=\"sink\"} 0"));
        assert!(text.contains("fleet_rows_flushed_total 10"));
        assert!(text.contains("# TYPE fleet_uncommitted_offsets gauge"));
        assert!(text.contains("fleet_uncommitted_offsets 4"));
        assert!(text.contains("fleet_flush_duration_seconds_bucket{le=\"0.25\"} 1"));
        assert!(text.contains("fleet_flush_duration_seconds_bucket{le=\"+Inf\"} 1"));
        assert!(text.contains("fleet_flush_duration_seconds_count 1"));
    }

    #[test]
    fn test_prometheus_text_export_with_prefix() {
        let metrics = IngestionMetrics::new();
        metrics.record_message();

        let text = metrics.export_prometheus_text_with_prefix("custom");
        assert!(text.contains("custom_messages_total 1"));
        assert!(!text.contains("fleet_"));
    }

    #[test]
    fn test_prometheus_text_format_validity() {
        let text = IngestionMetrics::new().export_prometheus_text();

        for line in text.lines().filter(|l| !l.is_empty()) {
            if line.starts_with('#') {
                assert!(line.starts_with("# HELP ") || line.starts_with("# TYPE "));
            } else {
                let parts: Vec<&str> = line.rsplitn(2, ' ').collect();
                assert_eq!(parts.len(), 2, "bad sample line: {}", line);
                assert!(parts[0].parse::<f64>().is_ok(), "bad value: {}", line);
            }
        }
    }
}
