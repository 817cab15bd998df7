//! Component health registry.
//!
//! The ingestion engine registers `kafka`, `buffer` and `sink` and reports
//! every poll and write outcome; the HTTP server only reads. Transitions are
//! logged once, repeated reports of the same status are silent.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Message transport.
pub const COMPONENT_KAFKA: &str = "kafka";
/// Accumulator state.
pub const COMPONENT_BUFFER: &str = "buffer";
/// Warehouse writer.
pub const COMPONENT_SINK: &str = "sink";

/// Health status of a component.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentStatus {
    /// Last operation succeeded
    Healthy,
    /// Failing but retrying
    Degraded(String),
    /// Failed without recovery
    Unhealthy(String),
    /// Nothing reported yet
    Unknown,
}

impl ComponentStatus {
    fn same_kind(&self, other: &ComponentStatus) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Overall system health status.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HealthStatus {
    /// All components healthy
    Healthy,
    /// Some components degraded
    Degraded,
    /// At least one component unhealthy
    Unhealthy,
}

#[derive(Debug, Clone)]
struct ComponentEntry {
    status: ComponentStatus,
    changed_at: Instant,
}

/// Shared health registry.
pub struct HealthCheck {
    components: RwLock<HashMap<String, ComponentEntry>>,
    started_at: Instant,
    engine_running: AtomicBool,
}

impl HealthCheck {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            components: RwLock::new(HashMap::new()),
            started_at: Instant::now(),
            engine_running: AtomicBool::new(false),
        }
    }

    /// Track a component, starting as `Unknown`.
    pub fn register_component(&self, name: &str) {
        self.components.write().insert(
            name.to_string(),
            ComponentEntry {
                status: ComponentStatus::Unknown,
                changed_at: Instant::now(),
            },
        );
    }

    /// Report a successful operation.
    pub fn mark_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy);
    }

    /// Report a failure that will be retried.
    pub fn mark_degraded(&self, name: &str, reason: &str) {
        self.set(name, ComponentStatus::Degraded(reason.to_string()));
    }

    /// Report a failure that will not be retried.
    pub fn mark_unhealthy(&self, name: &str, reason: &str) {
        self.set(name, ComponentStatus::Unhealthy(reason.to_string()));
    }

    fn set(&self, name: &str, status: ComponentStatus) {
        // Hot path: the loop reports healthy on every message
        if let Some(entry) = self.components.read().get(name) {
            if entry.status == status {
                return;
            }
        }

        let mut components = self.components.write();
        let now = Instant::now();
        let entry = components
            .entry(name.to_string())
            .or_insert_with(|| ComponentEntry {
                status: ComponentStatus::Unknown,
                changed_at: now,
            });

        if !entry.status.same_kind(&status) {
            match &status {
                ComponentStatus::Healthy => info!(component = name, "Component recovered"),
                ComponentStatus::Degraded(reason) => {
                    warn!(component = name, reason = %reason, "Component degraded")
                }
                ComponentStatus::Unhealthy(reason) => {
                    warn!(component = name, reason = %reason, "Component unhealthy")
                }
                ComponentStatus::Unknown => {}
            }
            entry.changed_at = now;
        }
        entry.status = status;
    }

    /// Status of one component.
    pub fn get_component_status(&self, name: &str) -> Option<ComponentStatus> {
        self.components.read().get(name).map(|e| e.status.clone())
    }

    /// How long a component has held its current kind of status.
    pub fn time_in_status(&self, name: &str) -> Option<Duration> {
        self.components
            .read()
            .get(name)
            .map(|e| e.changed_at.elapsed())
    }

    /// Status of every component.
    pub fn get_all_statuses(&self) -> HashMap<String, ComponentStatus> {
        self.components
            .read()
            .iter()
            .map(|(name, e)| (name.clone(), e.status.clone()))
            .collect()
    }

    /// Worst status across components; `Unknown` counts as healthy.
    pub fn overall_status(&self) -> HealthStatus {
        self.components
            .read()
            .values()
            .fold(HealthStatus::Healthy, |acc, e| match (&e.status, acc) {
                (ComponentStatus::Unhealthy(_), _) | (_, HealthStatus::Unhealthy) => {
                    HealthStatus::Unhealthy
                }
                (ComponentStatus::Degraded(_), _) | (_, HealthStatus::Degraded) => {
                    HealthStatus::Degraded
                }
                _ => HealthStatus::Healthy,
            })
    }

    /// Healthy or degraded.
    pub fn is_operational(&self) -> bool {
        self.overall_status() != HealthStatus::Unhealthy
    }

    /// Mark the ingestion loop as running.
    pub fn engine_started(&self) {
        self.engine_running.store(true, Ordering::Release);
    }

    /// Mark the ingestion loop as stopped.
    pub fn engine_stopped(&self) {
        self.engine_running.store(false, Ordering::Release);
    }

    /// True while the ingestion loop runs.
    pub fn is_engine_running(&self) -> bool {
        self.engine_running.load(Ordering::Acquire)
    }

    /// The loop is running and nothing is unhealthy.
    pub fn is_ready(&self) -> bool {
        self.is_engine_running() && self.is_operational()
    }

    /// Time since the registry was created.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}
