//! Latest known position per vehicle.

use crate::event::PositionEvent;
use dashmap::DashMap;

/// Last position reported by each vehicle during this run.
///
/// Written only by the ingestion loop; the monitoring server reads it
/// concurrently. Entries are overwritten on every event and never removed.
#[derive(Debug, Default)]
pub struct VehicleStateIndex {
    latest: DashMap<String, PositionEvent>,
}

impl VehicleStateIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored position for the event's vehicle.
    pub fn update(&self, event: &PositionEvent) {
        self.latest.insert(event.vehicle_id.clone(), event.clone());
    }

    /// Latest position for a vehicle.
    pub fn get(&self, vehicle_id: &str) -> Option<PositionEvent> {
        self.latest.get(vehicle_id).map(|entry| entry.value().clone())
    }

    /// All latest positions, ordered by vehicle id.
    pub fn snapshot(&self) -> Vec<PositionEvent> {
        let mut all: Vec<PositionEvent> = self
            .latest
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        all
    }

    /// Number of distinct vehicles seen.
    pub fn len(&self) -> usize {
        self.latest.len()
    }

    /// True if no vehicle has reported yet.
    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_overwrites_latest() {
        let index = VehicleStateIndex::new();
        let mut first = PositionEvent::new("VEH-0001", 100);
        first.speed = 10.0;
        let mut second = PositionEvent::new("VEH-0001", 90);
        second.speed = 20.0;

        index.update(&first);
        index.update(&second);

        // Last write wins, even with an older timestamp
        assert_eq!(index.get("VEH-0001"), Some(second));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let index = VehicleStateIndex::new();
        for id in ["VEH-0003", "VEH-0001", "VEH-0002"] {
            index.update(&PositionEvent::new(id, 1));
        }
        let ids: Vec<String> = index
            .snapshot()
            .into_iter()
            .map(|e| e.vehicle_id)
            .collect();
        assert_eq!(ids, vec!["VEH-0001", "VEH-0002", "VEH-0003"]);
        assert!(index.get("VEH-0009").is_none());
    }
}
