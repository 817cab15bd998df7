//! Simulated vehicle fleet that emits position reports.
//!
//! Vehicles start near downtown San Francisco and drift a small random step
//! on every tick. Speed is re-drawn occasionally.

use crate::event::{PositionEvent, VehicleType};
use rand::seq::SliceRandom;
use rand::Rng;
use uuid::Uuid;

const ORIGIN_LATITUDE: f64 = 37.7749;
const ORIGIN_LONGITUDE: f64 = -122.4194;
const START_SPREAD: f64 = 0.05;
const STEP: f64 = 0.001;
const MAX_SPEED: f64 = 65.0;
const SPEED_CHANGE_PROBABILITY: f64 = 0.3;

#[derive(Debug, Clone)]
struct SimulatedVehicle {
    id: String,
    vehicle_type: VehicleType,
    latitude: f64,
    longitude: f64,
    speed: f64,
}

/// A fleet of simulated vehicles.
#[derive(Debug, Clone)]
pub struct FleetSimulator<R: Rng> {
    vehicles: Vec<SimulatedVehicle>,
    rng: R,
}

impl FleetSimulator<rand::rngs::ThreadRng> {
    /// Create a fleet seeded from the thread-local RNG.
    pub fn with_thread_rng(fleet_size: usize) -> Self {
        Self::new(fleet_size, rand::thread_rng())
    }
}

impl<R: Rng> FleetSimulator<R> {
    /// Create `fleet_size` vehicles named `VEH-0001`, `VEH-0002`, ...
    pub fn new(fleet_size: usize, mut rng: R) -> Self {
        let vehicles = (1..=fleet_size)
            .map(|n| SimulatedVehicle {
                id: format!("VEH-{:04}", n),
                vehicle_type: *VehicleType::ALL
                    .choose(&mut rng)
                    .unwrap_or(&VehicleType::Sedan),
                latitude: ORIGIN_LATITUDE + rng.gen_range(-START_SPREAD..=START_SPREAD),
                longitude: ORIGIN_LONGITUDE + rng.gen_range(-START_SPREAD..=START_SPREAD),
                speed: rng.gen_range(0.0..MAX_SPEED),
            })
            .collect();

        Self { vehicles, rng }
    }

    /// Number of vehicles.
    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    /// True if the fleet is empty.
    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// Vehicle ids in fleet order.
    pub fn vehicle_ids(&self) -> impl Iterator<Item = &str> {
        self.vehicles.iter().map(|v| v.id.as_str())
    }

    /// Advance every vehicle one step and report its new position.
    pub fn tick(&mut self, timestamp: i64) -> Vec<PositionEvent> {
        let rng = &mut self.rng;
        self.vehicles
            .iter_mut()
            .map(|vehicle| {
                vehicle.latitude += rng.gen_range(-STEP..=STEP);
                vehicle.longitude += rng.gen_range(-STEP..=STEP);
                if rng.gen_bool(SPEED_CHANGE_PROBABILITY) {
                    vehicle.speed = rng.gen_range(0.0..MAX_SPEED);
                }

                PositionEvent {
                    vehicle_id: vehicle.id.clone(),
                    vehicle_type: vehicle.vehicle_type,
                    timestamp,
                    latitude: vehicle.latitude,
                    longitude: vehicle.longitude,
                    speed: vehicle.speed,
                    status: "active".to_string(),
                    event_id: Uuid::new_v4(),
                }
            })
            .collect()
    }
}
