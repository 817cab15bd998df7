//! Position event data model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Vehicle body type reported by the fleet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleType {
    /// Sedan (zero value when the field is absent)
    #[default]
    Sedan,
    /// Sport utility vehicle
    Suv,
    /// Truck
    Truck,
    /// Van
    Van,
}

impl VehicleType {
    /// All variants, in declaration order.
    pub const ALL: [VehicleType; 4] = [
        VehicleType::Sedan,
        VehicleType::Suv,
        VehicleType::Truck,
        VehicleType::Van,
    ];

    /// Wire and column representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleType::Sedan => "sedan",
            VehicleType::Suv => "suv",
            VehicleType::Truck => "truck",
            VehicleType::Van => "van",
        }
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sedan" => Ok(VehicleType::Sedan),
            "suv" => Ok(VehicleType::Suv),
            "truck" => Ok(VehicleType::Truck),
            "van" => Ok(VehicleType::Van),
            other => Err(format!("unknown vehicle type '{}'", other)),
        }
    }
}

/// A single position report for one vehicle.
///
/// `vehicle_id` and `timestamp` are always present; everything else falls
/// back to its zero value when the producer omitted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEvent {
    /// Fleet identifier, also the message key
    pub vehicle_id: String,

    /// Body type
    pub vehicle_type: VehicleType,

    /// Report time, seconds since the Unix epoch
    pub timestamp: i64,

    /// Latitude in degrees
    pub latitude: f64,

    /// Longitude in degrees
    pub longitude: f64,

    /// Ground speed, never negative
    pub speed: f64,

    /// Free-form status (e.g. "active")
    pub status: String,

    /// Producer-assigned identifier
    pub event_id: Uuid,
}

impl PositionEvent {
    /// Create an event with zero values for every optional field.
    pub fn new(vehicle_id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            vehicle_id: vehicle_id.into(),
            vehicle_type: VehicleType::default(),
            timestamp,
            latitude: 0.0,
            longitude: 0.0,
            speed: 0.0,
            status: String::new(),
            event_id: Uuid::nil(),
        }
    }

    /// Report time as a UTC datetime, if representable.
    pub fn reported_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp(self.timestamp, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vehicle_type_parse_and_display() {
        for vt in VehicleType::ALL {
            assert_eq!(vt.as_str().parse::<VehicleType>(), Ok(vt));
            assert_eq!(vt.to_string(), vt.as_str());
        }
        assert!("bus".parse::<VehicleType>().is_err());
        assert!("SUV".parse::<VehicleType>().is_err());
    }

    #[test]
    fn test_new_uses_zero_values() {
        let event = PositionEvent::new("VEH-0001", 1_700_000_000);
        assert_eq!(event.vehicle_type, VehicleType::Sedan);
        assert_eq!(event.speed, 0.0);
        assert!(event.status.is_empty());
        assert!(event.event_id.is_nil());
    }

    #[test]
    fn test_reported_at() {
        let event = PositionEvent::new("VEH-0001", 0);
        assert_eq!(event.reported_at().map(|t| t.timestamp()), Some(0));
    }
}
