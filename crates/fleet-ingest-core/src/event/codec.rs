//! JSON wire codec for position events.
//!
//! Decoding is tolerant of missing optional fields (they take zero values)
//! but strict about `vehicle_id` and `timestamp`, and about the shape of any
//! field that is present.

use super::{PositionEvent, VehicleType};
use crate::error::DecodeError;
use serde::Deserialize;
use uuid::Uuid;

/// Wire shape: every field optional so absence can be told apart from a bad value.
#[derive(Debug, Deserialize)]
struct WirePosition {
    vehicle_id: Option<String>,
    vehicle_type: Option<String>,
    timestamp: Option<i64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    speed: Option<f64>,
    status: Option<String>,
    event_id: Option<String>,
}

/// Decode a raw payload into a [`PositionEvent`].
pub fn decode(raw: &[u8]) -> Result<PositionEvent, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }

    let wire: WirePosition =
        serde_json::from_slice(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let vehicle_id = wire
        .vehicle_id
        .ok_or(DecodeError::MissingRequiredField {
            field: "vehicle_id",
        })?;
    let timestamp = wire.timestamp.ok_or(DecodeError::MissingRequiredField {
        field: "timestamp",
    })?;
    if chrono::DateTime::from_timestamp(timestamp, 0).is_none() {
        return Err(DecodeError::InvalidField {
            field: "timestamp",
            message: format!("{} is out of range", timestamp),
        });
    }

    let vehicle_type = match wire.vehicle_type {
        Some(s) => s
            .parse::<VehicleType>()
            .map_err(|message| DecodeError::InvalidField {
                field: "vehicle_type",
                message,
            })?,
        None => VehicleType::default(),
    };

    let event_id = match wire.event_id {
        Some(s) => Uuid::parse_str(&s).map_err(|e| DecodeError::InvalidField {
            field: "event_id",
            message: e.to_string(),
        })?,
        None => Uuid::nil(),
    };

    Ok(PositionEvent {
        vehicle_id,
        vehicle_type,
        timestamp,
        latitude: wire.latitude.unwrap_or_default(),
        longitude: wire.longitude.unwrap_or_default(),
        speed: wire.speed.unwrap_or_default().max(0.0),
        status: wire.status.unwrap_or_default(),
        event_id,
    })
}

/// Encode a [`PositionEvent`] as a JSON payload.
pub fn encode(event: &PositionEvent) -> Vec<u8> {
    // Every field is a string, integer, float, or unit enum: serialization cannot fail.
    serde_json::to_vec(event).unwrap_or_default()
}
