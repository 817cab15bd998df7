//! Vehicle position events and their JSON wire codec.

mod codec;
mod position;

pub use codec::{decode, encode};
pub use position::{PositionEvent, VehicleType};
