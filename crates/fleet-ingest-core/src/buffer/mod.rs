//! In-flight event buffering.
//!
//! The [`BatchAccumulator`] owns the batch between intake and sink and decides
//! when it is due for a write. The [`VehicleStateIndex`] keeps the latest
//! position per vehicle for diagnostics; it is never persisted.

mod accumulator;
mod state;

pub use accumulator::{AccumulatorState, Batch, BatchAccumulator};
pub use state::VehicleStateIndex;
