//! Ingestion engine orchestration.

mod backoff;
mod ingestion;

pub use backoff::Backoff;
pub use ingestion::{DrainReport, IngestionEngine};
