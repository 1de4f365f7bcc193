//! Lambda handlers for a SiteWise telemetry pipeline with Lookout for Equipment
//! anomaly scoring.

pub mod athena;
pub mod config;
pub mod error;
pub mod inference;
pub mod ingest;
pub mod logging;
pub mod lookup;
pub mod metadata;
pub mod model;
pub mod scores;
pub mod sitewise;
pub mod storage;
pub mod throttle;
pub mod topology;
pub mod transform;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{PipelineError, Result};
