//! Fleet telemetry: one point per version check, buffered in memory and
//! written to the time-series database in batches.

pub mod cache;
pub mod geo;
pub mod influx;
mod metrics_defs;
pub mod point;
pub mod sink;
#[cfg(test)]
mod testutils;

pub use cache::{CacheFlusher, TelemetryCache};
pub use geo::{GeoError, GeoLookup, Location, MaxMindGeoLookup, NoGeoLookup};
pub use influx::{InfluxConfig, InfluxSink, ProvisionError};
pub use metrics_defs::ALL_METRICS;
pub use point::TelemetryPoint;
pub use sink::{SinkError, TelemetrySink};
