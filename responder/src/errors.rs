use std::io;

#[derive(thiserror::Error, Debug)]
pub enum ResponderError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to load response config: {0}")]
    ResponseConfig(#[from] policy::ConfigError),
    #[error("failed to precompute versions: {0}")]
    Precompute(#[from] policy::PrecomputeError),
    #[error("geo database error: {0}")]
    Geo(#[from] telemetry::GeoError),
    #[error("telemetry sink error: {0}")]
    Sink(#[from] telemetry::SinkError),
    #[error("failed to provision telemetry database: {0}")]
    Provision(#[from] telemetry::ProvisionError),
}
