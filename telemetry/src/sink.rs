use crate::point::TelemetryPoint;
use async_trait::async_trait;

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("write rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Destination of flushed batches. Implementations must tolerate being
/// called concurrently with new points being recorded.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn write(&self, batch: &[TelemetryPoint]) -> Result<(), SinkError>;
}
