use async_trait::async_trait;
use std::sync::Mutex;
use telemetry::{SinkError, TelemetryPoint, TelemetrySink};

/// Sink that keeps every point it is given.
#[derive(Default)]
pub struct CollectingSink {
    points: Mutex<Vec<TelemetryPoint>>,
}

impl CollectingSink {
    pub fn points(&self) -> Vec<TelemetryPoint> {
        self.points.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetrySink for CollectingSink {
    async fn write(&self, batch: &[TelemetryPoint]) -> Result<(), SinkError> {
        self.points.lock().unwrap().extend_from_slice(batch);
        Ok(())
    }
}
