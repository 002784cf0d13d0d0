//! Metrics definitions for telemetry batching.

use shared::metrics_defs::{MetricDef, MetricType};

pub const POINTS_ENQUEUED: MetricDef = MetricDef {
    name: "telemetry.points.enqueued",
    metric_type: MetricType::Counter,
    description: "Number of telemetry points added to the batching cache",
};

pub const FLUSH_BATCH_SIZE: MetricDef = MetricDef {
    name: "telemetry.flush.batch_size",
    metric_type: MetricType::Histogram,
    description: "Number of points per flushed batch. Tagged with trigger.",
};

pub const FLUSH_DURATION: MetricDef = MetricDef {
    name: "telemetry.flush.duration",
    metric_type: MetricType::Histogram,
    description: "Time to write one batch to the sink in seconds",
};

pub const FLUSH_FAILURES: MetricDef = MetricDef {
    name: "telemetry.flush.failures",
    metric_type: MetricType::Counter,
    description: "Number of batches dropped because the sink write failed",
};

pub const BATCHES_DROPPED: MetricDef = MetricDef {
    name: "telemetry.batches.dropped",
    metric_type: MetricType::Counter,
    description: "Number of full batches dropped because the flusher queue was full",
};

pub const ALL_METRICS: &[MetricDef] = &[
    POINTS_ENQUEUED,
    BATCHES_DROPPED,
    FLUSH_BATCH_SIZE,
    FLUSH_DURATION,
    FLUSH_FAILURES,
];
