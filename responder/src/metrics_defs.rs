//! Metrics definitions for the upgrade responder service.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CHECK_UPGRADE_REQUESTS: MetricDef = MetricDef {
    name: "responder.check_upgrade.requests",
    metric_type: MetricType::Counter,
    description: "Number of version checks. Tagged with outcome: matched, no_matching_rule, unidentified or bad_request.",
};

pub const CHECK_UPGRADE_DURATION: MetricDef = MetricDef {
    name: "responder.check_upgrade.duration",
    metric_type: MetricType::Histogram,
    description: "Time to answer a version check in seconds",
};

pub const GEO_LOOKUP_FAILURES: MetricDef = MetricDef {
    name: "responder.geo_lookup.failures",
    metric_type: MetricType::Counter,
    description: "Number of client addresses that could not be located",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CHECK_UPGRADE_REQUESTS,
    CHECK_UPGRADE_DURATION,
    GEO_LOOKUP_FAILURES,
];
