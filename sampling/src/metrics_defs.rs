//! Metrics definitions for the sampling policy refresher.

use shared::metrics_defs::{MetricDef, MetricType};

pub const POLICY_REFRESH_SUCCESS: MetricDef = MetricDef {
    name: "policy.refresh.success",
    metric_type: MetricType::Counter,
    description: "Number of successful sampling policy fetches",
};

pub const POLICY_REFRESH_FAILURE: MetricDef = MetricDef {
    name: "policy.refresh.failure",
    metric_type: MetricType::Counter,
    description: "Number of failed sampling policy fetches",
};

pub const ALL_METRICS: &[MetricDef] = &[POLICY_REFRESH_SUCCESS, POLICY_REFRESH_FAILURE];
