//! Metrics definitions for the ingest pipeline.

use shared::metrics_defs::{MetricDef, MetricType};

pub const EVENTS_RECEIVED: MetricDef = MetricDef {
    name: "ingest.events.received",
    metric_type: MetricType::Counter,
    description: "Raw stream events handed to a partition processor",
};

pub const EVENTS_SKIPPED: MetricDef = MetricDef {
    name: "ingest.events.skipped",
    metric_type: MetricType::Counter,
    description: "Stream events dropped because they could not be parsed or stored",
};

pub const PAIRS_COMPLETED: MetricDef = MetricDef {
    name: "ingest.pairs.completed",
    metric_type: MetricType::Counter,
    description: "Request/response pairs extracted from the correlation store",
};

pub const ORPHANS_SWEPT: MetricDef = MetricDef {
    name: "ingest.orphans.swept",
    metric_type: MetricType::Counter,
    description: "Unmatched halves evicted after exceeding the correlation TTL",
};

pub const RECORDS_ACCEPTED: MetricDef = MetricDef {
    name: "ingest.records.accepted",
    metric_type: MetricType::Counter,
    description: "Completed pairs accepted by the sampling policy",
};

pub const RECORDS_SAMPLED_OUT: MetricDef = MetricDef {
    name: "ingest.records.sampled_out",
    metric_type: MetricType::Counter,
    description: "Completed pairs rejected by the sampling policy",
};

pub const FLUSHES: MetricDef = MetricDef {
    name: "ingest.flushes",
    metric_type: MetricType::Counter,
    description: "Flush cycles run by partition processors",
};

pub const DELIVERY_FAILURES: MetricDef = MetricDef {
    name: "ingest.delivery.failures",
    metric_type: MetricType::Counter,
    description: "Batches dropped because delivery to the collector failed",
};

pub const CHECKPOINTS_SAVED: MetricDef = MetricDef {
    name: "ingest.checkpoints.saved",
    metric_type: MetricType::Counter,
    description: "Stream positions successfully recorded with the platform",
};

pub const REQUEST_CACHE_SIZE: MetricDef = MetricDef {
    name: "ingest.cache.requests",
    metric_type: MetricType::Gauge,
    description: "Unmatched request halves currently held in the correlation store",
};

pub const RESPONSE_CACHE_SIZE: MetricDef = MetricDef {
    name: "ingest.cache.responses",
    metric_type: MetricType::Gauge,
    description: "Unmatched response halves currently held in the correlation store",
};

pub const ALL_METRICS: &[MetricDef] = &[
    EVENTS_RECEIVED,
    EVENTS_SKIPPED,
    PAIRS_COMPLETED,
    ORPHANS_SWEPT,
    RECORDS_ACCEPTED,
    RECORDS_SAMPLED_OUT,
    FLUSHES,
    DELIVERY_FAILURES,
    CHECKPOINTS_SAVED,
    REQUEST_CACHE_SIZE,
    RESPONSE_CACHE_SIZE,
];
