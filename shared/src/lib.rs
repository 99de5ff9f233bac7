pub mod metrics_defs;

/// Header carrying the application id on every request to the collector.
pub const APPLICATION_ID_HEADER: &str = "x-application-id";
