use thiserror::Error;

/// Result type alias for ingest operations
pub type Result<T, E = IngestError> = std::result::Result<T, E>;

/// Errors that can occur while correlating and delivering events
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("event is missing a correlation id")]
    MissingCorrelationId,

    #[error("partition processor is not running")]
    NotRunning,

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Errors from parsing a raw stream event into a half-message
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("event body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unknown event type `{0}`")]
    UnknownEventType(String),

    #[error("invalid status code `{0}`")]
    InvalidStatus(String),
}

/// Errors from delivering a batch to the downstream collector
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("collector request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("collector returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("invalid collector URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Error recording a stream position with the upstream platform
#[derive(Error, Debug)]
#[error("checkpoint failed for partition {partition_id}: {message}")]
pub struct CheckpointError {
    pub partition_id: String,
    pub message: String,
}
