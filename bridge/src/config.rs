use serde::Deserialize;
use std::fs::File;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

/// Where raw stream events come from.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Replays newline-delimited JSON events from a file through the
    /// pipeline, as a single partition.
    Replay {
        path: PathBuf,
        #[serde(default = "default_batch_size")]
        batch_size: usize,
    },
}

fn default_batch_size() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub struct CollectorConfig {
    /// Base URL of the analytics collector; the config and batch endpoints
    /// hang off it.
    #[serde(default = "default_collector_url")]
    pub base_url: Url,
    /// Request header carrying the caller's session token, if the gateway
    /// forwards one.
    pub session_token_header: Option<String>,
    pub api_version: Option<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            base_url: default_collector_url(),
            session_token_header: None,
            api_version: None,
        }
    }
}

fn default_collector_url() -> Url {
    // Statically valid.
    Url::parse("https://api.moesif.net/").unwrap()
}

#[derive(Debug, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        SamplingConfig {
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

fn default_refresh_interval_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,
    /// How long an unmatched half may wait for its partner before the
    /// sweeper evicts it.
    #[serde(default = "default_orphan_ttl_secs")]
    pub orphan_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            flush_threshold: default_flush_threshold(),
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
            orphan_ttl_secs: default_orphan_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

fn default_flush_threshold() -> usize {
    100
}

fn default_checkpoint_interval_secs() -> u64 {
    300
}

fn default_orphan_ttl_secs() -> u64 {
    1800
}

fn default_sweep_interval_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Collector application id sent with every config fetch and batch post.
    pub application_id: String,
    pub source: SourceConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.application_id.trim().is_empty() {
            return Err(ValidationError::EmptyApplicationId);
        }
        if self.ingest.flush_threshold == 0 {
            return Err(ValidationError::ZeroFlushThreshold);
        }
        let SourceConfig::Replay { batch_size, .. } = &self.source;
        if *batch_size == 0 {
            return Err(ValidationError::ZeroBatchSize);
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.sampling.refresh_interval_secs)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.ingest.checkpoint_interval_secs)
    }

    pub fn orphan_ttl(&self) -> Duration {
        Duration::from_secs(self.ingest.orphan_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.ingest.sweep_interval_secs)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Validation(#[from] ValidationError),
}

#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("application_id must not be empty")]
    EmptyApplicationId,
    #[error("ingest.flush_threshold must be greater than zero")]
    ZeroFlushThreshold,
    #[error("source.batch_size must be greater than zero")]
    ZeroBatchSize,
}
