//! Bridges an API gateway's event stream to the analytics collector:
//! correlates request/response halves, samples them against the remotely
//! configured policy, and ships the survivors in batches.

mod config;
mod replay;

use clap::Parser;
use config::{Config, SourceConfig};
use ingest::batch::EventBatchBuilder;
use ingest::collector::HttpCollector;
use ingest::processor::{PartitionProcessor, ProcessorSettings};
use ingest::store::{CorrelationStore, spawn_orphan_sweeper};
use metrics_exporter_statsd::StatsdBuilder;
use sampling::{HttpPolicyFetcher, PolicyHandle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long)]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum RunError {
    #[error("could not set up the policy endpoint: {0}")]
    PolicyEndpoint(#[from] sampling::FetchError),

    #[error("could not set up the collector endpoint: {0}")]
    CollectorEndpoint(#[from] ingest::errors::DeliveryError),

    #[error(transparent)]
    Replay(#[from] replay::ReplayError),

    #[error("could not install the statsd recorder: {0}")]
    Metrics(String),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    // Held for the lifetime of the process; events flush on drop.
    let _sentry_guard = config.logging.as_ref().map(|logging| {
        sentry::init((
            logging.sentry_dsn.clone(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    if let Some(metrics_config) = &config.metrics
        && let Err(err) = install_statsd(metrics_config)
    {
        tracing::error!(error = %err, "failed to install metrics recorder");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "bridge exited with error");
            ExitCode::FAILURE
        }
    }
}

fn install_statsd(config: &config::MetricsConfig) -> Result<(), RunError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some("bridge"))
        .map_err(|err| RunError::Metrics(err.to_string()))?;
    metrics::set_global_recorder(recorder)
        .map_err(|err| RunError::Metrics(err.to_string()))?;

    shared::metrics_defs::describe_all(ingest::metrics_defs::ALL_METRICS);
    shared::metrics_defs::describe_all(sampling::metrics_defs::ALL_METRICS);
    Ok(())
}

async fn run(config: Config) -> Result<(), RunError> {
    let fetcher = Arc::new(HttpPolicyFetcher::new(
        &config.collector.base_url,
        config.application_id.clone(),
    )?);
    let policy = PolicyHandle::new(fetcher, config.refresh_interval());
    // Warm the policy; sampling keeps everything until the first fetch lands.
    policy.spawn_refresh();

    let store = Arc::new(CorrelationStore::new());
    spawn_orphan_sweeper(store.clone(), config.orphan_ttl(), config.sweep_interval());

    let builder = Arc::new(EventBatchBuilder::new(
        policy,
        config.collector.session_token_header.clone(),
        config.collector.api_version.clone(),
    ));
    let collector = Arc::new(HttpCollector::new(
        &config.collector.base_url,
        config.application_id.clone(),
    )?);

    let settings = ProcessorSettings {
        flush_threshold: config.ingest.flush_threshold,
        checkpoint_interval: config.checkpoint_interval(),
    };

    match &config.source {
        SourceConfig::Replay { path, batch_size } => {
            tracing::info!(path = %path.display(), batch_size, "starting replay source");
            let processor = PartitionProcessor::new(
                "replay-0",
                store,
                builder,
                collector,
                Arc::new(replay::LoggingCheckpointer),
                settings,
            );
            replay::run(path, *batch_size, processor).await?;
        }
    }
    Ok(())
}
