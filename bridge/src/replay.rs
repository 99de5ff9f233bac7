//! File-backed event source: replays newline-delimited JSON events through
//! a single partition processor, checkpointing to the log.

use async_trait::async_trait;
use bytes::Bytes;
use ingest::errors::{CheckpointError, IngestError};
use ingest::processor::PartitionProcessor;
use ingest::stream::{Checkpointer, CloseReason, PartitionContext, RawEvent};
use std::path::Path;

#[derive(thiserror::Error, Debug)]
pub enum ReplayError {
    #[error("could not read replay file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

/// Checkpointer for replay runs: the file is the source of truth, so the
/// position is only logged.
pub struct LoggingCheckpointer;

#[async_trait]
impl Checkpointer for LoggingCheckpointer {
    async fn checkpoint(&self, ctx: &PartitionContext) -> Result<(), CheckpointError> {
        tracing::info!(
            partition_id = %ctx.partition_id,
            offset = %ctx.position.offset,
            sequence_number = ctx.position.sequence_number,
            "replay position"
        );
        Ok(())
    }
}

/// Drives the whole file through the processor in `batch_size` chunks, then
/// closes it as an orderly shutdown.
pub async fn run(
    path: &Path,
    batch_size: usize,
    mut processor: PartitionProcessor,
) -> Result<(), ReplayError> {
    let contents = tokio::fs::read_to_string(path).await?;
    let mut ctx = PartitionContext::new("replay-0");
    processor.open();

    let mut batch = Vec::with_capacity(batch_size);
    let mut sequence = 0i64;
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        batch.push(RawEvent {
            sequence_number: sequence,
            offset: sequence.to_string(),
            partition_key: None,
            body: Bytes::from(line.to_owned()),
        });
        sequence += 1;

        if batch.len() >= batch_size {
            deliver(&mut processor, &mut ctx, std::mem::take(&mut batch)).await?;
        }
    }
    if !batch.is_empty() {
        deliver(&mut processor, &mut ctx, batch).await?;
    }

    processor.close(&ctx, CloseReason::Shutdown).await;
    tracing::info!(events = sequence, "replay finished");
    Ok(())
}

async fn deliver(
    processor: &mut PartitionProcessor,
    ctx: &mut PartitionContext,
    batch: Vec<RawEvent>,
) -> Result<(), ReplayError> {
    if let Some(last) = batch.last() {
        ctx.position.offset = last.offset.clone();
        ctx.position.sequence_number = last.sequence_number;
    }
    processor.on_events(ctx, batch).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest::batch::{DrawFn, EventBatchBuilder, OutboundRecord};
    use ingest::collector::EventCollector;
    use ingest::errors::DeliveryError;
    use ingest::processor::ProcessorSettings;
    use ingest::store::CorrelationStore;
    use parking_lot::Mutex;
    use sampling::{FetchError, PolicyFetcher, PolicyHandle, SamplingPolicy};
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;

    struct NoopFetcher;

    #[async_trait]
    impl PolicyFetcher for NoopFetcher {
        async fn fetch(&self) -> Result<SamplingPolicy, FetchError> {
            Ok(SamplingPolicy::default())
        }
    }

    #[derive(Default)]
    struct RecordingCollector {
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EventCollector for RecordingCollector {
        async fn deliver_batch(&self, batch: Vec<OutboundRecord>) -> Result<(), DeliveryError> {
            self.batches.lock().push(batch.len());
            Ok(())
        }
    }

    fn processor(collector: Arc<RecordingCollector>) -> PartitionProcessor {
        let policy = SamplingPolicy {
            etag: Some("v1".to_string()),
            ..SamplingPolicy::default()
        };
        let handle =
            PolicyHandle::with_initial(policy, Arc::new(NoopFetcher), Duration::from_secs(300));
        let draw: DrawFn = Arc::new(|| 0.0);
        let builder = Arc::new(EventBatchBuilder::new(handle, None, None).with_draw(draw));
        PartitionProcessor::new(
            "replay-0",
            Arc::new(CorrelationStore::new()),
            builder,
            collector,
            Arc::new(LoggingCheckpointer),
            ProcessorSettings {
                flush_threshold: 100,
                checkpoint_interval: Duration::from_secs(3600),
            },
        )
    }

    #[tokio::test]
    async fn replays_a_file_end_to_end() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 0..3 {
            writeln!(
                file,
                r#"{{"event_type": "request", "message-id": "m{i}", "method": "GET", "uri": "http://x/{i}"}}"#
            )
            .unwrap();
            writeln!(
                file,
                r#"{{"event_type": "response", "message-id": "m{i}", "status_code": 200}}"#
            )
            .unwrap();
        }

        let collector = Arc::new(RecordingCollector::default());
        run(file.path(), 4, processor(collector.clone()))
            .await
            .unwrap();

        // Six events in chunks of four: two processor batches, and every
        // pair is delivered exactly once.
        let batches = collector.batches.lock();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches.iter().sum::<usize>(), 3);
    }

    #[tokio::test]
    async fn blank_lines_are_ignored() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"event_type": "request", "message-id": "m", "method": "GET", "uri": "http://x/"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"event_type": "response", "message-id": "m", "status_code": 200}}"#
        )
        .unwrap();

        let collector = Arc::new(RecordingCollector::default());
        run(file.path(), 100, processor(collector.clone()))
            .await
            .unwrap();

        assert_eq!(collector.batches.lock().iter().sum::<usize>(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let collector = Arc::new(RecordingCollector::default());
        let err = run(Path::new("/nonexistent/events.ndjson"), 100, processor(collector))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::Io(_)));
    }
}
