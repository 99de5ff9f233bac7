//! Per-partition event processor: parse, correlate, flush, checkpoint.

use crate::batch::EventBatchBuilder;
use crate::collector::EventCollector;
use crate::errors::{IngestError, Result};
use crate::message::parse;
use crate::metrics_defs::{
    CHECKPOINTS_SAVED, DELIVERY_FAILURES, EVENTS_RECEIVED, EVENTS_SKIPPED, FLUSHES,
    PAIRS_COMPLETED,
};
use crate::store::CorrelationStore;
use crate::stream::{Checkpointer, CloseReason, PartitionContext, RawEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Tunables for a partition processor.
#[derive(Clone, Copy, Debug)]
pub struct ProcessorSettings {
    /// Number of stored halves that forces a flush mid-batch. A flush also
    /// runs unconditionally at the end of every event batch.
    pub flush_threshold: usize,
    /// Minimum time between checkpoints. Checkpointing is paced separately
    /// from flushing so slow partitions still record progress.
    pub checkpoint_interval: Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        ProcessorSettings {
            flush_threshold: 100,
            checkpoint_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessorState {
    Opened,
    Running,
    Closing,
    Closed,
}

/// Owns the event loop for one stream partition. The platform adapter calls
/// [`PartitionProcessor::open`] once, [`PartitionProcessor::on_events`] for
/// each batch it reads, and [`PartitionProcessor::close`] when the partition
/// is released.
pub struct PartitionProcessor {
    partition_id: String,
    store: Arc<CorrelationStore>,
    builder: Arc<EventBatchBuilder>,
    collector: Arc<dyn EventCollector>,
    checkpointer: Arc<dyn Checkpointer>,
    settings: ProcessorSettings,
    state: ProcessorState,
    last_checkpoint: Instant,
}

impl PartitionProcessor {
    pub fn new(
        partition_id: impl Into<String>,
        store: Arc<CorrelationStore>,
        builder: Arc<EventBatchBuilder>,
        collector: Arc<dyn EventCollector>,
        checkpointer: Arc<dyn Checkpointer>,
        settings: ProcessorSettings,
    ) -> Self {
        PartitionProcessor {
            partition_id: partition_id.into(),
            store,
            builder,
            collector,
            checkpointer,
            settings,
            state: ProcessorState::Opened,
            last_checkpoint: Instant::now(),
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn open(&mut self) {
        self.state = ProcessorState::Running;
        self.last_checkpoint = Instant::now();
        tracing::info!(partition_id = %self.partition_id, "partition processor opened");
    }

    /// Handles one batch of raw events. Per-event failures are logged and
    /// skipped; the batch keeps going. Flushes mid-batch whenever the
    /// insert count reaches the threshold, once more at the end, and then
    /// checkpoints if enough time has passed.
    pub async fn on_events(
        &mut self,
        ctx: &PartitionContext,
        events: Vec<RawEvent>,
    ) -> Result<()> {
        if self.state != ProcessorState::Running {
            return Err(IngestError::NotRunning);
        }

        let mut inserted = 0usize;
        for event in &events {
            metrics::counter!(EVENTS_RECEIVED.name).increment(1);
            let stored = parse(&event.body)
                .map_err(IngestError::from)
                .and_then(|half| self.store.insert(half));
            match stored {
                Ok(()) => inserted += 1,
                Err(err) => {
                    metrics::counter!(EVENTS_SKIPPED.name).increment(1);
                    tracing::warn!(
                        partition_id = %self.partition_id,
                        sequence_number = event.sequence_number,
                        error = %err,
                        "skipping unparseable stream event"
                    );
                    continue;
                }
            }
            if inserted >= self.settings.flush_threshold {
                self.flush().await;
                inserted = 0;
            }
        }

        self.flush().await;

        if self.last_checkpoint.elapsed() >= self.settings.checkpoint_interval {
            self.checkpoint(ctx).await;
        }
        Ok(())
    }

    /// Extracts completed pairs, samples them, and hands the batch to the
    /// collector. A failed delivery drops the batch; the halves were already
    /// removed from the store and are never requeued.
    async fn flush(&self) {
        let pairs = self.store.extract_completed();
        metrics::counter!(FLUSHES.name).increment(1);
        if !pairs.is_empty() {
            metrics::counter!(PAIRS_COMPLETED.name).increment(pairs.len() as u64);
            tracing::info!(
                partition_id = %self.partition_id,
                pairs = pairs.len(),
                "flushing completed pairs"
            );
        }

        let batch = self.builder.build_batch(pairs);
        let records = batch.len();
        if let Err(err) = self.collector.deliver_batch(batch).await {
            metrics::counter!(DELIVERY_FAILURES.name).increment(1);
            tracing::error!(
                partition_id = %self.partition_id,
                records,
                error = %err,
                "delivery failed, batch dropped"
            );
        }
    }

    async fn checkpoint(&mut self, ctx: &PartitionContext) {
        tracing::info!(
            partition_id = %self.partition_id,
            offset = %ctx.position.offset,
            sequence_number = ctx.position.sequence_number,
            elapsed_secs = self.last_checkpoint.elapsed().as_secs(),
            "recording stream position"
        );
        match self.checkpointer.checkpoint(ctx).await {
            Ok(()) => {
                self.last_checkpoint = Instant::now();
                metrics::counter!(CHECKPOINTS_SAVED.name).increment(1);
            }
            Err(err) => {
                // Position is retried after the next batch; events are
                // idempotent to reprocess because the store is last-write-wins.
                tracing::error!(
                    partition_id = %self.partition_id,
                    error = %err,
                    "checkpoint failed, will retry after the next batch"
                );
            }
        }
    }

    /// Closes the partition. Only an orderly shutdown records a final
    /// checkpoint; a lost lease leaves the position to the new owner.
    pub async fn close(&mut self, ctx: &PartitionContext, reason: CloseReason) {
        self.state = ProcessorState::Closing;
        tracing::info!(
            partition_id = %self.partition_id,
            reason = ?reason,
            "partition processor closing"
        );
        if reason == CloseReason::Shutdown {
            self.checkpoint(ctx).await;
        }
        self.state = ProcessorState::Closed;
    }
}
