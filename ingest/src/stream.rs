//! Contracts between the partition processor and the upstream event stream
//! platform. A platform adapter produces [`RawEvent`] batches, tracks the
//! [`PartitionContext`] for each partition it owns, and supplies a
//! [`Checkpointer`] the processor uses to record progress.

use crate::errors::CheckpointError;
use async_trait::async_trait;
use bytes::Bytes;

/// One event as read from a stream partition, before any parsing.
#[derive(Clone, Debug)]
pub struct RawEvent {
    pub sequence_number: i64,
    pub offset: String,
    pub partition_key: Option<String>,
    pub body: Bytes,
}

/// Position within a partition, updated by the adapter as events are read.
#[derive(Clone, Debug, Default)]
pub struct StreamPosition {
    pub offset: String,
    pub sequence_number: i64,
}

/// Per-partition state the adapter threads through every processor call.
#[derive(Clone, Debug)]
pub struct PartitionContext {
    pub partition_id: String,
    pub position: StreamPosition,
}

impl PartitionContext {
    pub fn new(partition_id: impl Into<String>) -> Self {
        PartitionContext {
            partition_id: partition_id.into(),
            position: StreamPosition::default(),
        }
    }
}

/// Why a partition is being closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Orderly shutdown; progress should be recorded first.
    Shutdown,
    /// The partition lease moved to another consumer, which will resume from
    /// its own view of the checkpoint. Writing one here would race it.
    LeaseLost,
}

/// Records a partition's stream position with the upstream platform.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn checkpoint(&self, ctx: &PartitionContext) -> Result<(), CheckpointError>;
}
