//! Record sources: the partitioned, replayable log the processor reads from.
//!
//! A source delivers records at least once. Nothing is acknowledged until
//! [`RecordSource::commit`] is called, and every unacknowledged record is
//! delivered again on the next read after the committed checkpoint.

pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProcessorResult;
use crate::types::{Checkpoint, PartitionId, RawRecord};

pub use memory::MemoryStream;

/// A batch read from one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBatch {
    /// The partition the records were read from
    pub partition_id: PartitionId,
    /// Records in sequence order, all strictly after the requested checkpoint
    pub records: Vec<RawRecord>,
    /// Position of the last record returned, or the requested checkpoint if empty
    pub cursor: Checkpoint,
}

impl RecordBatch {
    /// Creates an empty batch positioned at `after`.
    pub fn empty(partition_id: PartitionId, after: Checkpoint) -> Self {
        Self {
            partition_id,
            records: Vec::new(),
            cursor: after,
        }
    }

    /// Returns true if the batch has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Trait for reading from and acknowledging a partitioned log.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Returns the partitions currently present in the log.
    async fn list_partitions(&self) -> ProcessorResult<Vec<PartitionId>>;

    /// Reads up to `max_size` records strictly after `after`.
    ///
    /// Waits up to `max_wait` for the first record and returns an empty
    /// batch if none arrives in time.
    async fn get_next_batch(
        &self,
        partition: &PartitionId,
        max_size: usize,
        max_wait: Duration,
        after: &Checkpoint,
    ) -> ProcessorResult<RecordBatch>;

    /// Returns the last acknowledged checkpoint of `partition`.
    async fn committed_checkpoint(&self, partition: &PartitionId) -> ProcessorResult<Checkpoint>;

    /// Acknowledges every record of `partition` up to and including `checkpoint`.
    async fn commit(&self, partition: &PartitionId, checkpoint: &Checkpoint) -> ProcessorResult<()>;
}

/// Type alias for a shared record source.
pub type SharedRecordSource = Arc<dyn RecordSource>;
