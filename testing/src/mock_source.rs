//! A record source that can be made to fail.
//!
//! `MockRecordSource` wraps a [`MemoryStream`] and records every commit. It
//! can fail a number of upcoming commits or reads, which is how a crash
//! between processing a batch and advancing its checkpoint is simulated.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use stream_batch_processor::{
    Checkpoint, MemoryStream, PartitionId, ProcessorError, ProcessorResult, RecordBatch,
    RecordSource,
};

/// Record of a commit call made to the mock source.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitCall {
    /// The partition passed to the call
    pub partition_id: PartitionId,
    /// The checkpoint passed to the call
    pub checkpoint: Checkpoint,
    /// Whether the commit was applied
    pub applied: bool,
}

/// A [`MemoryStream`] with injectable failures.
#[derive(Debug, Default)]
pub struct MockRecordSource {
    stream: MemoryStream,
    failing_commits: AtomicUsize,
    failing_reads: AtomicUsize,
    commits: Mutex<Vec<CommitCall>>,
    reads: AtomicUsize,
}

impl MockRecordSource {
    /// Wraps an existing stream.
    pub fn new(stream: MemoryStream) -> Self {
        Self {
            stream,
            ..Default::default()
        }
    }

    /// Makes the next `count` commits fail with a retriable error.
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` reads fail with a retriable error.
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Returns the wrapped stream.
    pub fn stream(&self) -> &MemoryStream {
        &self.stream
    }

    /// Returns all recorded commit calls.
    pub fn get_commit_calls(&self) -> Vec<CommitCall> {
        self.commits.lock().unwrap().clone()
    }

    /// Returns the number of `get_next_batch` calls made.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl RecordSource for MockRecordSource {
    async fn list_partitions(&self) -> ProcessorResult<Vec<PartitionId>> {
        self.stream.list_partitions().await
    }

    async fn get_next_batch(
        &self,
        partition: &PartitionId,
        max_size: usize,
        max_wait: Duration,
        after: &Checkpoint,
    ) -> ProcessorResult<RecordBatch> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_reads) {
            return Err(ProcessorError::source_retriable("simulated read failure"));
        }
        self.stream
            .get_next_batch(partition, max_size, max_wait, after)
            .await
    }

    async fn committed_checkpoint(&self, partition: &PartitionId) -> ProcessorResult<Checkpoint> {
        self.stream.committed_checkpoint(partition).await
    }

    async fn commit(&self, partition: &PartitionId, checkpoint: &Checkpoint) -> ProcessorResult<()> {
        let fail = Self::take_failure(&self.failing_commits);
        self.commits.lock().unwrap().push(CommitCall {
            partition_id: partition.clone(),
            checkpoint: checkpoint.clone(),
            applied: !fail,
        });
        if fail {
            return Err(ProcessorError::source_retriable("simulated crash before checkpoint"));
        }
        self.stream.commit(partition, checkpoint).await
    }
}
