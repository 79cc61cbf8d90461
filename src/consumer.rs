//! Pull-mode consumption: one consumer per partition, all partitions in parallel.
//!
//! A [`ShardConsumer`] owns one partition. It reads the next batch after its
//! checkpoint, runs the [`BatchProcessor`], and commits only when the batch
//! succeeded; otherwise it keeps its state and the next poll reads the same
//! records again. There is never more than one batch in flight per partition.
//!
//! A [`Pipeline`] discovers the partitions of a source and runs a consumer for
//! each of them on a [`JoinSet`] until shutdown is signalled.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stream_batch_processor::consumer::{ConsumerConfig, Pipeline};
//! use stream_batch_processor::processor::BatchProcessor;
//! use stream_batch_processor::sink::MemorySink;
//! use stream_batch_processor::source::MemoryStream;
//! use stream_batch_processor::transform::SensorTransform;
//!
//! # async fn example() -> stream_batch_processor::ProcessorResult<()> {
//! let source = Arc::new(MemoryStream::with_partitions(["shard-0", "shard-1"]));
//! let processor = Arc::new(BatchProcessor::new(SensorTransform, Arc::new(MemorySink::new())));
//! let pipeline = Pipeline::new(source, processor, ConsumerConfig::default());
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let handle = tokio::spawn(async move { pipeline.run(shutdown_rx).await });
//! // ...
//! shutdown_tx.send(true).ok();
//! let states = handle.await.expect("pipeline task")?;
//! # let _ = states;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::ProcessorConfig;
use crate::error::{ProcessorError, ProcessorResult};
use crate::processor::BatchProcessor;
use crate::source::SharedRecordSource;
use crate::transform::RecordTransform;
use crate::types::{Checkpoint, PartitionId, PartitionState};

/// Settings for pull-mode consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerConfig {
    /// Maximum records per batch
    pub max_batch_size: usize,
    /// Maximum wait for the first record of a batch
    pub max_batch_wait: Duration,
    /// Pause after the first failed batch
    pub redelivery_initial_backoff: Duration,
    /// Upper bound on the pause between redeliveries
    pub redelivery_max_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_batch_wait: Duration::from_secs(1),
            redelivery_initial_backoff: Duration::from_millis(100),
            redelivery_max_backoff: Duration::from_secs(10),
        }
    }
}

impl ConsumerConfig {
    /// Sets the maximum batch size.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Sets the maximum batch wait.
    pub fn with_max_batch_wait(mut self, max_batch_wait: Duration) -> Self {
        self.max_batch_wait = max_batch_wait;
        self
    }

    /// Sets the redelivery backoff bounds.
    pub fn with_redelivery_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.redelivery_initial_backoff = initial;
        self.redelivery_max_backoff = max;
        self
    }

    /// Returns the pause after `consecutive_failures` failed batches.
    pub fn redelivery_backoff(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(16);
        self.redelivery_initial_backoff
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.redelivery_max_backoff)
    }
}

impl From<&ProcessorConfig> for ConsumerConfig {
    fn from(config: &ProcessorConfig) -> Self {
        let defaults = Self::default();
        Self {
            max_batch_size: config.max_batch_size,
            max_batch_wait: config.max_batch_wait,
            redelivery_initial_backoff: defaults
                .redelivery_initial_backoff
                .min(config.redelivery_max_backoff),
            redelivery_max_backoff: config.redelivery_max_backoff,
        }
    }
}

/// What happened during one poll.
#[derive(Debug)]
pub enum BatchOutcome {
    /// No records arrived within the wait window.
    Idle,
    /// The batch completed and its checkpoint was committed.
    Committed {
        /// Records written to the sink
        succeeded: usize,
        /// Records isolated as permanent failures
        permanent_failures: usize,
        /// The committed checkpoint
        checkpoint: Checkpoint,
    },
    /// The batch failed or could not be read or committed; it will be read again.
    Failed {
        /// Why the batch failed
        error: ProcessorError,
    },
}

impl BatchOutcome {
    /// Returns true if the poll failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Drives a single partition.
pub struct ShardConsumer<T: RecordTransform> {
    partition_id: PartitionId,
    source: SharedRecordSource,
    processor: Arc<BatchProcessor<T>>,
    config: ConsumerConfig,
}

impl<T: RecordTransform> ShardConsumer<T> {
    /// Creates a consumer for `partition_id`.
    pub fn new(
        partition_id: PartitionId,
        source: SharedRecordSource,
        processor: Arc<BatchProcessor<T>>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            partition_id,
            source,
            processor,
            config,
        }
    }

    /// Returns the partition this consumer drives.
    pub fn partition_id(&self) -> &PartitionId {
        &self.partition_id
    }

    /// Reads, processes and commits at most one batch.
    ///
    /// Returns the advanced state on success and the unchanged state otherwise.
    pub async fn poll_once(&self, state: PartitionState) -> (PartitionState, BatchOutcome) {
        let batch = match self
            .source
            .get_next_batch(
                &self.partition_id,
                self.config.max_batch_size,
                self.config.max_batch_wait,
                &state.checkpoint,
            )
            .await
        {
            Ok(batch) => batch,
            Err(error) => {
                tracing::warn!(partition = %self.partition_id, error = %error, "Failed to read batch");
                return (state, BatchOutcome::Failed { error });
            }
        };

        if batch.is_empty() {
            return (state, BatchOutcome::Idle);
        }

        let result = self.processor.process(&batch.records, &state).await;
        if !result.is_success() {
            let error = result
                .error
                .unwrap_or_else(|| ProcessorError::source_retriable("batch failed"));
            return (state, BatchOutcome::Failed { error });
        }

        if let Err(error) = self.source.commit(&self.partition_id, &result.checkpoint).await {
            tracing::warn!(
                partition = %self.partition_id,
                checkpoint = %result.checkpoint,
                error = %error,
                "Failed to commit checkpoint, batch will be redelivered"
            );
            return (state, BatchOutcome::Failed { error });
        }

        let outcome = BatchOutcome::Committed {
            succeeded: result.succeeded,
            permanent_failures: result.permanent_failures.len(),
            checkpoint: result.checkpoint.clone(),
        };
        let processed = result.processed() as u64;
        let state = state.advance(result.checkpoint, processed);
        (state, outcome)
    }

    /// Polls until `shutdown` becomes true, backing off after failed batches.
    ///
    /// A batch that is already being processed is finished before returning.
    /// A non-retriable failure, such as a partition the source no longer
    /// knows, stops the consumer with its last committed state.
    pub async fn run(&self, mut state: PartitionState, mut shutdown: watch::Receiver<bool>) -> PartitionState {
        let mut consecutive_failures = 0u32;
        tracing::info!(partition = %self.partition_id, checkpoint = %state.checkpoint, "Shard consumer started");

        while !*shutdown.borrow() {
            let (next, outcome) = self.poll_once(state).await;
            state = next;

            if !outcome.is_failed() {
                consecutive_failures = 0;
                continue;
            }

            if let BatchOutcome::Failed { error } = &outcome {
                if !error.is_retriable() {
                    tracing::error!(
                        partition = %self.partition_id,
                        checkpoint = %state.checkpoint,
                        error = %error,
                        "Non-retriable failure, stopping shard consumer"
                    );
                    break;
                }
            }

            consecutive_failures += 1;
            let delay = self.config.redelivery_backoff(consecutive_failures);
            tracing::debug!(
                partition = %self.partition_id,
                attempt = consecutive_failures,
                delay_ms = delay.as_millis() as u64,
                "Backing off before redelivery"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            partition = %self.partition_id,
            checkpoint = %state.checkpoint,
            batches = state.batches_committed,
            "Shard consumer stopped"
        );
        state
    }
}

/// Runs one [`ShardConsumer`] per partition of a source.
pub struct Pipeline<T: RecordTransform> {
    source: SharedRecordSource,
    processor: Arc<BatchProcessor<T>>,
    config: ConsumerConfig,
}

impl<T: RecordTransform + 'static> Pipeline<T> {
    /// Creates a pipeline.
    pub fn new(source: SharedRecordSource, processor: Arc<BatchProcessor<T>>, config: ConsumerConfig) -> Self {
        Self {
            source,
            processor,
            config,
        }
    }

    /// Consumes every partition until `shutdown` becomes true.
    ///
    /// Each consumer resumes from the source's committed checkpoint. Returns
    /// the final state of every partition, sorted by partition id.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> ProcessorResult<Vec<PartitionState>> {
        let partitions = self.source.list_partitions().await?;
        tracing::info!(partitions = partitions.len(), "Starting pipeline");

        let mut consumers = JoinSet::new();
        for partition in partitions {
            let checkpoint = self.source.committed_checkpoint(&partition).await?;
            let state = PartitionState::new(partition.clone(), checkpoint);
            let consumer = ShardConsumer::new(
                partition,
                Arc::clone(&self.source),
                Arc::clone(&self.processor),
                self.config.clone(),
            );
            let shutdown = shutdown.clone();
            consumers.spawn(async move { consumer.run(state, shutdown).await });
        }

        let mut states = Vec::new();
        while let Some(joined) = consumers.join_next().await {
            match joined {
                Ok(state) => states.push(state),
                Err(error) => {
                    consumers.abort_all();
                    return Err(ProcessorError::source_non_retriable(format!(
                        "shard consumer task failed: {}",
                        error
                    )));
                }
            }
        }

        states.sort_by(|a, b| a.partition_id.cmp(&b.partition_id));
        Ok(states)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::SinkError;
    use crate::sink::{MemorySink, RecordSink};
    use crate::source::{MemoryStream, RecordSource};
    use crate::transform::SensorTransform;
    use crate::types::{ItemKey, ProcessedItem, SequenceNumber};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct DownSink {
        calls: AtomicU32,
    }

    #[async_trait]
    impl RecordSink for DownSink {
        async fn upsert(&self, _: &ItemKey, _: &ProcessedItem) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SinkError::unavailable("down"))
        }
    }

    fn payload(sensor: &str, ts: &str) -> Vec<u8> {
        format!(r#"{{"sensor_id":"{}","temperature":18.5,"timestamp":"{}"}}"#, sensor, ts).into_bytes()
    }

    fn quick_config() -> ConsumerConfig {
        ConsumerConfig::default()
            .with_max_batch_size(10)
            .with_max_batch_wait(Duration::from_millis(10))
            .with_redelivery_backoff(Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn test_redelivery_backoff_is_bounded() {
        let config = ConsumerConfig::default()
            .with_redelivery_backoff(Duration::from_millis(100), Duration::from_millis(1_000));
        assert_eq!(config.redelivery_backoff(1), Duration::from_millis(100));
        assert_eq!(config.redelivery_backoff(2), Duration::from_millis(200));
        assert_eq!(config.redelivery_backoff(4), Duration::from_millis(800));
        assert_eq!(config.redelivery_backoff(5), Duration::from_millis(1_000));
        assert_eq!(config.redelivery_backoff(500), Duration::from_millis(1_000));
    }

    #[test]
    fn test_consumer_config_from_processor_config() {
        let processor_config = ProcessorConfig::new("t")
            .with_max_batch_size(7)
            .with_max_batch_wait(Duration::from_millis(250));
        let config = ConsumerConfig::from(&processor_config);
        assert_eq!(config.max_batch_size, 7);
        assert_eq!(config.max_batch_wait, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_poll_once_commits_and_advances() {
        let source = Arc::new(MemoryStream::with_partitions(["shard-0"]));
        source.append("shard-0", "s1", payload("s1", "t1"), Utc::now()).unwrap();
        source.append("shard-0", "s2", payload("s2", "t2"), Utc::now()).unwrap();
        let sink = Arc::new(MemorySink::new());
        let processor = Arc::new(BatchProcessor::new(SensorTransform, sink.clone()));
        let partition = PartitionId::from("shard-0");
        let consumer = ShardConsumer::new(partition.clone(), source.clone(), processor, quick_config());

        let state = PartitionState::new(partition.clone(), Checkpoint::initial());
        let (state, outcome) = consumer.poll_once(state).await;

        assert!(matches!(outcome, BatchOutcome::Committed { succeeded: 2, .. }));
        assert_eq!(state.checkpoint, Checkpoint::at(SequenceNumber::from_u64(2)));
        assert_eq!(state.records_committed, 2);
        assert_eq!(
            source.committed_checkpoint(&partition).await.unwrap(),
            state.checkpoint
        );

        let (_, outcome) = consumer.poll_once(state).await;
        assert!(matches!(outcome, BatchOutcome::Idle));
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn test_poll_once_failure_keeps_state() {
        let source = Arc::new(MemoryStream::with_partitions(["shard-0"]));
        source.append("shard-0", "s1", payload("s1", "t1"), Utc::now()).unwrap();
        let sink = Arc::new(DownSink { calls: AtomicU32::new(0) });
        let processor = Arc::new(
            BatchProcessor::new(SensorTransform, sink.clone()).with_retry_strategy(
                RetryConfig::default()
                    .with_initial_delay(Duration::from_millis(1))
                    .with_max_delay(Duration::from_millis(1)),
            ),
        );
        let partition = PartitionId::from("shard-0");
        let consumer = ShardConsumer::new(partition.clone(), source.clone(), processor, quick_config());

        let state = PartitionState::new(partition.clone(), Checkpoint::initial());
        let (next, outcome) = consumer.poll_once(state.clone()).await;

        assert!(outcome.is_failed());
        assert_eq!(next, state);
        assert_eq!(source.commit_count(&partition), 0);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_pipeline_stops_on_shutdown() {
        let source = Arc::new(MemoryStream::with_partitions(["shard-0", "shard-1"]));
        for i in 0..3 {
            source.append("shard-0", "a", payload("a", &format!("t{}", i)), Utc::now()).unwrap();
            source.append("shard-1", "b", payload("b", &format!("t{}", i)), Utc::now()).unwrap();
        }
        let sink = Arc::new(MemorySink::new());
        let processor = Arc::new(BatchProcessor::new(SensorTransform, sink.clone()));
        let pipeline = Pipeline::new(source.clone(), processor, quick_config());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { pipeline.run(shutdown_rx).await });

        while sink.len() < 6 {
            tokio::task::yield_now().await;
        }
        shutdown_tx.send(true).unwrap();

        let states = handle.await.unwrap().unwrap();
        assert_eq!(states.len(), 2);
        for state in states {
            assert_eq!(state.checkpoint, Checkpoint::at(SequenceNumber::from_u64(3)));
        }
    }

    struct GoneSource {
        reads: AtomicU32,
    }

    #[async_trait]
    impl RecordSource for GoneSource {
        async fn list_partitions(&self) -> ProcessorResult<Vec<PartitionId>> {
            Ok(vec![PartitionId::from("shard-0")])
        }

        async fn get_next_batch(
            &self,
            partition: &PartitionId,
            _: usize,
            _: Duration,
            _: &Checkpoint,
        ) -> ProcessorResult<crate::source::RecordBatch> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Err(ProcessorError::source_non_retriable(format!("unknown partition {}", partition)))
        }

        async fn committed_checkpoint(&self, _: &PartitionId) -> ProcessorResult<Checkpoint> {
            Ok(Checkpoint::initial())
        }

        async fn commit(&self, _: &PartitionId, _: &Checkpoint) -> ProcessorResult<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_non_retriable_source_error() {
        let source = Arc::new(GoneSource { reads: AtomicU32::new(0) });
        let processor = Arc::new(BatchProcessor::new(SensorTransform, Arc::new(MemorySink::new())));
        let partition = PartitionId::from("shard-0");
        let consumer = ShardConsumer::new(partition.clone(), source.clone(), processor, quick_config());

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = PartitionState::new(partition, Checkpoint::initial());
        let stopped = tokio::time::timeout(Duration::from_secs(120), consumer.run(state.clone(), shutdown_rx))
            .await
            .expect("consumer should stop without a shutdown signal");

        assert_eq!(stopped, state);
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
    }
}
