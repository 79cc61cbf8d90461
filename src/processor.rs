//! The batch processor.
//!
//! [`BatchProcessor::process`] takes one ordered batch from a single partition
//! together with the partition's [`PartitionState`] and returns a
//! [`BatchResult`]. It never advances anything itself: the caller commits
//! `result.checkpoint` only when the batch succeeded.
//!
//! Per record, in order:
//!
//! 1. Records already covered by the checkpoint are skipped.
//! 2. The payload is decoded and transformed. A decode failure is permanent
//!    and isolated to the record.
//! 3. The item is upserted. Transient sink errors are retried in-process per
//!    the [`RetryStrategy`]; once the strategy gives up the batch fails
//!    immediately and the remaining records are not attempted. Permanent sink
//!    errors are isolated like decode failures.
//!
//! Isolated records go to the dead-letter path when one is configured and
//! are otherwise logged at error level.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::Instrument;

use crate::config::{ProcessorConfig, RetryConfig, RetryStrategy};
use crate::dead_letter::{DeadLetter, SharedDeadLetterSink};
use crate::error::{ErrorObject, ProcessorError, ProcessorResult};
use crate::metrics::ProcessorMetrics;
use crate::sink::SharedRecordSink;
use crate::transform::RecordTransform;
use crate::types::{Checkpoint, PartitionId, PartitionState, ProcessedItem, RawRecord};

/// A record isolated as a permanent failure.
#[derive(Debug, Clone, PartialEq)]
pub struct PermanentFailure {
    /// The record as read from the source
    pub record: RawRecord,
    /// Why it failed
    pub reason: ErrorObject,
}

/// Outcome of one batch.
#[derive(Debug)]
pub struct BatchResult {
    /// The partition the batch came from
    pub partition_id: PartitionId,
    /// Records written to the sink
    pub succeeded: usize,
    /// Records skipped because the checkpoint already covered them
    pub skipped: usize,
    /// Records isolated as permanent failures
    pub permanent_failures: Vec<PermanentFailure>,
    /// True if the batch must be redelivered
    pub transient_failure: bool,
    /// The error that failed the batch
    pub error: Option<ProcessorError>,
    /// The checkpoint the source may commit. Equal to the incoming checkpoint
    /// when the batch failed.
    pub checkpoint: Checkpoint,
}

impl BatchResult {
    fn empty(state: &PartitionState) -> Self {
        Self {
            partition_id: state.partition_id.clone(),
            succeeded: 0,
            skipped: 0,
            permanent_failures: Vec::new(),
            transient_failure: false,
            error: None,
            checkpoint: state.checkpoint.clone(),
        }
    }

    fn failed(state: &PartitionState, error: ProcessorError) -> Self {
        Self {
            transient_failure: true,
            error: Some(error),
            ..Self::empty(state)
        }
    }

    /// Returns true if the batch completed and its checkpoint may be committed.
    pub fn is_success(&self) -> bool {
        !self.transient_failure
    }

    /// Returns the number of records that reached a terminal state.
    pub fn processed(&self) -> usize {
        self.succeeded + self.permanent_failures.len()
    }
}

/// Processes batches of one kind of record into a sink.
pub struct BatchProcessor<T: RecordTransform> {
    transform: T,
    sink: SharedRecordSink,
    dead_letter: Option<SharedDeadLetterSink>,
    retry: Box<dyn RetryStrategy>,
    invocation_timeout: Duration,
    metrics: Arc<ProcessorMetrics>,
}

impl<T: RecordTransform> std::fmt::Debug for BatchProcessor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("dead_letter", &self.dead_letter.is_some())
            .field("retry", &self.retry)
            .field("invocation_timeout", &self.invocation_timeout)
            .finish_non_exhaustive()
    }
}

impl<T: RecordTransform> BatchProcessor<T> {
    /// Creates a processor with the default retry policy and timeout and no
    /// dead-letter path.
    pub fn new(transform: T, sink: SharedRecordSink) -> Self {
        let defaults = ProcessorConfig::default();
        Self {
            transform,
            sink,
            dead_letter: None,
            retry: Box::new(RetryConfig::default()),
            invocation_timeout: defaults.invocation_timeout,
            metrics: Arc::new(ProcessorMetrics::new()),
        }
    }

    /// Creates a processor from configuration.
    ///
    /// `dead_letter` is only used when the configuration enables it.
    pub fn from_config(
        transform: T,
        sink: SharedRecordSink,
        dead_letter: Option<SharedDeadLetterSink>,
        config: &ProcessorConfig,
    ) -> Self {
        let processor = Self::new(transform, sink)
            .with_retry_strategy(config.retry.clone())
            .with_invocation_timeout(config.invocation_timeout);
        match dead_letter {
            Some(dead_letter) if config.dead_letter_enabled => processor.with_dead_letter(dead_letter),
            _ => processor,
        }
    }

    /// Routes permanent failures to `dead_letter`.
    pub fn with_dead_letter(mut self, dead_letter: SharedDeadLetterSink) -> Self {
        self.dead_letter = Some(dead_letter);
        self
    }

    /// Sets the per-record retry strategy.
    pub fn with_retry_strategy(mut self, retry: impl RetryStrategy + 'static) -> Self {
        self.retry = Box::new(retry);
        self
    }

    /// Sets the overall bound on one batch.
    pub fn with_invocation_timeout(mut self, invocation_timeout: Duration) -> Self {
        self.invocation_timeout = invocation_timeout;
        self
    }

    /// Shares `metrics` with the caller.
    pub fn with_metrics(mut self, metrics: Arc<ProcessorMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the metrics this processor updates.
    pub fn metrics(&self) -> &Arc<ProcessorMetrics> {
        &self.metrics
    }

    /// Returns the overall bound on one batch.
    pub fn invocation_timeout(&self) -> Duration {
        self.invocation_timeout
    }

    /// Processes one batch from `state.partition_id`.
    ///
    /// The whole call is bounded by the invocation timeout; on expiry the
    /// batch is reported as a transient failure. Writes that completed before
    /// the timeout are not rolled back.
    pub async fn process(&self, batch: &[RawRecord], state: &PartitionState) -> BatchResult {
        if batch.is_empty() {
            return BatchResult::empty(state);
        }

        let span = tracing::info_span!(
            "process_batch",
            partition = %state.partition_id,
            records = batch.len(),
            checkpoint = %state.checkpoint,
        );

        let started = Instant::now();
        self.metrics.record_invocation(source_lag(batch));

        let result = match tokio::time::timeout(self.invocation_timeout, self.run_batch(batch, state))
            .instrument(span.clone())
            .await
        {
            Ok(result) => result,
            Err(_) => {
                span.in_scope(|| {
                    tracing::warn!(
                        timeout_ms = self.invocation_timeout.as_millis() as u64,
                        "Batch invocation timed out"
                    );
                });
                BatchResult::failed(state, ProcessorError::invocation_timeout(self.invocation_timeout))
            }
        };

        self.metrics.record_outcome(
            result.succeeded as u64,
            result.permanent_failures.len() as u64,
            result.transient_failure,
            started.elapsed(),
        );
        self.metrics.snapshot().emit(state.partition_id.as_str());

        result
    }

    async fn run_batch(&self, batch: &[RawRecord], state: &PartitionState) -> BatchResult {
        if let Err(error) = check_batch_order(batch, &state.partition_id) {
            tracing::error!(error = %error, "Rejecting batch");
            return BatchResult::failed(state, error);
        }

        let mut result = BatchResult::empty(state);

        for record in batch {
            if state.checkpoint.covers(&record.sequence_number) {
                tracing::debug!(
                    sequence_number = %record.sequence_number,
                    "Skipping record already covered by the checkpoint"
                );
                result.skipped += 1;
                continue;
            }

            let item = match self.transform.apply(record) {
                Ok(item) => item,
                Err(error) => {
                    result.permanent_failures.push(self.isolate(record, &error));
                    continue;
                }
            };

            match self.upsert_with_retry(record, &item).await {
                Ok(()) => result.succeeded += 1,
                Err(error) if error.is_permanent() => {
                    result.permanent_failures.push(self.isolate(record, &error));
                }
                Err(error) => {
                    tracing::error!(
                        sequence_number = %record.sequence_number,
                        error = %error,
                        "Batch failed, it will be redelivered"
                    );
                    return BatchResult {
                        succeeded: result.succeeded,
                        skipped: result.skipped,
                        permanent_failures: result.permanent_failures,
                        ..BatchResult::failed(state, error)
                    };
                }
            }
        }

        if let Some(last) = batch.last() {
            result.checkpoint = state
                .checkpoint
                .clone()
                .max(Checkpoint::at(last.sequence_number.clone()));
        }

        tracing::debug!(
            succeeded = result.succeeded,
            skipped = result.skipped,
            permanent_failures = result.permanent_failures.len(),
            checkpoint = %result.checkpoint,
            "Batch completed"
        );
        result
    }

    /// Upserts `item`, retrying transient errors until the strategy gives up.
    async fn upsert_with_retry(&self, record: &RawRecord, item: &ProcessedItem) -> ProcessorResult<()> {
        let key = item.key();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let error = match self.sink.upsert(&key, item).await {
                Ok(()) => return Ok(()),
                Err(error) if !error.is_transient() => {
                    return Err(ProcessorError::SinkRejected { source: error });
                }
                Err(error) => error,
            };

            match self.retry.next_delay(attempt, &error) {
                Some(delay) => {
                    tracing::debug!(
                        sequence_number = %record.sequence_number,
                        key = %key,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Upsert failed, retrying with exponential backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    tracing::warn!(
                        sequence_number = %record.sequence_number,
                        key = %key,
                        attempt = attempt,
                        error = %error,
                        "Upsert failed: max retries exceeded"
                    );
                    return Err(ProcessorError::RetriesExhausted {
                        attempts: attempt,
                        source: error,
                    });
                }
            }
        }
    }

    fn isolate(&self, record: &RawRecord, error: &ProcessorError) -> PermanentFailure {
        let reason = ErrorObject::from(error);
        match &self.dead_letter {
            Some(dead_letter) => {
                tracing::warn!(
                    sequence_number = %record.sequence_number,
                    error = %error,
                    "Permanent failure, routing record to the dead-letter path"
                );
                dead_letter.record_permanent_failure(DeadLetter::new(record.clone(), reason.clone()));
            }
            None => {
                tracing::error!(
                    sequence_number = %record.sequence_number,
                    partition_key = %record.partition_key,
                    error = %error,
                    "Permanent failure, record dropped (no dead-letter path configured)"
                );
            }
        }
        PermanentFailure {
            record: record.clone(),
            reason,
        }
    }
}

/// Checks that every record belongs to `partition` and that sequence numbers
/// strictly increase.
pub fn check_batch_order(batch: &[RawRecord], partition: &PartitionId) -> ProcessorResult<()> {
    if let Some(stray) = batch.iter().find(|r| &r.partition_id != partition) {
        return Err(ProcessorError::ordering(format!(
            "record {} belongs to partition {}, not {}",
            stray.sequence_number, stray.partition_id, partition
        )));
    }
    for pair in batch.windows(2) {
        if pair[1].sequence_number <= pair[0].sequence_number {
            return Err(ProcessorError::ordering(format!(
                "sequence {} follows {}",
                pair[1].sequence_number, pair[0].sequence_number
            )));
        }
    }
    Ok(())
}

fn source_lag(batch: &[RawRecord]) -> Duration {
    batch
        .iter()
        .map(|r| r.arrival_timestamp)
        .min()
        .and_then(|oldest| Utc::now().signed_duration_since(oldest).to_std().ok())
        .unwrap_or(Duration::ZERO)
}
