//! Lambda integration: push-mode processing of Kinesis trigger events.
//!
//! The platform owns the checkpoint in this mode. A handler that returns
//! `Ok` acknowledges every record of the event; a handler that returns `Err`
//! makes the platform retry the whole event. Partial batch responses are not
//! used, so a batch is never partially acknowledged.

use std::sync::Arc;
use std::time::Instant;

use aws_lambda_events::event::kinesis::{KinesisEvent, KinesisEventRecord};
use lambda_runtime::LambdaEvent;
use serde::{Deserialize, Serialize};

use crate::error::{ProcessorError, ProcessorResult};
use crate::processor::BatchProcessor;
use crate::transform::RecordTransform;
use crate::types::{Checkpoint, PartitionId, PartitionState, RawRecord, SequenceNumber};

/// Partition used when an event record carries no shard information.
pub const UNKNOWN_PARTITION: &str = "shardId-unknown";

/// Response body of a successful invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Records written to the sink
    pub processed_records: usize,
    /// Records isolated as permanent failures
    pub failed_records: usize,
    /// Wall time spent on the invocation
    pub processing_time_seconds: f64,
}

/// Processes Kinesis trigger events with a [`BatchProcessor`].
pub struct KinesisBatchHandler<T: RecordTransform> {
    processor: Arc<BatchProcessor<T>>,
}

impl<T: RecordTransform> Clone for KinesisBatchHandler<T> {
    fn clone(&self) -> Self {
        Self {
            processor: Arc::clone(&self.processor),
        }
    }
}

impl<T: RecordTransform> KinesisBatchHandler<T> {
    /// Creates a handler.
    pub fn new(processor: Arc<BatchProcessor<T>>) -> Self {
        Self { processor }
    }

    /// Processes every record of `event`.
    ///
    /// Records are grouped by shard, keeping their order, and each group is
    /// processed as one batch. The first group that fails transiently fails
    /// the invocation.
    ///
    /// The invocation timeout applies to each group. Trigger events carry a
    /// single shard, so in practice it bounds the whole invocation; an event
    /// spanning several shards may take up to one timeout per shard.
    pub async fn handle(&self, event: KinesisEvent) -> ProcessorResult<BatchSummary> {
        let started = Instant::now();
        let records = records_from_event(&event)?;
        let total = records.len();

        let mut summary = BatchSummary {
            processed_records: 0,
            failed_records: 0,
            processing_time_seconds: 0.0,
        };

        for (partition, batch) in group_by_partition(records) {
            let state = PartitionState::new(partition, Checkpoint::initial());
            let result = self.processor.process(&batch, &state).await;

            if !result.is_success() {
                let error = result
                    .error
                    .unwrap_or_else(|| ProcessorError::source_retriable("batch failed"));
                tracing::error!(
                    partition = %state.partition_id,
                    records = batch.len(),
                    error = %error,
                    "Invocation failed, the event will be retried"
                );
                return Err(error);
            }

            summary.processed_records += result.succeeded;
            summary.failed_records += result.permanent_failures.len();
        }

        summary.processing_time_seconds = started.elapsed().as_secs_f64();
        tracing::info!(
            records = total,
            processed_records = summary.processed_records,
            failed_records = summary.failed_records,
            processing_time_seconds = summary.processing_time_seconds,
            "Invocation completed"
        );
        Ok(summary)
    }
}

/// Entry point for `lambda_runtime::service_fn`.
pub async fn function_handler<T: RecordTransform>(
    handler: &KinesisBatchHandler<T>,
    event: LambdaEvent<KinesisEvent>,
) -> Result<BatchSummary, lambda_runtime::Error> {
    tracing::debug!(request_id = %event.context.request_id, "Received Kinesis event");
    Ok(handler.handle(event.payload).await?)
}

/// Converts the records of a trigger event.
pub fn records_from_event(event: &KinesisEvent) -> ProcessorResult<Vec<RawRecord>> {
    event.records.iter().map(raw_record).collect()
}

/// A record without a sequence number cannot be ordered or checkpointed and
/// fails the event. A missing partition key becomes an empty string.
fn raw_record(record: &KinesisEventRecord) -> ProcessorResult<RawRecord> {
    let sequence_number = record
        .kinesis
        .sequence_number
        .clone()
        .ok_or_else(|| ProcessorError::source_non_retriable("record has no sequence number"))?;
    let sequence_number = SequenceNumber::new(sequence_number)
        .map_err(|e| ProcessorError::source_non_retriable(e.to_string()))?;

    Ok(RawRecord::new(
        shard_id(record),
        record.kinesis.partition_key.clone().unwrap_or_default(),
        sequence_number,
        record.kinesis.data.0.clone(),
        record.kinesis.approximate_arrival_timestamp.0,
    ))
}

/// Extracts the shard id from an event id of the form `shardId-…:sequence`.
fn shard_id(record: &KinesisEventRecord) -> PartitionId {
    record
        .event_id
        .as_deref()
        .and_then(|id| id.split_once(':'))
        .map(|(shard, _)| shard)
        .filter(|shard| !shard.is_empty())
        .map(PartitionId::from)
        .unwrap_or_else(|| PartitionId::from(UNKNOWN_PARTITION))
}

/// Groups records by partition, keeping the first-seen partition order and
/// the record order within each partition.
pub fn group_by_partition(records: Vec<RawRecord>) -> Vec<(PartitionId, Vec<RawRecord>)> {
    let mut groups: Vec<(PartitionId, Vec<RawRecord>)> = Vec::new();
    for record in records {
        match groups.iter_mut().find(|(partition, _)| partition == &record.partition_id) {
            Some((_, batch)) => batch.push(record),
            None => groups.push((record.partition_id.clone(), vec![record])),
        }
    }
    groups
}
