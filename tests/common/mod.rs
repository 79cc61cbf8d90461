//! Shared test utilities for integration tests.
//!
//! This module provides helper functions and proptest strategies for creating
//! test fixtures used across integration tests.

#![allow(dead_code)] // These utilities are used by other integration test files

use std::sync::Arc;
use std::time::Duration;

use aws_lambda_events::event::kinesis::KinesisEvent;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use proptest::prelude::*;
use serde_json::json;

use stream_batch_processor::{
    BatchProcessor, Checkpoint, PartitionId, PartitionState, RawRecord, RecordSink, RetryConfig,
    SensorTransform,
};
use stream_batch_processor_testing::{garbage_record, sensor_record, RecordingDeadLetter};

// =============================================================================
// Fixtures
// =============================================================================

/// The partition used by single-partition tests.
pub const SHARD: &str = "shardId-000000000000";

/// State of a partition that has processed nothing.
pub fn initial_state(partition: &str) -> PartitionState {
    PartitionState::new(PartitionId::from(partition), Checkpoint::initial())
}

/// A retry policy with the default attempt count and millisecond delays.
pub fn fast_retry() -> RetryConfig {
    RetryConfig::default()
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(4))
}

/// A sensor processor writing to `sink` with a recording dead-letter path.
pub fn processor_with<S>(sink: Arc<S>) -> (BatchProcessor<SensorTransform>, Arc<RecordingDeadLetter>)
where
    S: RecordSink + 'static,
{
    let dead_letter = Arc::new(RecordingDeadLetter::new());
    let processor = BatchProcessor::new(SensorTransform, sink)
        .with_retry_strategy(fast_retry())
        .with_dead_letter(dead_letter.clone());
    (processor, dead_letter)
}

/// Builds a Kinesis trigger event carrying `records`.
pub fn kinesis_event(records: &[RawRecord]) -> KinesisEvent {
    let records: Vec<_> = records
        .iter()
        .map(|record| {
            json!({
                "kinesis": {
                    "kinesisSchemaVersion": "1.0",
                    "partitionKey": record.partition_key,
                    "sequenceNumber": record.sequence_number.as_str(),
                    "data": STANDARD.encode(&record.data),
                    "approximateArrivalTimestamp": record.arrival_timestamp.timestamp() as f64,
                },
                "eventSource": "aws:kinesis",
                "eventVersion": "1.0",
                "eventID": format!("{}:{}", record.partition_id, record.sequence_number),
                "eventName": "aws:kinesis:record",
                "invokeIdentityArn": "arn:aws:iam::123456789012:role/processor",
                "awsRegion": "us-east-1",
                "eventSourceARN": "arn:aws:kinesis:us-east-1:123456789012:stream/sensor-data",
            })
        })
        .collect();
    serde_json::from_value(json!({ "Records": records })).expect("valid Kinesis event")
}

// =============================================================================
// Proptest Strategies
// =============================================================================

/// One record of a generated batch.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordKind {
    /// A decodable reading from `sensor-{sensor}` at `t{tick}`
    Reading { sensor: u8, tick: u8 },
    /// An undecodable payload
    Garbage,
}

impl RecordKind {
    pub fn is_reading(&self) -> bool {
        matches!(self, RecordKind::Reading { .. })
    }
}

/// Strategy for a single record kind; readings are four times as likely as garbage.
pub fn record_kind_strategy() -> impl Strategy<Value = RecordKind> {
    prop_oneof![
        4 => (0u8..4, 0u8..6).prop_map(|(sensor, tick)| RecordKind::Reading { sensor, tick }),
        1 => Just(RecordKind::Garbage),
    ]
}

/// Strategy for a batch of up to `max` record kinds.
pub fn batch_kinds_strategy(max: usize) -> impl Strategy<Value = Vec<RecordKind>> {
    prop::collection::vec(record_kind_strategy(), 1..=max)
}

/// Materializes record kinds as an ordered batch starting at sequence 1.
pub fn build_batch(partition: &str, kinds: &[RecordKind]) -> Vec<RawRecord> {
    kinds
        .iter()
        .enumerate()
        .map(|(i, kind)| {
            let seq = i as u64 + 1;
            match kind {
                RecordKind::Reading { sensor, tick } => sensor_record(
                    partition,
                    seq,
                    &format!("sensor-{}", sensor),
                    &format!("2024-05-01T12:00:0{}Z", tick),
                ),
                RecordKind::Garbage => garbage_record(partition, seq),
            }
        })
        .collect()
}
