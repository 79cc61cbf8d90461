//! Integration tests for the Kinesis trigger handler.

mod common;

use std::sync::Arc;
use std::time::Duration;

use stream_batch_processor::lambda::{records_from_event, UNKNOWN_PARTITION};
use stream_batch_processor::{
    BatchProcessor, ItemKey, KinesisBatchHandler, ProcessorError, SensorTransform, SequenceNumber,
    SinkError,
};
use stream_batch_processor_testing::{BatchBuilder, MockRecordSink};

use common::*;

// =============================================================================
// Successful invocations
// =============================================================================

#[tokio::test]
async fn test_handler_reports_summary() {
    let sink = Arc::new(MockRecordSink::new());
    let (processor, dead_letter) = processor_with(sink.clone());
    let handler = KinesisBatchHandler::new(Arc::new(processor));

    let batch = BatchBuilder::new(SHARD, 1)
        .reading("s1", "t1")
        .reading("s2", "t2")
        .garbage()
        .reading("s4", "t4")
        .reading("s5", "t5")
        .build();

    let summary = handler.handle(kinesis_event(&batch)).await.unwrap();

    assert_eq!(summary.processed_records, 4);
    assert_eq!(summary.failed_records, 1);
    assert!(summary.processing_time_seconds >= 0.0);
    assert_eq!(sink.len(), 4);
    assert_eq!(dead_letter.sequence_numbers(), vec![SequenceNumber::from_u64(3)]);
}

#[tokio::test]
async fn test_handler_processes_each_shard_in_order() {
    let sink = Arc::new(MockRecordSink::new());
    let (processor, _) = processor_with(sink.clone());
    let handler = KinesisBatchHandler::new(Arc::new(processor));

    let first = BatchBuilder::new("shardId-000000000001", 10)
        .reading("a", "t1")
        .reading("b", "t2")
        .build();
    let second = BatchBuilder::new("shardId-000000000002", 7)
        .reading("c", "t3")
        .reading("d", "t4")
        .build();
    // Interleave the shards the way a trigger may deliver them.
    let event = kinesis_event(&[
        first[0].clone(),
        second[0].clone(),
        first[1].clone(),
        second[1].clone(),
    ]);

    let summary = handler.handle(event).await.unwrap();

    assert_eq!(summary.processed_records, 4);
    let ids: Vec<_> = sink.committed_keys().into_iter().map(|key| key.id).collect();
    assert_eq!(ids, vec!["a", "b", "c", "d"]);
}

#[tokio::test]
async fn test_handler_accepts_empty_event() {
    let sink = Arc::new(MockRecordSink::new());
    let (processor, _) = processor_with(sink.clone());
    let handler = KinesisBatchHandler::new(Arc::new(processor));

    let summary = handler.handle(kinesis_event(&[])).await.unwrap();

    assert_eq!(summary.processed_records, 0);
    assert_eq!(summary.failed_records, 0);
    assert_eq!(sink.upsert_call_count(), 0);
}

// =============================================================================
// Failed invocations
// =============================================================================

/// A transient failure fails the invocation so the platform retries the event.
#[tokio::test]
async fn test_handler_fails_invocation_on_transient_failure() {
    let sink = Arc::new(MockRecordSink::new().with_failing_id("s2", SinkError::unavailable("down")));
    let (processor, _) = processor_with(sink.clone());
    let handler = KinesisBatchHandler::new(Arc::new(processor));

    let batch = BatchBuilder::new(SHARD, 1)
        .reading("s1", "t1")
        .reading("s2", "t2")
        .build();

    let error = handler.handle(kinesis_event(&batch)).await.unwrap_err();

    assert!(matches!(error, ProcessorError::RetriesExhausted { attempts: 3, .. }));
    assert!(error.is_retriable());
    assert!(sink.get(&ItemKey::new("s1", "t1")).is_some());
}

/// Retrying the same event after the store recovers converges to one copy of each item.
#[tokio::test]
async fn test_retried_event_converges() {
    let sink = Arc::new(MockRecordSink::new().with_failing_id("s2", SinkError::throttled("slow down")));
    let (processor, _) = processor_with(sink.clone());
    let handler = KinesisBatchHandler::new(Arc::new(processor));

    let batch = BatchBuilder::new(SHARD, 1)
        .reading("s1", "t1")
        .reading("s2", "t2")
        .reading("s3", "t3")
        .build();
    let event = kinesis_event(&batch);

    assert!(handler.handle(event.clone()).await.is_err());
    sink.heal("s2");
    let summary = handler.handle(event).await.unwrap();

    assert_eq!(summary.processed_records, 3);
    assert_eq!(sink.len(), 3);
}

/// The invocation timeout bounds each shard group, not the event as a whole.
#[tokio::test(start_paused = true)]
async fn test_invocation_timeout_applies_per_shard_group() {
    let sink = Arc::new(MockRecordSink::new().with_delay(Duration::from_secs(20)));
    let processor = BatchProcessor::new(SensorTransform, sink.clone())
        .with_invocation_timeout(Duration::from_secs(30));
    let handler = KinesisBatchHandler::new(Arc::new(processor));

    let first = BatchBuilder::new("shardId-000000000001", 1).reading("a", "t1").build();
    let second = BatchBuilder::new("shardId-000000000002", 1).reading("b", "t2").build();
    let event = kinesis_event(&[first[0].clone(), second[0].clone()]);

    let started = tokio::time::Instant::now();
    let summary = handler.handle(event).await.unwrap();

    assert_eq!(summary.processed_records, 2);
    assert!(started.elapsed() >= Duration::from_secs(40));
}

// =============================================================================
// Event conversion
// =============================================================================

#[test]
fn test_records_from_event_keeps_shard_and_payload() {
    let batch = BatchBuilder::new(SHARD, 42).reading("s1", "t1").build();

    let records = records_from_event(&kinesis_event(&batch)).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].partition_id.as_str(), SHARD);
    assert_eq!(records[0].sequence_number, SequenceNumber::from_u64(42));
    assert_eq!(records[0].partition_key, "s1");
    assert_eq!(records[0].data, batch[0].data);
    assert_eq!(records[0].arrival_timestamp, batch[0].arrival_timestamp);
}

#[test]
fn test_records_without_event_id_use_unknown_partition() {
    let batch = BatchBuilder::new(SHARD, 1).reading("s1", "t1").build();
    let mut event = kinesis_event(&batch);
    event.records[0].event_id = None;

    let records = records_from_event(&event).unwrap();

    assert_eq!(records[0].partition_id.as_str(), UNKNOWN_PARTITION);
}
