//! Integration tests for single-batch processing.
//!
//! These tests drive a `BatchProcessor` with the sensor transform against a
//! scripted sink and check what reaches the store, the dead-letter path and
//! the returned checkpoint.

mod common;

use std::sync::Arc;
use std::time::Duration;

use stream_batch_processor::{
    BatchProcessor, Checkpoint, ItemKey, PartitionId, PartitionState, ProcessorError,
    SensorTransform, SequenceNumber, SinkError,
};
use stream_batch_processor_testing::{BatchBuilder, MockRecordSink};

use common::*;

// =============================================================================
// Duplicate keys
// =============================================================================

/// Two readings with the same `(id, timestamp)` leave one item; the later
/// write wins.
#[tokio::test]
async fn test_duplicate_key_last_write_wins() {
    let sink = Arc::new(MockRecordSink::new());
    let (processor, _) = processor_with(sink.clone());

    let mut batch = BatchBuilder::new(SHARD, 1)
        .reading("s1", "t1")
        .reading("s1", "t1")
        .reading("s2", "t2")
        .build();
    // Make the two s1 readings distinguishable.
    batch[1].data = stream_batch_processor_testing::sensor_payload("s1", "t1", 35.0);

    let result = processor.process(&batch, &initial_state(SHARD)).await;

    assert!(result.is_success());
    assert_eq!(result.succeeded, 3);
    assert_eq!(sink.len(), 2);

    let stored = sink.get(&ItemKey::new("s1", "t1")).unwrap();
    assert_eq!(stored.field("temperature"), Some(&serde_json::json!(35.0)));
    assert_eq!(stored.field("category"), Some(&serde_json::json!("hot")));
    assert!(sink.get(&ItemKey::new("s2", "t2")).is_some());
}

// =============================================================================
// Fault isolation
// =============================================================================

/// A batch of five with an undecodable third record writes four items,
/// reports one permanent failure and still advances the checkpoint.
#[tokio::test]
async fn test_undecodable_record_is_isolated() {
    let sink = Arc::new(MockRecordSink::new());
    let (processor, dead_letter) = processor_with(sink.clone());

    let batch = BatchBuilder::new(SHARD, 1)
        .reading("s1", "t1")
        .reading("s2", "t2")
        .garbage()
        .reading("s4", "t4")
        .reading("s5", "t5")
        .build();

    let result = processor.process(&batch, &initial_state(SHARD)).await;

    assert!(result.is_success());
    assert_eq!(result.succeeded, 4);
    assert_eq!(result.permanent_failures.len(), 1);
    assert_eq!(
        result.permanent_failures[0].record.sequence_number,
        SequenceNumber::from_u64(3)
    );
    assert_eq!(result.checkpoint, Checkpoint::at(SequenceNumber::from_u64(5)));

    assert_eq!(sink.len(), 4);
    assert_eq!(dead_letter.sequence_numbers(), vec![SequenceNumber::from_u64(3)]);
    assert_eq!(dead_letter.letters()[0].reason.error_type, "DecodeError");
}

/// A permanent sink rejection is isolated the same way as a decode failure.
#[tokio::test]
async fn test_permanent_sink_rejection_is_isolated() {
    let sink = Arc::new(MockRecordSink::new().with_failing_id("s2", SinkError::permanent("item too large")));
    let (processor, dead_letter) = processor_with(sink.clone());

    let batch = BatchBuilder::new(SHARD, 1)
        .reading("s1", "t1")
        .reading("s2", "t2")
        .reading("s3", "t3")
        .build();

    let result = processor.process(&batch, &initial_state(SHARD)).await;

    assert!(result.is_success());
    assert_eq!(result.succeeded, 2);
    assert_eq!(dead_letter.len(), 1);
    assert_eq!(dead_letter.letters()[0].reason.error_type, "SinkRejectedError");
    // Permanent errors are never retried.
    assert_eq!(sink.upsert_call_count(), 3);
}

/// Without a dead-letter path, permanent failures are still reported in the result.
#[tokio::test]
async fn test_permanent_failure_without_dead_letter_path() {
    let sink = Arc::new(MockRecordSink::new());
    let processor = BatchProcessor::new(SensorTransform, sink.clone());

    let batch = BatchBuilder::new(SHARD, 1).garbage().reading("s1", "t1").build();
    let result = processor.process(&batch, &initial_state(SHARD)).await;

    assert!(result.is_success());
    assert_eq!(result.permanent_failures.len(), 1);
    assert_eq!(sink.len(), 1);
}

// =============================================================================
// Transient failures
// =============================================================================

/// A record whose write fails transiently on all three attempts fails the
/// batch, and the checkpoint does not advance.
#[tokio::test]
async fn test_exhausted_transient_failure_fails_batch() {
    let sink = Arc::new(MockRecordSink::new().with_failing_id("s2", SinkError::throttled("slow down")));
    let (processor, dead_letter) = processor_with(sink.clone());

    let batch = BatchBuilder::new(SHARD, 1)
        .reading("s1", "t1")
        .reading("s2", "t2")
        .reading("s3", "t3")
        .build();
    let state = initial_state(SHARD);

    let result = processor.process(&batch, &state).await;

    assert!(result.transient_failure);
    assert_eq!(result.checkpoint, state.checkpoint);
    assert!(matches!(
        result.error,
        Some(ProcessorError::RetriesExhausted { attempts: 3, .. })
    ));

    let calls_for_s2 = sink
        .get_upsert_calls()
        .iter()
        .filter(|call| call.key.id == "s2")
        .count();
    assert_eq!(calls_for_s2, 3);
    // The record after the failing one is not attempted.
    assert!(sink.get(&ItemKey::new("s3", "t3")).is_none());
    // Transient failures are never dead-lettered.
    assert!(dead_letter.is_empty());
}

/// Transient errors that clear within the attempt budget do not fail the batch.
#[tokio::test]
async fn test_transient_failure_recovers_within_budget() {
    let sink = Arc::new(MockRecordSink::new().with_errors(SinkError::timeout("deadline exceeded"), 2));
    let (processor, _) = processor_with(sink.clone());

    let batch = BatchBuilder::new(SHARD, 1).reading("s1", "t1").build();
    let result = processor.process(&batch, &initial_state(SHARD)).await;

    assert!(result.is_success());
    assert_eq!(sink.upsert_call_count(), 3);
    assert_eq!(sink.len(), 1);
}

/// The retry-after hint from a throttled store is honored.
#[tokio::test(start_paused = true)]
async fn test_retry_after_hint_is_honored() {
    let sink = Arc::new(MockRecordSink::new().with_response(Err(SinkError::throttled_with_retry_after(
        "slow down",
        Duration::from_millis(750),
    ))));
    let processor = BatchProcessor::new(SensorTransform, sink.clone());

    let started = tokio::time::Instant::now();
    let batch = BatchBuilder::new(SHARD, 1).reading("s1", "t1").build();
    let result = processor.process(&batch, &initial_state(SHARD)).await;

    assert!(result.is_success());
    assert!(started.elapsed() >= Duration::from_millis(750));
}

// =============================================================================
// Invocation timeout
// =============================================================================

/// Exceeding the invocation timeout is a transient failure; writes that
/// completed before the timeout stay in the store.
#[tokio::test(start_paused = true)]
async fn test_invocation_timeout_reports_transient_failure() {
    let sink = Arc::new(MockRecordSink::new().with_delay(Duration::from_secs(12)));
    let processor = BatchProcessor::new(SensorTransform, sink.clone());

    let batch = BatchBuilder::new(SHARD, 1)
        .reading("s1", "t1")
        .reading("s2", "t2")
        .reading("s3", "t3")
        .build();
    let result = processor.process(&batch, &initial_state(SHARD)).await;

    assert!(result.transient_failure);
    assert!(matches!(result.error, Some(ProcessorError::InvocationTimeout { .. })));
    assert_eq!(result.checkpoint, Checkpoint::initial());
    assert_eq!(sink.len(), 2);
}

// =============================================================================
// Ordering and checkpoints
// =============================================================================

/// Writes within a partition happen in sequence order.
#[tokio::test]
async fn test_writes_follow_sequence_order() {
    let sink = Arc::new(MockRecordSink::new());
    let (processor, _) = processor_with(sink.clone());

    let batch = BatchBuilder::new(SHARD, 100)
        .reading("c", "t1")
        .reading("a", "t2")
        .reading("b", "t3")
        .build();
    processor.process(&batch, &initial_state(SHARD)).await;

    let ids: Vec<_> = sink.committed_keys().into_iter().map(|key| key.id).collect();
    assert_eq!(ids, vec!["c", "a", "b"]);
}

/// A redelivered batch that overlaps the checkpoint only writes the new records.
#[tokio::test]
async fn test_overlapping_redelivery_skips_processed_records() {
    let sink = Arc::new(MockRecordSink::new());
    let (processor, _) = processor_with(sink.clone());
    let state = PartitionState::new(PartitionId::from(SHARD), Checkpoint::at(SequenceNumber::from_u64(2)));

    let batch = BatchBuilder::new(SHARD, 1)
        .reading("s1", "t1")
        .reading("s2", "t2")
        .reading("s3", "t3")
        .build();
    let result = processor.process(&batch, &state).await;

    assert!(result.is_success());
    assert_eq!(result.skipped, 2);
    assert_eq!(sink.upsert_call_count(), 1);
    assert_eq!(result.checkpoint, Checkpoint::at(SequenceNumber::from_u64(3)));
}

/// An out-of-order batch is rejected as a whole.
#[tokio::test]
async fn test_out_of_order_batch_is_rejected() {
    let sink = Arc::new(MockRecordSink::new());
    let (processor, _) = processor_with(sink.clone());

    let mut batch = BatchBuilder::new(SHARD, 1).reading("s1", "t1").reading("s2", "t2").build();
    batch.swap(0, 1);

    let result = processor.process(&batch, &initial_state(SHARD)).await;

    assert!(result.transient_failure);
    assert!(matches!(result.error, Some(ProcessorError::Ordering { .. })));
    assert_eq!(sink.upsert_call_count(), 0);
}

/// Metrics reflect each processed batch.
#[tokio::test]
async fn test_metrics_snapshot_after_batches() {
    let sink = Arc::new(MockRecordSink::new());
    let (processor, _) = processor_with(sink.clone());

    let batch = BatchBuilder::new(SHARD, 1).reading("s1", "t1").garbage().build();
    processor.process(&batch, &initial_state(SHARD)).await;

    let snapshot = processor.metrics().snapshot();
    assert_eq!(snapshot.invocations, 1);
    assert_eq!(snapshot.records_succeeded, 1);
    assert_eq!(snapshot.permanent_failures, 1);
    assert_eq!(snapshot.batch_failures, 0);
}
