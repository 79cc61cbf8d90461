//! Property-based tests for batch processing.
//!
//! Generated batches mix decodable readings (with colliding keys) and
//! undecodable payloads. The properties check isolation, idempotent
//! redelivery, write order and transform determinism.

mod common;

use std::sync::Arc;

use proptest::prelude::*;

use stream_batch_processor::{
    Checkpoint, MemorySink, RecordTransform, SensorTransform, SequenceNumber,
};
use stream_batch_processor_testing::MockRecordSink;

use common::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Every decodable record is written and every undecodable one is
    /// isolated; the batch succeeds and the checkpoint reaches its last record.
    #[test]
    fn prop_permanent_failures_are_isolated(kinds in batch_kinds_strategy(20)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result: Result<(), TestCaseError> = rt.block_on(async {
            let sink = Arc::new(MockRecordSink::new());
            let (processor, dead_letter) = processor_with(sink.clone());
            let batch = build_batch(SHARD, &kinds);

            let result = processor.process(&batch, &initial_state(SHARD)).await;

            let readings = kinds.iter().filter(|kind| kind.is_reading()).count();
            prop_assert!(result.is_success());
            prop_assert_eq!(result.succeeded, readings);
            prop_assert_eq!(result.permanent_failures.len(), kinds.len() - readings);
            prop_assert_eq!(dead_letter.len(), kinds.len() - readings);
            prop_assert_eq!(
                result.checkpoint,
                Checkpoint::at(SequenceNumber::from_u64(kinds.len() as u64))
            );
            Ok(())
        });
        result?;
    }

    /// Processing a batch twice leaves the store exactly as processing it once.
    #[test]
    fn prop_redelivery_is_idempotent(kinds in batch_kinds_strategy(20)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result: Result<(), TestCaseError> = rt.block_on(async {
            let sink = Arc::new(MemorySink::new());
            let (processor, _) = processor_with(sink.clone());
            let batch = build_batch(SHARD, &kinds);
            let state = initial_state(SHARD);

            let first = processor.process(&batch, &state).await;
            let once = sink.snapshot();
            // Redelivery from the old checkpoint, as after a crash before commit.
            let second = processor.process(&batch, &state).await;

            prop_assert_eq!(first.checkpoint, second.checkpoint);
            prop_assert_eq!(sink.snapshot(), once);
            Ok(())
        });
        result?;
    }

    /// The store holds, for every key, the last reading written for it in
    /// sequence order, and writes happen in sequence order.
    #[test]
    fn prop_last_writer_wins_in_sequence_order(kinds in batch_kinds_strategy(20)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result: Result<(), TestCaseError> = rt.block_on(async {
            let sink = Arc::new(MockRecordSink::new());
            let (processor, _) = processor_with(sink.clone());
            let batch = build_batch(SHARD, &kinds);

            processor.process(&batch, &initial_state(SHARD)).await;

            let expected: Vec<_> = batch
                .iter()
                .filter_map(|record| SensorTransform.apply(record).ok())
                .collect();
            let written: Vec<_> = sink
                .get_upsert_calls()
                .into_iter()
                .map(|call| call.item)
                .collect();
            prop_assert_eq!(&written, &expected);

            for item in &expected {
                let last = expected.iter().rev().find(|other| other.key() == item.key());
                let stored = sink.get(&item.key());
                prop_assert_eq!(stored.as_ref(), last);
            }
            Ok(())
        });
        result?;
    }

    /// Transforming the same record twice yields the same item.
    #[test]
    fn prop_transform_is_deterministic(kinds in batch_kinds_strategy(10)) {
        for record in build_batch(SHARD, &kinds) {
            let first = SensorTransform.apply(&record).ok();
            let second = SensorTransform.apply(&record).ok();
            prop_assert_eq!(first, second);
        }
    }

    /// Skipping records already covered by the checkpoint never rewrites them.
    #[test]
    fn prop_covered_records_are_skipped(
        kinds in batch_kinds_strategy(20),
        covered in 0u64..20,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result: Result<(), TestCaseError> = rt.block_on(async {
            let sink = Arc::new(MockRecordSink::new());
            let (processor, _) = processor_with(sink.clone());
            let batch = build_batch(SHARD, &kinds);
            let covered = covered.min(kinds.len() as u64);
            let state = stream_batch_processor::PartitionState::new(
                SHARD.into(),
                if covered == 0 {
                    Checkpoint::initial()
                } else {
                    Checkpoint::at(SequenceNumber::from_u64(covered))
                },
            );

            let result = processor.process(&batch, &state).await;

            prop_assert_eq!(result.skipped, covered as usize);
            for call in sink.get_upsert_calls() {
                let seq = call.item.field("source")
                    .and_then(|source| source.get("sequence_number"))
                    .and_then(|seq| seq.as_str())
                    .and_then(|seq| seq.parse::<u64>().ok())
                    .unwrap_or_default();
                prop_assert!(seq > covered);
            }
            Ok(())
        });
        result?;
    }
}
