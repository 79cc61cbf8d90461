//! Testing utilities for the stream batch processor.
//!
//! This crate provides test doubles and fixtures for exercising batch
//! processing without AWS infrastructure.
//!
//! # Features
//!
//! - **MockRecordSink**: Scriptable keyed store that records every upsert
//! - **MockRecordSource**: In-memory stream with injectable read/commit failures
//! - **RecordingDeadLetter**: Dead-letter sink that keeps what it receives
//! - **Builders**: Reproducible records and batches
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use stream_batch_processor::{BatchProcessor, Checkpoint, PartitionId, PartitionState, SensorTransform};
//! use stream_batch_processor_testing::{BatchBuilder, MockRecordSink, RecordingDeadLetter};
//!
//! # tokio_test::block_on(async {
//! let sink = Arc::new(MockRecordSink::new());
//! let dead_letter = Arc::new(RecordingDeadLetter::new());
//! let processor = BatchProcessor::new(SensorTransform, sink.clone()).with_dead_letter(dead_letter.clone());
//!
//! let batch = BatchBuilder::new("shard-0", 1).reading("s1", "t1").garbage().build();
//! let state = PartitionState::new(PartitionId::from("shard-0"), Checkpoint::initial());
//! let result = processor.process(&batch, &state).await;
//!
//! assert!(result.is_success());
//! assert_eq!(sink.len(), 1);
//! assert_eq!(dead_letter.len(), 1);
//! # });
//! ```

pub mod builders;
pub mod dead_letter;
pub mod mock_sink;
pub mod mock_source;

pub use builders::{
    fixed_arrival, garbage_record, sensor_payload, sensor_record, BatchBuilder, RecordBuilder,
};
pub use dead_letter::RecordingDeadLetter;
pub use mock_sink::{MockRecordSink, UpsertCall};
pub use mock_source::{CommitCall, MockRecordSource};

// Re-export key types from the processor crate for convenience
pub use stream_batch_processor::{
    BatchProcessor, BatchResult, Checkpoint, ItemKey, PartitionId, PartitionState, ProcessedItem,
    ProcessorError, RawRecord, RecordSink, RecordSource, SensorTransform, SequenceNumber,
    SinkError,
};
