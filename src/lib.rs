//! # Stream Batch Processor
//!
//! Ordered, at-least-once processing of partitioned stream records (Kinesis
//! shards) into a keyed store (DynamoDB), with per-record fault isolation.
//!
//! ## Overview
//!
//! Records arrive in batches from one partition at a time. Each record is
//! decoded, transformed into an item keyed by `(id, timestamp)` and upserted.
//! A batch is acknowledged as a whole or not at all:
//!
//! - **Permanent failures** (undecodable payloads, items the store rejects)
//!   are isolated to the record and routed to a dead-letter path. They never
//!   block the rest of the batch.
//! - **Transient failures** (throttling, timeouts, network faults) are
//!   retried in-process with exponential backoff. When retries run out, the
//!   batch fails, the checkpoint does not move and the source redelivers it.
//! - **Idempotence** makes redelivery safe: the transform is deterministic and
//!   the store overwrites on a duplicate key, so processing a batch twice
//!   leaves the same state as processing it once.
//!
//! Checkpoints are explicit values ([`PartitionState`]) passed into and
//! returned from each batch; there is no shared "current position".
//!
//! ## Getting Started
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::Utc;
//! use stream_batch_processor::{
//!     BatchProcessor, Checkpoint, MemorySink, PartitionId, PartitionState, RawRecord,
//!     SensorTransform, SequenceNumber,
//! };
//!
//! # tokio_test::block_on(async {
//! let sink = Arc::new(MemorySink::new());
//! let processor = BatchProcessor::new(SensorTransform, sink.clone());
//!
//! let batch = vec![RawRecord::new(
//!     "shardId-000000000000",
//!     "sensor-1",
//!     SequenceNumber::from_u64(1),
//!     br#"{"sensor_id":"sensor-1","temperature":-3.5,"timestamp":"2024-05-01T12:00:00Z"}"#.to_vec(),
//!     Utc::now(),
//! )];
//! let state = PartitionState::new(PartitionId::from("shardId-000000000000"), Checkpoint::initial());
//!
//! let result = processor.process(&batch, &state).await;
//! assert!(result.is_success());
//! assert_eq!(result.succeeded, 1);
//!
//! let state = state.advance(result.checkpoint.clone(), result.processed() as u64);
//! assert_eq!(state.checkpoint, Checkpoint::at(SequenceNumber::from_u64(1)));
//! assert_eq!(sink.len(), 1);
//! # });
//! ```
//!
//! ## Modes
//!
//! - **Push** ([`lambda`]): a Kinesis trigger hands the batch to a Lambda
//!   function; the platform owns the checkpoint and retries the whole event
//!   when the handler returns an error.
//! - **Pull** ([`consumer`]): a [`Pipeline`] runs one [`ShardConsumer`] per
//!   partition of a [`RecordSource`], committing checkpoints itself.
//!
//! ## Module Organization
//!
//! - [`config`]: Environment-driven configuration and retry strategies
//! - [`consumer`]: Shard consumers and the multi-partition pipeline
//! - [`dead_letter`]: Dead-letter sinks for permanently failed records
//! - [`error`]: Error types and classification
//! - [`lambda`]: Kinesis trigger integration
//! - [`logging`]: Tracing subscriber setup
//! - [`metrics`]: Operational counters
//! - [`processor`]: The batch processor
//! - [`simulator`]: Sensor data generator for load testing
//! - [`sink`]: Keyed stores (DynamoDB, in-memory)
//! - [`source`]: Partitioned logs (in-memory)
//! - [`transform`]: Decoding and the sensor transform
//! - [`types`]: Identifiers, checkpoints and records

pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod error;
pub mod lambda;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod simulator;
pub mod sink;
pub mod source;
pub mod transform;
pub mod types;

// Re-export main types at crate root
pub use config::{LogFormat, ProcessorConfig, RetryConfig, RetryStrategy};
pub use consumer::{BatchOutcome, ConsumerConfig, Pipeline, ShardConsumer};
pub use dead_letter::{
    create_dead_letter_queue, ChannelDeadLetter, DeadLetter, DeadLetterSink, LoggingDeadLetter,
    SharedDeadLetterSink,
};
pub use error::{ErrorObject, ProcessorError, ProcessorResult, SinkError};
pub use lambda::{BatchSummary, KinesisBatchHandler};
pub use metrics::{MetricsSnapshot, ProcessorMetrics};
pub use processor::{BatchProcessor, BatchResult, PermanentFailure};
pub use sink::{DynamoDbSink, MemorySink, RecordSink, SharedRecordSink};
pub use source::{MemoryStream, RecordBatch, RecordSource, SharedRecordSource};
pub use transform::{Category, RecordTransform, SensorReading, SensorTransform};
pub use types::{
    Checkpoint, ItemKey, PartitionId, PartitionState, ProcessedItem, RawRecord, SequenceNumber,
};
