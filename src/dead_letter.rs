//! Dead-letter path for records that can never be processed.
//!
//! Recording a failure is fire-and-forget: [`DeadLetterSink::record_permanent_failure`]
//! is synchronous and must not wait on I/O, so a slow dead-letter destination
//! can never hold up the batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ErrorObject;
use crate::types::RawRecord;

/// A record that reached a terminal failure, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The record as it was read from the source
    pub record: RawRecord,
    /// Why the record could not be processed
    pub reason: ErrorObject,
}

impl DeadLetter {
    /// Creates a new DeadLetter.
    pub fn new(record: RawRecord, reason: ErrorObject) -> Self {
        Self { record, reason }
    }
}

/// Destination for permanently failed records.
pub trait DeadLetterSink: Send + Sync {
    /// Records a permanent failure without blocking.
    fn record_permanent_failure(&self, letter: DeadLetter);
}

/// Shared handle to a dead-letter sink.
pub type SharedDeadLetterSink = Arc<dyn DeadLetterSink>;

/// Writes dead letters to the log at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDeadLetter;

impl DeadLetterSink for LoggingDeadLetter {
    fn record_permanent_failure(&self, letter: DeadLetter) {
        tracing::error!(
            partition = %letter.record.partition_id,
            partition_key = %letter.record.partition_key,
            sequence_number = %letter.record.sequence_number,
            error_type = %letter.reason.error_type,
            error_message = %letter.reason.error_message,
            payload = %STANDARD.encode(&letter.record.data),
            "Record dead-lettered"
        );
    }
}

/// Hands dead letters to a bounded channel for an asynchronous consumer.
///
/// When the channel is full the letter is logged and counted as dropped
/// instead of waiting for capacity.
#[derive(Debug, Clone)]
pub struct ChannelDeadLetter {
    tx: mpsc::Sender<DeadLetter>,
    dropped: Arc<AtomicU64>,
}

impl ChannelDeadLetter {
    /// Returns how many letters were dropped because the channel was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl DeadLetterSink for ChannelDeadLetter {
    fn record_permanent_failure(&self, letter: DeadLetter) {
        if let Err(err) = self.tx.try_send(letter) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            let (kind, letter) = match err {
                mpsc::error::TrySendError::Full(letter) => ("full", letter),
                mpsc::error::TrySendError::Closed(letter) => ("closed", letter),
            };
            tracing::warn!(channel = kind, "Dead-letter channel unavailable, logging instead");
            LoggingDeadLetter.record_permanent_failure(letter);
        }
    }
}

/// Creates a dead-letter queue with the given capacity.
///
/// Returns the sink handed to the processor and the receiver for whatever
/// forwards letters to durable storage.
pub fn create_dead_letter_queue(capacity: usize) -> (ChannelDeadLetter, mpsc::Receiver<DeadLetter>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ChannelDeadLetter {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}
