//! Record sinks: keyed upsert into the store.
//!
//! This module defines the [`RecordSink`] trait and its implementations. A
//! sink treats `(id, timestamp)` as the only uniqueness constraint and
//! overwrites on a duplicate key, which is what makes redelivery safe.

pub mod dynamodb;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::types::{ItemKey, ProcessedItem};

pub use dynamodb::DynamoDbSink;
pub use memory::MemorySink;

/// Trait for writing processed items to the keyed store.
///
/// This trait abstracts the store, allowing for different implementations
/// (e.g., DynamoDB, an in-memory map for local runs and tests).
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Inserts `item` under `key`, overwriting any existing item.
    ///
    /// # Arguments
    ///
    /// * `key` - The composite key; always equal to `item.key()`
    /// * `item` - The item to write
    ///
    /// # Returns
    ///
    /// `Ok(())` once the write is durable, or a transient/permanent [`SinkError`].
    async fn upsert(&self, key: &ItemKey, item: &ProcessedItem) -> Result<(), SinkError>;
}

/// Type alias for a shared record sink.
pub type SharedRecordSink = Arc<dyn RecordSink>;
