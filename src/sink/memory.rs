//! In-memory keyed store.
//!
//! Used by local pipelines and tests. Besides the current items it keeps the
//! sequence of keys in the order they were written, so ordering guarantees
//! can be observed.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::RecordSink;
use crate::error::SinkError;
use crate::types::{ItemKey, ProcessedItem};

/// A last-writer-wins map keyed by `(id, timestamp)`.
#[derive(Debug, Default)]
pub struct MemorySink {
    items: Mutex<BTreeMap<ItemKey, ProcessedItem>>,
    write_log: Mutex<Vec<ProcessedItem>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the item stored under `key`.
    pub fn get(&self, key: &ItemKey) -> Option<ProcessedItem> {
        self.items.lock().ok()?.get(key).cloned()
    }

    /// Returns the number of distinct keys stored.
    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of the stored items.
    pub fn snapshot(&self) -> BTreeMap<ItemKey, ProcessedItem> {
        self.items
            .lock()
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    /// Returns every successful write, in the order it happened.
    pub fn write_log(&self) -> Vec<ProcessedItem> {
        self.write_log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn upsert(&self, key: &ItemKey, item: &ProcessedItem) -> Result<(), SinkError> {
        key.validate().map_err(|e| SinkError::permanent(e.to_string()))?;

        let mut items = self
            .items
            .lock()
            .map_err(|_| SinkError::unavailable("memory sink lock poisoned"))?;
        let mut log = self
            .write_log
            .lock()
            .map_err(|_| SinkError::unavailable("memory sink lock poisoned"))?;

        items.insert(key.clone(), item.clone());
        log.push(item.clone());
        Ok(())
    }
}
