//! Mock implementation of RecordSink for testing.
//!
//! `MockRecordSink` behaves like a keyed last-writer-wins store and can be
//! scripted to fail: a queue of responses returned in order to any upsert,
//! and per-id failures returned whenever an item with that id is written.
//!
//! # Examples
//!
//! ```
//! use stream_batch_processor_testing::MockRecordSink;
//! use stream_batch_processor::{ItemKey, ProcessedItem, RecordSink, SinkError};
//!
//! # tokio_test::block_on(async {
//! let sink = MockRecordSink::new()
//!     .with_response(Err(SinkError::throttled("slow down")));
//!
//! let item = ProcessedItem::new("sensor-1", "t1");
//! assert!(sink.upsert(&item.key(), &item).await.is_err());
//! assert!(sink.upsert(&item.key(), &item).await.is_ok());
//!
//! assert_eq!(sink.upsert_call_count(), 2);
//! assert_eq!(sink.get(&ItemKey::new("sensor-1", "t1")), Some(item));
//! # });
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use stream_batch_processor::{ItemKey, ProcessedItem, RecordSink, SinkError};

/// Record of an upsert call made to the mock sink.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertCall {
    /// The key passed to the call
    pub key: ItemKey,
    /// The item passed to the call
    pub item: ProcessedItem,
    /// Whether the call succeeded
    pub succeeded: bool,
}

/// Mock implementation of RecordSink for testing.
///
/// The mock uses internal mutexes so it can be shared between tasks.
#[derive(Debug, Default)]
pub struct MockRecordSink {
    /// Queue of responses returned to the next upserts
    responses: Mutex<VecDeque<Result<(), SinkError>>>,
    /// Errors returned for every write of an item with the given id
    failing_ids: Mutex<HashMap<String, SinkError>>,
    /// Delay applied before every upsert
    delay: Option<Duration>,
    /// Current contents of the store
    items: Mutex<BTreeMap<ItemKey, ProcessedItem>>,
    /// Record of all upsert calls made
    calls: Mutex<Vec<UpsertCall>>,
}

impl MockRecordSink {
    /// Creates a mock sink that accepts every write.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a response to be returned by the next upsert.
    ///
    /// Responses are returned in the order they were added (FIFO). Once all
    /// configured responses are consumed, writes succeed.
    pub fn with_response(self, response: Result<(), SinkError>) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    /// Adds `count` copies of `error` to the response queue.
    pub fn with_errors(self, error: SinkError, count: usize) -> Self {
        {
            let mut responses = self.responses.lock().unwrap();
            for _ in 0..count {
                responses.push_back(Err(error.clone()));
            }
        }
        self
    }

    /// Fails every write of an item whose id is `id`.
    pub fn with_failing_id(self, id: impl Into<String>, error: SinkError) -> Self {
        self.failing_ids.lock().unwrap().insert(id.into(), error);
        self
    }

    /// Delays every upsert by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Stops failing writes for `id`.
    pub fn heal(&self, id: &str) {
        self.failing_ids.lock().unwrap().remove(id);
    }

    /// Returns the item stored under `key`.
    pub fn get(&self, key: &ItemKey) -> Option<ProcessedItem> {
        self.items.lock().unwrap().get(key).cloned()
    }

    /// Returns a copy of the store contents.
    pub fn items(&self) -> BTreeMap<ItemKey, ProcessedItem> {
        self.items.lock().unwrap().clone()
    }

    /// Returns the number of distinct keys stored.
    pub fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns all recorded upsert calls.
    pub fn get_upsert_calls(&self) -> Vec<UpsertCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Returns the keys of successful writes, in the order they happened.
    pub fn committed_keys(&self) -> Vec<ItemKey> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.succeeded)
            .map(|call| call.key.clone())
            .collect()
    }

    /// Returns the number of upsert calls made.
    pub fn upsert_call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Clears recorded calls without touching the store.
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl RecordSink for MockRecordSink {
    async fn upsert(&self, key: &ItemKey, item: &ProcessedItem) -> Result<(), SinkError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.responses.lock().unwrap().pop_front();
        let result = match scripted {
            Some(response) => response,
            None => match self.failing_ids.lock().unwrap().get(&key.id) {
                Some(error) => Err(error.clone()),
                None => key.validate().map_err(|e| SinkError::permanent(e.to_string())),
            },
        };

        if result.is_ok() {
            self.items.lock().unwrap().insert(key.clone(), item.clone());
        }
        self.calls.lock().unwrap().push(UpsertCall {
            key: key.clone(),
            item: item.clone(),
            succeeded: result.is_ok(),
        });
        result
    }
}
