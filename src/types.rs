//! Domain types for the stream batch processor.
//!
//! This module provides the identifiers and records that flow through the
//! processor: partition ids, sequence numbers, checkpoints, raw records read
//! from the stream and processed items written to the store.
//!
//! # Example
//!
//! ```rust
//! use stream_batch_processor::types::{Checkpoint, PartitionId, SequenceNumber};
//!
//! let partition = PartitionId::from("shardId-000000000000");
//! let seq = SequenceNumber::new("49545115243490985018280067714973144582180062593244200961").unwrap();
//!
//! let checkpoint = Checkpoint::at(seq.clone());
//! assert!(checkpoint.covers(&seq));
//! assert!(!Checkpoint::initial().covers(&seq));
//! # let _ = partition;
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Error returned when newtype validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The type name that failed validation
    pub type_name: &'static str,
    /// Description of the validation failure
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Identifier of a partition (shard) of the record source.
///
/// Ordering is only guaranteed between records that share a `PartitionId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionId(String);

impl PartitionId {
    /// Creates a new `PartitionId` with validation.
    ///
    /// Returns an error if the value is empty.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError {
                type_name: "PartitionId",
                message: "value cannot be empty".to_string(),
            });
        }
        Ok(Self(id))
    }

    /// Returns a reference to the inner string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Deref for PartitionId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PartitionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for PartitionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PartitionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Position of a record within its partition.
///
/// Kinesis sequence numbers are decimal strings that can exceed 128 bits, so
/// they are kept as strings and compared numerically: a longer number (after
/// leading zeros are stripped) is always greater.
///
/// ```rust
/// use stream_batch_processor::types::SequenceNumber;
///
/// let a = SequenceNumber::new("9").unwrap();
/// let b = SequenceNumber::new("10").unwrap();
/// assert!(a < b);
/// assert!(SequenceNumber::new("12a").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SequenceNumber(String);

impl SequenceNumber {
    /// Creates a new `SequenceNumber`, rejecting empty and non-decimal values.
    pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
        let value = value.into();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError {
                type_name: "SequenceNumber",
                message: format!("'{}' is not a decimal sequence number", value),
            });
        }
        Ok(Self(value))
    }

    /// Creates a sequence number from an integer position.
    pub fn from_u64(value: u64) -> Self {
        Self(value.to_string())
    }

    /// Returns a reference to the inner string.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn significant_digits(&self) -> &str {
        let trimmed = self.0.trim_start_matches('0');
        if trimmed.is_empty() {
            "0"
        } else {
            trimmed
        }
    }
}

impl PartialEq for SequenceNumber {
    fn eq(&self, other: &Self) -> bool {
        self.significant_digits() == other.significant_digits()
    }
}

impl Eq for SequenceNumber {}

impl std::hash::Hash for SequenceNumber {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.significant_digits().hash(state);
    }
}

impl Ord for SequenceNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        let a = self.significant_digits();
        let b = other.significant_digits();
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    }
}

impl PartialOrd for SequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SequenceNumber {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SequenceNumber> for String {
    fn from(value: SequenceNumber) -> Self {
        value.0
    }
}

/// Per-partition cursor: the last sequence number that was fully processed.
///
/// `None` means nothing has been processed yet and reading starts at the
/// oldest retained record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The last fully processed sequence number
    pub sequence_number: Option<SequenceNumber>,
}

impl Checkpoint {
    /// The checkpoint of a partition that has not processed anything.
    pub fn initial() -> Self {
        Self::default()
    }

    /// A checkpoint positioned at the given sequence number.
    pub fn at(sequence_number: SequenceNumber) -> Self {
        Self {
            sequence_number: Some(sequence_number),
        }
    }

    /// Returns true if the record at `sequence_number` is already processed.
    pub fn covers(&self, sequence_number: &SequenceNumber) -> bool {
        self.sequence_number
            .as_ref()
            .map(|cp| sequence_number <= cp)
            .unwrap_or(false)
    }

    /// Returns whichever checkpoint is further along.
    pub fn max(self, other: Checkpoint) -> Checkpoint {
        match (&self.sequence_number, &other.sequence_number) {
            (Some(a), Some(b)) if b > a => other,
            (None, Some(_)) => other,
            _ => self,
        }
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sequence_number {
            Some(seq) => write!(f, "{}", seq),
            None => write!(f, "TRIM_HORIZON"),
        }
    }
}

/// Explicit per-partition state, owned by whoever drives the partition.
///
/// It is passed into each batch call and a new value is returned; there is
/// no shared "current checkpoint" anywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionState {
    /// The partition this state belongs to
    pub partition_id: PartitionId,
    /// The committed checkpoint
    pub checkpoint: Checkpoint,
    /// Number of batches that completed and were acknowledged
    pub batches_committed: u64,
    /// Number of records that reached a terminal state in committed batches
    pub records_committed: u64,
}

impl PartitionState {
    /// Creates the state of a partition resuming from `checkpoint`.
    pub fn new(partition_id: PartitionId, checkpoint: Checkpoint) -> Self {
        Self {
            partition_id,
            checkpoint,
            batches_committed: 0,
            records_committed: 0,
        }
    }

    /// Returns the state after a batch of `records` was committed at `checkpoint`.
    pub fn advance(self, checkpoint: Checkpoint, records: u64) -> Self {
        Self {
            checkpoint: self.checkpoint.max(checkpoint),
            batches_committed: self.batches_committed + 1,
            records_committed: self.records_committed + records,
            ..self
        }
    }
}

/// An entry read from the partitioned log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// The partition (shard) the record was read from
    pub partition_id: PartitionId,
    /// The producer-supplied partition key
    pub partition_key: String,
    /// Position of the record within its partition
    pub sequence_number: SequenceNumber,
    /// Opaque payload bytes
    #[serde(with = "payload_base64")]
    pub data: Vec<u8>,
    /// When the log accepted the record
    pub arrival_timestamp: DateTime<Utc>,
}

impl RawRecord {
    /// Creates a new RawRecord.
    pub fn new(
        partition_id: impl Into<PartitionId>,
        partition_key: impl Into<String>,
        sequence_number: SequenceNumber,
        data: impl Into<Vec<u8>>,
        arrival_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            partition_id: partition_id.into(),
            partition_key: partition_key.into(),
            sequence_number,
            data: data.into(),
            arrival_timestamp,
        }
    }
}

mod payload_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Composite key of a processed item. The store treats it as the sole
/// uniqueness constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemKey {
    /// Logical source identifier (hash key)
    pub id: String,
    /// Time component (range key)
    pub timestamp: String,
}

impl ItemKey {
    /// Creates a new ItemKey.
    pub fn new(id: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Checks that both key attributes are present.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError {
                type_name: "ItemKey",
                message: "id cannot be empty".to_string(),
            });
        }
        if self.timestamp.is_empty() {
            return Err(ValidationError {
                type_name: "ItemKey",
                message: "timestamp cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.id, self.timestamp)
    }
}

/// The derived entity written to the store.
///
/// Serializes flat: `id`, `timestamp` and every derived field at the top level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedItem {
    /// Logical source identifier
    pub id: String,
    /// Time component of the composite key
    pub timestamp: String,
    /// Derived fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ProcessedItem {
    /// Creates an item with no derived fields.
    pub fn new(id: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: timestamp.into(),
            fields: Map::new(),
        }
    }

    /// Adds a derived field, replacing any previous value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns the composite key of this item.
    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.id.clone(), self.timestamp.clone())
    }

    /// Returns a derived field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}
