//! Decoding and transformation of raw records into processed items.
//!
//! A [`RecordTransform`] has two halves. [`decode`](RecordTransform::decode)
//! may fail, and its failures are permanent for the record.
//! [`transform`](RecordTransform::transform) cannot fail and must be pure:
//! the same record always yields the same item, which is what makes
//! redelivery safe.
//!
//! Neither half may read the wall clock or a random source. Values that would
//! normally come from those (an item UUID, a processing timestamp) are derived
//! from the record itself, see [`record_uuid`].

use blake2::{Blake2b512, Digest};
use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{ProcessorError, ProcessorResult};
use crate::types::{ProcessedItem, RawRecord};

/// Temperature above which a reading is categorized as `hot`.
pub const HOT_THRESHOLD: f64 = 30.0;

/// Temperature below which a reading is categorized as `cold`.
pub const COLD_THRESHOLD: f64 = 10.0;

/// Turns raw records into items for the store.
pub trait RecordTransform: Send + Sync {
    /// The decoded form of a payload.
    type Decoded;

    /// Decodes and validates the payload of `record`.
    fn decode(&self, record: &RawRecord) -> ProcessorResult<Self::Decoded>;

    /// Derives the processed item. Must be deterministic.
    fn transform(&self, decoded: Self::Decoded, record: &RawRecord) -> ProcessedItem;

    /// Decodes and transforms in one step.
    fn apply(&self, record: &RawRecord) -> ProcessorResult<ProcessedItem> {
        let decoded = self.decode(record)?;
        Ok(self.transform(decoded, record))
    }
}

/// A reading emitted by a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Logical source identifier
    pub sensor_id: String,
    /// Degrees Celsius
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Relative humidity, percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    /// Hectopascal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    /// Battery level, percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    /// Producer-side timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Any other fields, carried through to the item
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SensorReading {
    fn validate(&self) -> ProcessorResult<()> {
        if self.sensor_id.trim().is_empty() {
            return Err(ProcessorError::decode("sensor_id must not be empty"));
        }
        for (name, value) in [
            ("temperature", self.temperature),
            ("humidity", self.humidity),
            ("pressure", self.pressure),
            ("battery", self.battery),
        ] {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(ProcessorError::decode(format!("{} must be a finite number", name)));
                }
            }
        }
        if matches!(self.timestamp.as_deref(), Some(ts) if ts.trim().is_empty()) {
            return Err(ProcessorError::decode("timestamp must not be empty when present"));
        }
        Ok(())
    }
}

/// Temperature category of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Above [`HOT_THRESHOLD`]
    Hot,
    /// Below [`COLD_THRESHOLD`]
    Cold,
    /// Everything in between
    Normal,
}

impl Category {
    /// Categorizes a temperature.
    pub fn from_temperature(temperature: f64) -> Self {
        if temperature > HOT_THRESHOLD {
            Self::Hot
        } else if temperature < COLD_THRESHOLD {
            Self::Cold
        } else {
            Self::Normal
        }
    }

    /// Returns the stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Cold => "cold",
            Self::Normal => "normal",
        }
    }
}

/// The sensor pipeline transform.
///
/// Negative temperatures are clamped to zero, readings are categorized, and
/// the item is keyed by `(sensor_id, timestamp)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorTransform;

impl RecordTransform for SensorTransform {
    type Decoded = SensorReading;

    fn decode(&self, record: &RawRecord) -> ProcessorResult<SensorReading> {
        let text = std::str::from_utf8(&record.data)
            .map_err(|e| ProcessorError::decode(format!("payload is not valid UTF-8: {}", e)))?;
        let reading: SensorReading = serde_json::from_str(text)
            .map_err(|e| ProcessorError::decode(format!("payload is not a sensor reading: {}", e)))?;
        reading.validate()?;
        Ok(reading)
    }

    fn transform(&self, reading: SensorReading, record: &RawRecord) -> ProcessedItem {
        let arrival = record
            .arrival_timestamp
            .to_rfc3339_opts(SecondsFormat::Micros, true);
        let timestamp = reading.timestamp.clone().unwrap_or_else(|| arrival.clone());

        let mut fields = reading.extra;
        fields.remove("id");
        fields.remove("timestamp");

        fields.insert("sensor_id".to_string(), Value::from(reading.sensor_id.clone()));
        if let Some(temperature) = reading.temperature {
            let temperature = temperature.max(0.0);
            fields.insert("temperature".to_string(), Value::from(temperature));
            fields.insert(
                "category".to_string(),
                Value::from(Category::from_temperature(temperature).as_str()),
            );
        }
        for (name, value) in [
            ("humidity", reading.humidity),
            ("pressure", reading.pressure),
            ("battery", reading.battery),
        ] {
            if let Some(v) = value {
                fields.insert(name.to_string(), Value::from(v));
            }
        }

        fields.insert("processed_at".to_string(), Value::from(arrival));
        fields.insert(
            "record_id".to_string(),
            Value::from(record_uuid(record).to_string()),
        );
        fields.insert(
            "source".to_string(),
            json!({
                "partition_id": record.partition_id.as_str(),
                "partition_key": record.partition_key,
                "sequence_number": record.sequence_number.as_str(),
            }),
        );

        ProcessedItem {
            id: reading.sensor_id,
            timestamp,
            fields,
        }
    }
}

/// Derives a stable UUID for a record from its position in the log.
///
/// The same `(partition, sequence number)` always produces the same UUID, so
/// an item rewritten on redelivery is identical to the first write.
///
/// ```rust
/// use chrono::Utc;
/// use stream_batch_processor::transform::record_uuid;
/// use stream_batch_processor::types::{RawRecord, SequenceNumber};
///
/// let record = RawRecord::new("shard-0", "sensor-1", SequenceNumber::from_u64(7), b"{}".to_vec(), Utc::now());
/// assert_eq!(record_uuid(&record), record_uuid(&record.clone()));
/// assert_eq!(record_uuid(&record).get_version_num(), 4);
/// ```
pub fn record_uuid(record: &RawRecord) -> Uuid {
    let mut hasher = Blake2b512::new();
    hasher.update(record.partition_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(record.sequence_number.as_str().as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}
