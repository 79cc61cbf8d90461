//! Builders for records and batches.
//!
//! All timestamps are fixed so that items built from these records are
//! reproducible across test runs.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Value};

use stream_batch_processor::{PartitionId, RawRecord, SequenceNumber};

/// The arrival timestamp used by every builder: 2024-05-01T12:00:00Z.
pub fn fixed_arrival() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// Encodes a sensor reading payload.
pub fn sensor_payload(sensor_id: &str, timestamp: &str, temperature: f64) -> Vec<u8> {
    json!({
        "sensor_id": sensor_id,
        "temperature": temperature,
        "humidity": 45.0,
        "pressure": 1013.25,
        "battery": 88.0,
        "timestamp": timestamp,
    })
    .to_string()
    .into_bytes()
}

/// Builds a record carrying a sensor reading.
pub fn sensor_record(partition: &str, seq: u64, sensor_id: &str, timestamp: &str) -> RawRecord {
    RecordBuilder::new(partition, seq)
        .partition_key(sensor_id)
        .data(sensor_payload(sensor_id, timestamp, 21.5))
        .build()
}

/// Builds a record whose payload cannot be decoded.
pub fn garbage_record(partition: &str, seq: u64) -> RawRecord {
    RecordBuilder::new(partition, seq).data(b"{not json".to_vec()).build()
}

/// Fluent builder for a single [`RawRecord`].
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    partition_id: PartitionId,
    partition_key: String,
    sequence_number: SequenceNumber,
    data: Vec<u8>,
    arrival_timestamp: DateTime<Utc>,
}

impl RecordBuilder {
    /// Starts a record at `seq` in `partition` with an empty JSON object payload.
    pub fn new(partition: &str, seq: u64) -> Self {
        Self {
            partition_id: PartitionId::from(partition),
            partition_key: "key".to_string(),
            sequence_number: SequenceNumber::from_u64(seq),
            data: b"{}".to_vec(),
            arrival_timestamp: fixed_arrival(),
        }
    }

    /// Sets the partition key.
    pub fn partition_key(mut self, partition_key: impl Into<String>) -> Self {
        self.partition_key = partition_key.into();
        self
    }

    /// Sets the raw payload.
    pub fn data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = data.into();
        self
    }

    /// Sets a JSON payload.
    pub fn json(mut self, value: Value) -> Self {
        self.data = value.to_string().into_bytes();
        self
    }

    /// Sets the arrival timestamp.
    pub fn arrival(mut self, arrival_timestamp: DateTime<Utc>) -> Self {
        self.arrival_timestamp = arrival_timestamp;
        self
    }

    /// Builds the record.
    pub fn build(self) -> RawRecord {
        RawRecord::new(
            self.partition_id,
            self.partition_key,
            self.sequence_number,
            self.data,
            self.arrival_timestamp,
        )
    }
}

/// Builds an ordered batch for one partition with consecutive sequence numbers.
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    partition: String,
    next_sequence: u64,
    records: Vec<RawRecord>,
}

impl BatchBuilder {
    /// Starts a batch in `partition` whose first record has sequence `first_sequence`.
    pub fn new(partition: &str, first_sequence: u64) -> Self {
        Self {
            partition: partition.to_string(),
            next_sequence: first_sequence,
            records: Vec::new(),
        }
    }

    /// Appends a sensor reading.
    pub fn reading(self, sensor_id: &str, timestamp: &str) -> Self {
        let record = sensor_record(&self.partition, self.next_sequence, sensor_id, timestamp);
        self.push(record)
    }

    /// Appends an undecodable record.
    pub fn garbage(self) -> Self {
        let record = garbage_record(&self.partition, self.next_sequence);
        self.push(record)
    }

    /// Appends a record with an arbitrary payload.
    pub fn payload(self, data: impl Into<Vec<u8>>) -> Self {
        let record = RecordBuilder::new(&self.partition, self.next_sequence)
            .data(data)
            .build();
        self.push(record)
    }

    fn push(mut self, record: RawRecord) -> Self {
        self.next_sequence += 1;
        self.records.push(record);
        self
    }

    /// Returns the records.
    pub fn build(self) -> Vec<RawRecord> {
        self.records
    }
}
