//! In-process partitioned log.
//!
//! `MemoryStream` behaves like a stream with retention that never expires:
//! records are appended per partition with increasing sequence numbers,
//! readers pull batches after a checkpoint and acknowledge them with
//! [`RecordSource::commit`].

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use super::{RecordBatch, RecordSource};
use crate::error::{ProcessorError, ProcessorResult};
use crate::types::{Checkpoint, PartitionId, RawRecord, SequenceNumber};

#[derive(Debug, Default)]
struct PartitionLog {
    records: Vec<RawRecord>,
    committed: Checkpoint,
    commits: u64,
    next_sequence: u64,
}

/// A partitioned, replayable, in-memory log.
#[derive(Debug, Default)]
pub struct MemoryStream {
    partitions: Mutex<BTreeMap<PartitionId, PartitionLog>>,
    appended: Notify,
}

impl MemoryStream {
    /// Creates a stream with the given partitions and no records.
    pub fn with_partitions<I, P>(partitions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PartitionId>,
    {
        let stream = Self::default();
        if let Ok(mut logs) = stream.partitions.lock() {
            for partition in partitions {
                logs.entry(partition.into()).or_default();
            }
        }
        stream
    }

    /// Appends a payload to `partition` and returns the stored record.
    ///
    /// The partition is created on first use. Sequence numbers start at 1.
    pub fn append(
        &self,
        partition: impl Into<PartitionId>,
        partition_key: impl Into<String>,
        data: impl Into<Vec<u8>>,
        arrival_timestamp: DateTime<Utc>,
    ) -> ProcessorResult<RawRecord> {
        let partition = partition.into();
        let record = {
            let mut logs = self.lock()?;
            let log = logs.entry(partition.clone()).or_default();
            log.next_sequence += 1;
            let record = RawRecord::new(
                partition,
                partition_key,
                SequenceNumber::from_u64(log.next_sequence),
                data,
                arrival_timestamp,
            );
            log.records.push(record.clone());
            record
        };
        self.appended.notify_waiters();
        Ok(record)
    }

    /// Appends a pre-built record, which must be after every record already
    /// in its partition.
    pub fn append_record(&self, record: RawRecord) -> ProcessorResult<()> {
        {
            let mut logs = self.lock()?;
            let log = logs.entry(record.partition_id.clone()).or_default();
            if let Some(last) = log.records.last() {
                if record.sequence_number <= last.sequence_number {
                    return Err(ProcessorError::ordering(format!(
                        "sequence {} is not after {} in partition {}",
                        record.sequence_number, last.sequence_number, record.partition_id
                    )));
                }
            }
            if let Ok(position) = record.sequence_number.as_str().parse::<u64>() {
                log.next_sequence = log.next_sequence.max(position);
            }
            log.records.push(record);
        }
        self.appended.notify_waiters();
        Ok(())
    }

    /// Returns how many commits `partition` has received.
    pub fn commit_count(&self, partition: &PartitionId) -> u64 {
        self.lock()
            .ok()
            .and_then(|logs| logs.get(partition).map(|log| log.commits))
            .unwrap_or(0)
    }

    /// Returns the records of `partition` not yet acknowledged.
    pub fn pending(&self, partition: &PartitionId) -> usize {
        self.lock()
            .ok()
            .and_then(|logs| {
                logs.get(partition).map(|log| {
                    log.records
                        .iter()
                        .filter(|r| !log.committed.covers(&r.sequence_number))
                        .count()
                })
            })
            .unwrap_or(0)
    }

    fn lock(&self) -> ProcessorResult<std::sync::MutexGuard<'_, BTreeMap<PartitionId, PartitionLog>>> {
        self.partitions
            .lock()
            .map_err(|_| ProcessorError::source_non_retriable("memory stream lock poisoned"))
    }

    fn read_after(
        &self,
        partition: &PartitionId,
        max_size: usize,
        after: &Checkpoint,
    ) -> ProcessorResult<Vec<RawRecord>> {
        let logs = self.lock()?;
        let log = logs.get(partition).ok_or_else(|| {
            ProcessorError::source_non_retriable(format!("unknown partition {}", partition))
        })?;
        Ok(log
            .records
            .iter()
            .filter(|r| !after.covers(&r.sequence_number))
            .take(max_size)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RecordSource for MemoryStream {
    async fn list_partitions(&self) -> ProcessorResult<Vec<PartitionId>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    async fn get_next_batch(
        &self,
        partition: &PartitionId,
        max_size: usize,
        max_wait: Duration,
        after: &Checkpoint,
    ) -> ProcessorResult<RecordBatch> {
        let deadline = tokio::time::Instant::now() + max_wait;

        loop {
            // Register before reading so an append between the read and the
            // wait is not missed.
            let appended = self.appended.notified();
            tokio::pin!(appended);
            appended.as_mut().enable();

            let records = self.read_after(partition, max_size.max(1), after)?;
            if let Some(last) = records.last() {
                let cursor = Checkpoint::at(last.sequence_number.clone());
                return Ok(RecordBatch {
                    partition_id: partition.clone(),
                    records,
                    cursor,
                });
            }

            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(RecordBatch::empty(partition.clone(), after.clone()));
            }
        }
    }

    async fn committed_checkpoint(&self, partition: &PartitionId) -> ProcessorResult<Checkpoint> {
        let logs = self.lock()?;
        logs.get(partition)
            .map(|log| log.committed.clone())
            .ok_or_else(|| ProcessorError::source_non_retriable(format!("unknown partition {}", partition)))
    }

    async fn commit(&self, partition: &PartitionId, checkpoint: &Checkpoint) -> ProcessorResult<()> {
        let mut logs = self.lock()?;
        let log = logs.get_mut(partition).ok_or_else(|| {
            ProcessorError::source_non_retriable(format!("unknown partition {}", partition))
        })?;

        if let Some(seq) = &checkpoint.sequence_number {
            let known = log.records.iter().any(|r| &r.sequence_number == seq);
            if !known {
                return Err(ProcessorError::source_non_retriable(format!(
                    "cannot commit {} in partition {}: no such record",
                    seq, partition
                )));
            }
        }

        log.committed = std::mem::take(&mut log.committed).max(checkpoint.clone());
        log.commits += 1;
        tracing::debug!(partition = %partition, checkpoint = %log.committed, "Checkpoint committed");
        Ok(())
    }
}
