//! Operational metrics.
//!
//! Counters are plain atomics shared between the processor and whoever reports
//! them. A [`MetricsSnapshot`] is emitted as one structured `tracing` event per
//! batch so log-based dashboards can chart it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cumulative counters for one processor.
#[derive(Debug, Default)]
pub struct ProcessorMetrics {
    invocations: AtomicU64,
    records_succeeded: AtomicU64,
    permanent_failures: AtomicU64,
    batch_failures: AtomicU64,
    last_duration_ms: AtomicU64,
    last_source_lag_ms: AtomicU64,
}

/// Point-in-time copy of [`ProcessorMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Batches handed to the processor
    pub invocations: u64,
    /// Records written to the sink
    pub records_succeeded: u64,
    /// Records isolated as permanent failures
    pub permanent_failures: u64,
    /// Batches that failed and will be redelivered
    pub batch_failures: u64,
    /// Duration of the most recent batch
    pub last_duration_ms: u64,
    /// Age of the oldest record of the most recent batch when processing began
    pub last_source_lag_ms: u64,
}

impl ProcessorMetrics {
    /// Creates zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a new batch invocation and records its source lag.
    pub fn record_invocation(&self, source_lag: Duration) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.last_source_lag_ms
            .store(source_lag.as_millis() as u64, Ordering::Relaxed);
    }

    /// Records the outcome of a finished batch.
    pub fn record_outcome(&self, succeeded: u64, permanent_failures: u64, failed: bool, duration: Duration) {
        self.records_succeeded.fetch_add(succeeded, Ordering::Relaxed);
        self.permanent_failures
            .fetch_add(permanent_failures, Ordering::Relaxed);
        if failed {
            self.batch_failures.fetch_add(1, Ordering::Relaxed);
        }
        self.last_duration_ms
            .store(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Returns the current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            invocations: self.invocations.load(Ordering::Relaxed),
            records_succeeded: self.records_succeeded.load(Ordering::Relaxed),
            permanent_failures: self.permanent_failures.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            last_duration_ms: self.last_duration_ms.load(Ordering::Relaxed),
            last_source_lag_ms: self.last_source_lag_ms.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Emits the snapshot as a structured log event.
    pub fn emit(&self, partition: &str) {
        tracing::info!(
            target: "stream_batch_processor::metrics",
            partition = partition,
            invocations = self.invocations,
            records_succeeded = self.records_succeeded,
            permanent_failures = self.permanent_failures,
            batch_failures = self.batch_failures,
            duration_ms = self.last_duration_ms,
            source_lag_ms = self.last_source_lag_ms,
            "Batch metrics"
        );
    }
}
