//! Sensor data simulator.
//!
//! Produces random readings for `sensor-1..=sensor-N` and publishes one
//! reading per sensor each round, using the sensor id as the partition key so
//! every sensor's readings stay ordered within one shard.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_kinesis::primitives::Blob;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde_json::Map;
use tokio::sync::watch;

use crate::error::{ProcessorError, ProcessorResult};
use crate::transform::SensorReading;

/// How often a progress line is logged, in records.
const PROGRESS_EVERY: u64 = 50;

/// Simulation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Number of simulated sensors
    pub sensors: usize,
    /// Pause between rounds
    pub interval: Duration,
    /// Total run time
    pub duration: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            sensors: 5,
            interval: Duration::from_millis(200),
            duration: Duration::from_secs(300),
        }
    }
}

/// Counters reported when a simulation ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationStats {
    /// Readings accepted by the stream
    pub sent: u64,
    /// Readings the stream rejected
    pub failed: u64,
    /// Wall time of the run
    pub elapsed: Duration,
}

impl SimulationStats {
    /// Returns sent records per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.sent as f64 / secs
        } else {
            0.0
        }
    }
}

/// Destination for simulated readings.
#[async_trait]
pub trait ReadingPublisher: Send + Sync {
    /// Publishes one encoded reading.
    async fn publish(&self, partition_key: &str, data: Vec<u8>) -> ProcessorResult<()>;
}

/// Publishes readings to a Kinesis data stream.
#[derive(Debug, Clone)]
pub struct KinesisPublisher {
    client: aws_sdk_kinesis::Client,
    stream_name: String,
}

impl KinesisPublisher {
    /// Creates a publisher from an existing client.
    pub fn new(client: aws_sdk_kinesis::Client, stream_name: impl Into<String>) -> Self {
        Self {
            client,
            stream_name: stream_name.into(),
        }
    }

    /// Creates a publisher using credentials and region from the environment.
    pub async fn from_env(stream_name: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(aws_sdk_kinesis::Client::new(&config), stream_name)
    }
}

#[async_trait]
impl ReadingPublisher for KinesisPublisher {
    async fn publish(&self, partition_key: &str, data: Vec<u8>) -> ProcessorResult<()> {
        let output = self
            .client
            .put_record()
            .stream_name(&self.stream_name)
            .partition_key(partition_key)
            .data(Blob::new(data))
            .send()
            .await
            .map_err(|e| ProcessorError::source_retriable(format!("put_record failed: {}", e)))?;

        tracing::trace!(
            shard_id = output.shard_id(),
            sequence_number = output.sequence_number(),
            "Record published"
        );
        Ok(())
    }
}

/// Returns the ids of `count` sensors: `sensor-1`, `sensor-2`, ...
pub fn sensor_ids(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("sensor-{}", i)).collect()
}

/// Generates a random reading taken at `now`.
///
/// The temperature range goes below zero so the processor's clamping is exercised.
pub fn generate_reading<R: Rng>(rng: &mut R, sensor_id: &str, now: DateTime<Utc>) -> SensorReading {
    SensorReading {
        sensor_id: sensor_id.to_string(),
        temperature: Some(round2(rng.gen_range(-5.0..40.0))),
        humidity: Some(round2(rng.gen_range(0.0..100.0))),
        pressure: Some(round2(rng.gen_range(900.0..1100.0))),
        battery: Some(round2(rng.gen_range(0.0..100.0))),
        timestamp: Some(now.to_rfc3339_opts(SecondsFormat::Micros, true)),
        extra: Map::new(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Runs the simulation until the configured duration elapses or `shutdown`
/// becomes true.
///
/// The run stops at the first publish failure.
pub async fn simulate<P, R>(
    publisher: &P,
    config: &SimulatorConfig,
    rng: &mut R,
    mut shutdown: watch::Receiver<bool>,
) -> SimulationStats
where
    P: ReadingPublisher + ?Sized,
    R: Rng,
{
    let sensors = sensor_ids(config.sensors);
    let started = Instant::now();
    let mut stats = SimulationStats {
        sent: 0,
        failed: 0,
        elapsed: Duration::ZERO,
    };

    tracing::info!(sensors = sensors.len(), duration_s = config.duration.as_secs(), "Starting simulation");

    'rounds: while !*shutdown.borrow() && started.elapsed() < config.duration {
        for sensor_id in &sensors {
            let reading = generate_reading(rng, sensor_id, Utc::now());
            let data = match serde_json::to_vec(&reading) {
                Ok(data) => data,
                Err(error) => {
                    tracing::error!(sensor_id = %sensor_id, error = %error, "Failed to encode reading");
                    stats.failed += 1;
                    break 'rounds;
                }
            };

            if let Err(error) = publisher.publish(sensor_id, data).await {
                tracing::error!(sensor_id = %sensor_id, error = %error, "Error in simulation");
                stats.failed += 1;
                break 'rounds;
            }

            stats.sent += 1;
            if stats.sent % PROGRESS_EVERY == 0 {
                let elapsed = started.elapsed().as_secs_f64();
                tracing::info!(
                    sent = stats.sent,
                    elapsed_s = elapsed,
                    records_per_second = stats.sent as f64 / elapsed.max(f64::EPSILON),
                    "Simulation progress"
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    stats.elapsed = started.elapsed();
    stats
}
