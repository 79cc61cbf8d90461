//! Configuration for the batch processor.
//!
//! All settings come from the environment (the Lambda function configuration)
//! and fall back to the defaults below when unset:
//!
//! | Variable                   | Default | Meaning                                      |
//! |----------------------------|---------|----------------------------------------------|
//! | `TABLE_NAME`               | none    | Target sink identifier (required)            |
//! | `MAX_BATCH_SIZE`           | 100     | Maximum records per batch                    |
//! | `MAX_BATCH_WAIT_MS`        | 1000    | Maximum wait while collecting a batch        |
//! | `RECORD_MAX_ATTEMPTS`      | 3       | Upsert attempts per record before escalating |
//! | `RETRY_INITIAL_DELAY_MS`   | 100     | First backoff delay                          |
//! | `RETRY_MAX_DELAY_MS`       | 2000    | Backoff delay cap                            |
//! | `RETRY_BACKOFF_MULTIPLIER` | 2.0     | Growth factor between attempts               |
//! | `INVOCATION_TIMEOUT_MS`    | 30000   | Overall bound on one batch invocation        |
//! | `REDELIVERY_MAX_BACKOFF_MS`| 10000   | Cap on the pause after a failed batch        |
//! | `DEAD_LETTER_ENABLED`      | true    | Route permanent failures to the dead letter  |
//! | `LOG_FORMAT`               | text    | `text` or `json`                             |
//!
//! `MAX_BATCH_SIZE` and `MAX_BATCH_WAIT_MS` drive pull-mode consumers only. In
//! push mode the batch size and batching window are settings of the event
//! source mapping, and the Lambda binary ignores them.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProcessorError, ProcessorResult, SinkError};

/// Decides whether and when a failed upsert is attempted again.
pub trait RetryStrategy: Send + Sync {
    /// Returns the delay before the next attempt, or None if no more attempts.
    ///
    /// `attempt` is the number of attempts already made (starting at 1).
    fn next_delay(&self, attempt: u32, error: &SinkError) -> Option<Duration>;

    /// Clone the retry strategy into a boxed trait object.
    fn clone_box(&self) -> Box<dyn RetryStrategy>;
}

impl Clone for Box<dyn RetryStrategy> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl std::fmt::Debug for dyn RetryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RetryStrategy")
    }
}

/// Bounded exponential backoff for per-record upsert retries.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use stream_batch_processor::config::{RetryConfig, RetryStrategy};
/// use stream_batch_processor::SinkError;
///
/// let backoff = RetryConfig::default();
/// let err = SinkError::throttled("slow down");
///
/// assert_eq!(backoff.next_delay(1, &err), Some(Duration::from_millis(100)));
/// assert_eq!(backoff.next_delay(2, &err), Some(Duration::from_millis(200)));
/// assert_eq!(backoff.next_delay(3, &err), None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per record, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2_000),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Sets the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// Sets the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Computes the backoff for the given attempt, ignoring any hint.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    fn validate(&self) -> ProcessorResult<()> {
        if self.max_attempts == 0 {
            return Err(ProcessorError::config("RECORD_MAX_ATTEMPTS must be at least 1"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ProcessorError::config(
                "RETRY_BACKOFF_MULTIPLIER must be a finite number >= 1.0",
            ));
        }
        if self.initial_delay > self.max_delay {
            return Err(ProcessorError::config(
                "RETRY_INITIAL_DELAY_MS must not exceed RETRY_MAX_DELAY_MS",
            ));
        }
        Ok(())
    }
}

impl RetryStrategy for RetryConfig {
    fn next_delay(&self, attempt: u32, error: &SinkError) -> Option<Duration> {
        if !error.is_transient() || attempt >= self.max_attempts {
            return None;
        }
        let delay = error
            .retry_after()
            .map(|hint| hint.min(self.max_delay))
            .unwrap_or_else(|| self.backoff(attempt));
        Some(delay)
    }

    fn clone_box(&self) -> Box<dyn RetryStrategy> {
        Box::new(self.clone())
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event, for log aggregation.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ProcessorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ProcessorError::config(format!(
                "LOG_FORMAT must be 'text' or 'json', got '{}'",
                other
            ))),
        }
    }
}

/// Complete processor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Identifier of the target sink (the table name).
    pub sink_name: String,
    /// Maximum number of records in one batch.
    pub max_batch_size: usize,
    /// Maximum time spent collecting a batch.
    pub max_batch_wait: Duration,
    /// Per-record retry policy.
    pub retry: RetryConfig,
    /// Overall bound on one batch invocation.
    pub invocation_timeout: Duration,
    /// Cap on the pause between redeliveries of a failed batch.
    pub redelivery_max_backoff: Duration,
    /// Whether permanent failures go to the dead-letter path.
    pub dead_letter_enabled: bool,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            sink_name: String::new(),
            max_batch_size: 100,
            max_batch_wait: Duration::from_secs(1),
            retry: RetryConfig::default(),
            invocation_timeout: Duration::from_secs(30),
            redelivery_max_backoff: Duration::from_secs(10),
            dead_letter_enabled: true,
            log_format: LogFormat::default(),
        }
    }
}

impl ProcessorConfig {
    /// Creates a configuration with defaults for the given sink.
    pub fn new(sink_name: impl Into<String>) -> Self {
        Self {
            sink_name: sink_name.into(),
            ..Default::default()
        }
    }

    /// Sets the maximum batch size.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Sets the maximum batch wait.
    pub fn with_max_batch_wait(mut self, max_batch_wait: Duration) -> Self {
        self.max_batch_wait = max_batch_wait;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the invocation timeout.
    pub fn with_invocation_timeout(mut self, invocation_timeout: Duration) -> Self {
        self.invocation_timeout = invocation_timeout;
        self
    }

    /// Sets the redelivery backoff cap.
    pub fn with_redelivery_max_backoff(mut self, redelivery_max_backoff: Duration) -> Self {
        self.redelivery_max_backoff = redelivery_max_backoff;
        self
    }

    /// Enables or disables the dead-letter path.
    pub fn with_dead_letter(mut self, enabled: bool) -> Self {
        self.dead_letter_enabled = enabled;
        self
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> ProcessorResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value. Unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> ProcessorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let sink_name = read("TABLE_NAME")
            .ok_or_else(|| ProcessorError::config("TABLE_NAME must be set"))?;

        let retry = RetryConfig {
            max_attempts: parse_or(read("RECORD_MAX_ATTEMPTS"), "RECORD_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            initial_delay: millis_or(read("RETRY_INITIAL_DELAY_MS"), "RETRY_INITIAL_DELAY_MS", defaults.retry.initial_delay)?,
            max_delay: millis_or(read("RETRY_MAX_DELAY_MS"), "RETRY_MAX_DELAY_MS", defaults.retry.max_delay)?,
            multiplier: parse_or(read("RETRY_BACKOFF_MULTIPLIER"), "RETRY_BACKOFF_MULTIPLIER", defaults.retry.multiplier)?,
        };

        let config = Self {
            sink_name: sink_name.trim().to_string(),
            max_batch_size: parse_or(read("MAX_BATCH_SIZE"), "MAX_BATCH_SIZE", defaults.max_batch_size)?,
            max_batch_wait: millis_or(read("MAX_BATCH_WAIT_MS"), "MAX_BATCH_WAIT_MS", defaults.max_batch_wait)?,
            retry,
            invocation_timeout: millis_or(read("INVOCATION_TIMEOUT_MS"), "INVOCATION_TIMEOUT_MS", defaults.invocation_timeout)?,
            redelivery_max_backoff: millis_or(
                read("REDELIVERY_MAX_BACKOFF_MS"),
                "REDELIVERY_MAX_BACKOFF_MS",
                defaults.redelivery_max_backoff,
            )?,
            dead_letter_enabled: match read("DEAD_LETTER_ENABLED") {
                Some(value) => parse_bool(&value, "DEAD_LETTER_ENABLED")?,
                None => defaults.dead_letter_enabled,
            },
            log_format: match read("LOG_FORMAT") {
                Some(value) => value.parse()?,
                None => defaults.log_format,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values the processor cannot work with.
    pub fn validate(&self) -> ProcessorResult<()> {
        if self.sink_name.is_empty() {
            return Err(ProcessorError::config("TABLE_NAME must not be empty"));
        }
        if self.max_batch_size == 0 {
            return Err(ProcessorError::config("MAX_BATCH_SIZE must be at least 1"));
        }
        if self.max_batch_wait.is_zero() {
            return Err(ProcessorError::config("MAX_BATCH_WAIT_MS must be at least 1"));
        }
        if self.invocation_timeout.is_zero() {
            return Err(ProcessorError::config("INVOCATION_TIMEOUT_MS must be positive"));
        }
        self.retry.validate()
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> ProcessorResult<T> {
    match value {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            ProcessorError::config(format!("{} has an invalid value: '{}'", key, raw))
        }),
        None => Ok(default),
    }
}

fn millis_or(value: Option<String>, key: &str, default: Duration) -> ProcessorResult<Duration> {
    match value {
        Some(_) => parse_or(value, key, 0u64).map(Duration::from_millis),
        None => Ok(default),
    }
}

fn parse_bool(value: &str, key: &str) -> ProcessorResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ProcessorError::config(format!(
            "{} must be a boolean, got '{}'",
            key, value
        ))),
    }
}
