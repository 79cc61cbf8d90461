//! Error types for the stream batch processor.
//!
//! Errors are split along the line that decides what happens to a batch:
//!
//! - [`SinkError`] is what a [`RecordSink`](crate::sink::RecordSink) reports for a
//!   single upsert. It is either transient (retry in-process, then escalate) or
//!   permanent (isolate the record).
//! - [`ProcessorError`] covers everything else: decode failures, escalated
//!   transient failures, invocation timeouts, source failures and configuration.
//!
//! # Type Aliases
//!
//! - [`ProcessorResult<T>`] - General result type for processor operations

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for processor operations.
pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Error returned by a record sink for a single upsert.
///
/// # Examples
///
/// ```
/// use stream_batch_processor::SinkError;
///
/// let throttled = SinkError::throttled("ProvisionedThroughputExceeded");
/// assert!(throttled.is_transient());
///
/// let bad_key = SinkError::permanent("id must not be empty");
/// assert!(!bad_key.is_transient());
/// ```
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SinkError {
    /// The store rejected the write because of throughput limits.
    #[error("Throttled: {message}")]
    Throttled {
        /// Error message from the store
        message: String,
        /// Suggested delay before retrying, if the store provided one
        retry_after: Option<Duration>,
    },

    /// The write did not complete in time.
    #[error("Timeout: {message}")]
    Timeout {
        /// Error message describing the timeout
        message: String,
    },

    /// A transient transport or service fault.
    #[error("Unavailable: {message}")]
    Unavailable {
        /// Error message describing the fault
        message: String,
    },

    /// The item can never be written as-is (malformed key, size limit, ...).
    #[error("Rejected: {message}")]
    Permanent {
        /// Error message describing why the item was rejected
        message: String,
    },
}

impl SinkError {
    /// Creates a new Throttled error with no retry hint.
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::Throttled {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Creates a new Throttled error carrying the store's retry hint.
    pub fn throttled_with_retry_after(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::Throttled {
            message: message.into(),
            retry_after: Some(retry_after),
        }
    }

    /// Creates a new Timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Creates a new Unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a new Permanent error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Returns true if retrying the same write may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Permanent { .. })
    }

    /// Returns the store-provided retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Throttled { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns the error message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Throttled { message, .. }
            | Self::Timeout { message }
            | Self::Unavailable { message }
            | Self::Permanent { message } => message,
        }
    }
}

/// The main error type for the stream batch processor.
///
/// # Examples
///
/// ```
/// use stream_batch_processor::ProcessorError;
///
/// let err = ProcessorError::decode("payload is not valid JSON");
/// assert!(err.is_permanent());
/// assert!(!err.is_retriable());
///
/// let err = ProcessorError::invocation_timeout(std::time::Duration::from_secs(30));
/// assert!(err.is_retriable());
/// ```
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The payload could not be decoded or failed validation.
    #[error("Decode error: {message}")]
    Decode {
        /// Error message describing the decode failure
        message: String,
    },

    /// The sink rejected the item permanently.
    #[error("Sink rejected item: {source}")]
    SinkRejected {
        /// The underlying sink error
        #[source]
        source: SinkError,
    },

    /// A transient sink error persisted after all in-process attempts.
    #[error("Sink retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Number of attempts made
        attempts: u32,
        /// The last sink error observed
        #[source]
        source: SinkError,
    },

    /// The batch invocation exceeded its overall timeout.
    #[error("Invocation timed out after {elapsed:?}")]
    InvocationTimeout {
        /// The configured timeout that elapsed
        elapsed: Duration,
    },

    /// The batch violates the ordering contract of the source.
    #[error("Batch ordering error: {message}")]
    Ordering {
        /// Error message describing the violation
        message: String,
    },

    /// The record source failed to deliver or acknowledge a batch.
    #[error("Source error: {message}")]
    Source {
        /// Error message describing the source failure
        message: String,
        /// Whether retrying the source call may succeed
        is_retriable: bool,
    },

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the invalid setting
        message: String,
    },
}

impl ProcessorError {
    /// Creates a new Decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a new Ordering error.
    pub fn ordering(message: impl Into<String>) -> Self {
        Self::Ordering {
            message: message.into(),
        }
    }

    /// Creates a new retriable Source error.
    pub fn source_retriable(message: impl Into<String>) -> Self {
        Self::Source {
            message: message.into(),
            is_retriable: true,
        }
    }

    /// Creates a new non-retriable Source error.
    pub fn source_non_retriable(message: impl Into<String>) -> Self {
        Self::Source {
            message: message.into(),
            is_retriable: false,
        }
    }

    /// Creates a new Config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a new InvocationTimeout error.
    pub fn invocation_timeout(elapsed: Duration) -> Self {
        Self::InvocationTimeout { elapsed }
    }

    /// Returns true if the error is isolated to a single record.
    ///
    /// Permanent errors never fail the batch; the record is dead-lettered.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::SinkRejected { .. })
    }

    /// Returns true if the whole batch should be redelivered.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::RetriesExhausted { .. }
            | Self::InvocationTimeout { .. }
            | Self::Ordering { .. } => true,
            Self::Source { is_retriable, .. } => *is_retriable,
            _ => false,
        }
    }
}

/// Serializable error description, used as the reason of a dead-lettered record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// The error type/name
    #[serde(rename = "ErrorType")]
    pub error_type: String,
    /// The error message
    #[serde(rename = "ErrorMessage")]
    pub error_message: String,
}

impl ErrorObject {
    /// Creates a new ErrorObject.
    pub fn new(error_type: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            error_message: error_message.into(),
        }
    }
}

impl From<&ProcessorError> for ErrorObject {
    fn from(error: &ProcessorError) -> Self {
        match error {
            ProcessorError::Decode { message } => ErrorObject::new("DecodeError", message),
            ProcessorError::SinkRejected { source } => {
                ErrorObject::new("SinkRejectedError", source.message())
            }
            ProcessorError::RetriesExhausted { source, .. } => {
                ErrorObject::new("RetriesExhaustedError", source.message())
            }
            ProcessorError::InvocationTimeout { .. } => {
                ErrorObject::new("InvocationTimeoutError", error.to_string())
            }
            ProcessorError::Ordering { message } => ErrorObject::new("OrderingError", message),
            ProcessorError::Source { message, .. } => ErrorObject::new("SourceError", message),
            ProcessorError::Config { message } => ErrorObject::new("ConfigError", message),
        }
    }
}
