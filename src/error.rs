//! Error types for the job pipeline.

use crate::event::ErrorCode;

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Malformed payloads rejected at the write boundary. Never enqueued or
/// appended; the caller can correct the input and retry.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Event type {event_type} requires field {field}")]
    EventField { event_type: String, field: String },

    #[error("Unsupported event type: {value}")]
    UnsupportedEventType { value: String },
}

impl ValidationError {
    /// Shorthand for a missing-field rejection.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}

/// Serialize/deserialize failures against the shared store.
///
/// Poll-style reads never surface these — a malformed record normalizes to
/// an empty result with a logged warning. Only writes propagate them.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Serialization failed: {0}")]
    Serialize(String),

    #[error("Deserialization failed: {0}")]
    Deserialize(String),
}

/// Backend store failures. The store performs no internal retry; callers
/// decide whether to back off (`Unavailable`) or give up (`Command`).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store command failed: {0}")]
    Command(String),
}

/// Graph executor failures. Converted to an `error` event (followed by a
/// terminal `done`) so the stream always closes cleanly.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Graph execution failed ({code}): {reason}")]
    Failed { code: ErrorCode, reason: String },

    #[error("Job {job_id} was cancelled")]
    Cancelled { job_id: String },
}

impl ExecutionError {
    /// The stream error code this failure maps to.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Failed { code, .. } => *code,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
