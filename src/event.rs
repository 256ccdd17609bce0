//! Stream event model and wire format.
//!
//! Every job produces an ordered sequence of [`StreamEvent`]s. Events are
//! validated at append time and framed as `data: {json}` lines when they
//! leave the orchestration service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CodecError, ValidationError};

/// The closed set of stream event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Incremental answer text. Requires `content`.
    Token,
    /// Structured progress signal. Requires a `metadata` object.
    Metadata,
    /// Failure surfaced to the client. Requires `error_code`.
    Error,
    /// Terminal event; closes the stream. Requires nothing extra.
    Done,
}

impl EventKind {
    /// Case-tolerant parse. Unrecognized input normalizes to `None` rather
    /// than an error, so readers stay tolerant of foreign records.
    pub fn parse(value: &str) -> Option<EventKind> {
        match value.trim().to_ascii_lowercase().as_str() {
            "token" => Some(Self::Token),
            "metadata" => Some(Self::Metadata),
            "error" => Some(Self::Error),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Metadata => "metadata",
            Self::Error => "error",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes attached to `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "validation_error")]
    Validation,
    #[serde(rename = "tool_error")]
    Tool,
    #[serde(rename = "retrieval_empty")]
    RetrievalEmpty,
    #[serde(rename = "timeout")]
    Timeout,
    #[serde(rename = "safeguard_blocked")]
    Safeguard,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "unknown_error")]
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::Tool => "tool_error",
            Self::RetrievalEmpty => "retrieval_empty",
            Self::Timeout => "timeout",
            Self::Safeguard => "safeguard_blocked",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown_error",
        }
    }

    /// Message shown to the end user when this code reaches the stream.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Validation => "The response failed validation. A short fallback answer was provided.",
            Self::Tool => "An external tool call failed. Only a basic answer is available.",
            Self::RetrievalEmpty => "No relevant information was found for this request.",
            Self::Timeout => "Processing took too long. Please try again shortly.",
            Self::Safeguard => "This request cannot be processed. Please try a different question.",
            Self::Cancelled => "The job was cancelled before it completed.",
            Self::Unknown => "Something went wrong while processing the request.",
        }
    }

    /// Whether an `error` event carrying this code finalizes the job as
    /// failed. Finer-grained routing is executor configuration, not part of
    /// this core's contract.
    pub fn finalizes_stream(&self) -> bool {
        true
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names for the structured `metadata` events emitted around execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataKind {
    NodeStart,
    NodeEnd,
    RouteDecision,
    Fallback,
    Warning,
    JobQueued,
    JobStart,
    JobEnd,
    JobError,
}

/// Body of a `metadata` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataPayload {
    pub event: MetadataKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safeguard_label: Option<String>,
}

impl MetadataPayload {
    pub fn new(event: MetadataKind, message: impl Into<String>) -> Self {
        Self {
            event,
            message: message.into(),
            timestamp: Utc::now(),
            node: None,
            route: None,
            error_code: None,
            safeguard_label: None,
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_error_code(mut self, code: ErrorCode) -> Self {
        self.error_code = Some(code);
        self
    }
}

/// One record in a job's ordered event log.
///
/// `event_type` stays a plain string on the wire so unrecognized types read
/// back without failing; [`StreamEvent::kind`] resolves it to the closed
/// [`EventKind`] set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub trace_id: String,
    #[serde(default)]
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl StreamEvent {
    pub fn token(trace_id: impl Into<String>, seq: u64, content: impl Into<String>) -> Self {
        Self {
            event_type: EventKind::Token.as_str().to_string(),
            trace_id: trace_id.into(),
            seq,
            content: Some(content.into()),
            metadata: None,
            error_code: None,
        }
    }

    pub fn metadata(trace_id: impl Into<String>, seq: u64, payload: &MetadataPayload) -> Self {
        Self {
            event_type: EventKind::Metadata.as_str().to_string(),
            trace_id: trace_id.into(),
            seq,
            content: None,
            // MetadataPayload serializes infallibly: plain fields and enums only
            metadata: serde_json::to_value(payload).ok(),
            error_code: None,
        }
    }

    pub fn error(
        trace_id: impl Into<String>,
        seq: u64,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event_type: EventKind::Error.as_str().to_string(),
            trace_id: trace_id.into(),
            seq,
            content: Some(message.into()),
            metadata: None,
            error_code: Some(code),
        }
    }

    pub fn done(trace_id: impl Into<String>, seq: u64) -> Self {
        Self {
            event_type: EventKind::Done.as_str().to_string(),
            trace_id: trace_id.into(),
            seq,
            content: None,
            metadata: None,
            error_code: None,
        }
    }

    /// Resolve the declared type against the closed event-kind set.
    pub fn kind(&self) -> Option<EventKind> {
        EventKind::parse(&self.event_type)
    }

    pub fn is_done(&self) -> bool {
        self.kind() == Some(EventKind::Done)
    }

    /// Check the per-type field rules. Called on every append; malformed
    /// events are rejected before they enter the shared store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let kind = self.kind().ok_or_else(|| ValidationError::UnsupportedEventType {
            value: self.event_type.clone(),
        })?;
        let require = |present: bool, field: &str| {
            if present {
                Ok(())
            } else {
                Err(ValidationError::EventField {
                    event_type: kind.as_str().to_string(),
                    field: field.to_string(),
                })
            }
        };
        match kind {
            EventKind::Token => require(
                self.content.as_deref().is_some_and(|c| !c.is_empty()),
                "content",
            ),
            EventKind::Metadata => require(self.metadata.is_some(), "metadata"),
            EventKind::Error => require(self.error_code.is_some(), "error_code"),
            EventKind::Done => Ok(()),
        }
    }

    /// Frame as a text-event-stream data line.
    pub fn to_wire_line(&self) -> Result<String, CodecError> {
        let payload =
            serde_json::to_string(self).map_err(|e| CodecError::Serialize(e.to_string()))?;
        Ok(format!("data: {payload}\n\n"))
    }

    /// Parse a text-event-stream data line back into an event. Non-data
    /// lines and malformed payloads yield `None`.
    pub fn from_wire_line(line: &str) -> Option<StreamEvent> {
        let raw = line.trim().strip_prefix("data: ")?;
        serde_json::from_str(raw).ok()
    }
}
