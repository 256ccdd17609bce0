//! Job payloads and status records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Build an opaque prefixed identifier, e.g. `job-4f1c…`.
pub fn prefixed_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// A job creation request as received from the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// Resume from a specific checkpoint instead of the thread's latest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
}

impl JobRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

/// The record placed on the shared job queue. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
}

impl JobPayload {
    /// Check the fields every queued job must carry.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, value) in [
            ("job_id", &self.job_id),
            ("trace_id", &self.trace_id),
            ("thread_id", &self.thread_id),
            ("query", &self.query),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::missing(field));
            }
        }
        Ok(())
    }
}

/// Status of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted and waiting on the queue.
    Queued,
    /// A worker has picked the job up.
    Running,
    /// The stream finished with a `done` event.
    Done,
    /// The stream finished with a finalizing error.
    Failed,
    /// Cancellation was requested before the job finished.
    Cancelled,
}

impl JobStatus {
    /// Transitions are monotonic forward only; terminal states absorb.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Queued, Running)
                | (Queued, Done)
                | (Queued, Failed)
                | (Queued, Cancelled)
                | (Running, Done)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Keyed status record shared by the orchestration service and the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub job_id: String,
    pub status: JobStatus,
    /// Sequence number of the newest event known for this job.
    pub last_seq: u64,
}

/// Identifiers returned from job creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedJob {
    pub job_id: String,
    pub trace_id: String,
    pub thread_id: String,
}

/// Acknowledgement returned from a cancellation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAck {
    pub job_id: String,
    pub status: JobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> JobPayload {
        JobPayload {
            job_id: "j1".to_string(),
            trace_id: "t1".to_string(),
            thread_id: "th1".to_string(),
            session_id: "s1".to_string(),
            query: "hi".to_string(),
            user_id: None,
            metadata: None,
            checkpoint_id: None,
        }
    }

    #[test]
    fn payload_validation_accepts_complete_record() {
        assert!(payload().validate().is_ok());
    }

    #[test]
    fn payload_validation_rejects_missing_fields() {
        for field in ["job_id", "trace_id", "thread_id", "query"] {
            let mut p = payload();
            match field {
                "job_id" => p.job_id.clear(),
                "trace_id" => p.trace_id.clear(),
                "thread_id" => p.thread_id.clear(),
                _ => p.query.clear(),
            }
            let err = p.validate().unwrap_err();
            assert!(err.to_string().contains(field), "expected {field} in {err}");
        }
    }

    #[test]
    fn status_transitions_valid() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Done));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Done));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn status_transitions_never_leave_terminal_states() {
        for terminal in [JobStatus::Done, JobStatus::Failed, JobStatus::Cancelled] {
            for target in [
                JobStatus::Queued,
                JobStatus::Running,
                JobStatus::Done,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn status_never_moves_backward() {
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
        assert!(!JobStatus::Done.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn status_serde_roundtrip() {
        let json = serde_json::to_string(&JobStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let parsed: JobStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, JobStatus::Running);
    }

    #[test]
    fn prefixed_ids_are_unique() {
        let a = prefixed_id("job");
        let b = prefixed_id("job");
        assert!(a.starts_with("job-"));
        assert_ne!(a, b);
    }
}
