//! Provider call ledger rows.
//!
//! Append-only: one row per attempt, including retries. Attempts that
//! belong to the same logical call share a `group_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One provider invocation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    /// Unique identifier
    pub id: Uuid,

    /// Owning batch, if the call was made on behalf of one
    pub batch_id: Option<Uuid>,

    /// Shared across the retries of one logical call
    pub group_id: Uuid,

    /// 1-indexed attempt number within the group
    pub attempt: u32,

    /// Provider backend name
    pub provider: String,

    /// Which of the two contract operations was invoked
    pub operation: CallOperation,

    /// Outcome of this attempt
    pub status: CallStatus,

    /// Wall-clock latency of the attempt
    pub latency_ms: u64,

    /// Request payload summary (no secrets)
    pub request: String,

    /// Response payload, when the attempt succeeded
    pub response: Option<String>,

    /// Error message, when the attempt failed
    pub error: Option<String>,

    /// When the row was appended
    pub created_at: DateTime<Utc>,
}

impl CallRecord {
    /// Create a successful attempt record.
    pub fn success(
        batch_id: Option<Uuid>,
        group_id: Uuid,
        attempt: u32,
        provider: impl Into<String>,
        operation: CallOperation,
        latency_ms: u64,
        request: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id,
            group_id,
            attempt,
            provider: provider.into(),
            operation,
            status: CallStatus::Success,
            latency_ms,
            request: request.into(),
            response: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Create a failed attempt record.
    pub fn failure(
        batch_id: Option<Uuid>,
        group_id: Uuid,
        attempt: u32,
        provider: impl Into<String>,
        operation: CallOperation,
        latency_ms: u64,
        request: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id,
            group_id,
            attempt,
            provider: provider.into(),
            operation,
            status: CallStatus::Failure,
            latency_ms,
            request: request.into(),
            response: None,
            error: Some(error.into()),
            created_at: Utc::now(),
        }
    }

    /// Attach the response payload.
    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }
}

/// The two operations of the provider contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOperation {
    Transcribe,
    Summarize,
}

impl CallOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcribe => "transcribe",
            Self::Summarize => "summarize",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "transcribe" => Some(Self::Transcribe),
            "summarize" => Some(Self::Summarize),
            _ => None,
        }
    }
}

/// Outcome of a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Success,
    Failure,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_record_carries_error() {
        let group = Uuid::new_v4();
        let record = CallRecord::failure(
            None,
            group,
            2,
            "cloud",
            CallOperation::Transcribe,
            840,
            "batch 0..900s, 3 chunks",
            "connection reset",
        );

        assert_eq!(record.group_id, group);
        assert_eq!(record.attempt, 2);
        assert_eq!(record.status, CallStatus::Failure);
        assert_eq!(record.error.as_deref(), Some("connection reset"));
        assert!(record.response.is_none());
    }

    #[test]
    fn test_success_with_response() {
        let record = CallRecord::success(
            None,
            Uuid::new_v4(),
            1,
            "local",
            CallOperation::Summarize,
            120,
            "window 60m",
        )
        .with_response("{\"cards\":[]}");

        assert_eq!(record.status, CallStatus::Success);
        assert_eq!(record.response.as_deref(), Some("{\"cards\":[]}"));
    }
}
