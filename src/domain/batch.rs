//! Analysis batches.
//!
//! A batch is a contiguous, gap-checked run of ready segments submitted
//! together for transcription. Status transitions are monotonic:
//! `pending → processing → {completed | failed}`; a failed batch may be
//! reset to `pending` for reprocessing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A contiguous group of segments submitted together for transcription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Unique identifier
    pub id: Uuid,

    /// Start of the earliest linked segment
    pub start_ts: DateTime<Utc>,

    /// End of the latest linked segment
    pub end_ts: DateTime<Utc>,

    /// Current lifecycle status
    pub status: BatchStatus,

    /// Last error when `failed`
    pub failure_reason: Option<String>,

    /// Provider backend that will process (or processed) this batch
    pub provider: String,

    /// Model identifier used by the provider
    pub model: String,

    /// When the row was created
    pub created_at: DateTime<Utc>,

    /// Last status transition time; drives stale-processing reclaim
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    /// Create a new `pending` batch covering `[start_ts, end_ts]`.
    pub fn pending(
        start_ts: DateTime<Utc>,
        end_ts: DateTime<Utc>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            start_ts,
            end_ts,
            status: BatchStatus::Pending,
            failure_reason: None,
            provider: provider.into(),
            model: model.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Batch span in seconds.
    pub fn duration_secs(&self) -> f64 {
        (self.end_ts - self.start_ts).num_milliseconds() as f64 / 1000.0
    }
}

/// Lifecycle status of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Waiting to be picked up for transcription
    Pending,

    /// Claimed by a worker; acts as a lock against duplicate provider spend
    Processing,

    /// Observations persisted
    Completed,

    /// Gave up after retries or validation failure
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
