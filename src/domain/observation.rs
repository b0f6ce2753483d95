//! Transcription observations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A time-ranged textual transcription output for part of a batch.
///
/// Immutable once written; superseded only by reprocessing the owning
/// batch, which deletes the batch's observations first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Unique identifier
    pub id: Uuid,

    /// Batch this observation belongs to
    pub batch_id: Uuid,

    /// Start of the observed interval (absolute)
    pub start_ts: DateTime<Utc>,

    /// End of the observed interval (absolute)
    pub end_ts: DateTime<Utc>,

    /// What the backend observed during the interval
    pub text: String,

    /// Model that produced this observation
    pub model_id: String,

    /// When the row was created
    pub created_at: DateTime<Utc>,
}

impl Observation {
    pub fn new(
        batch_id: Uuid,
        start_ts: DateTime<Utc>,
        end_ts: DateTime<Utc>,
        text: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id,
            start_ts,
            end_ts,
            text: text.into(),
            model_id: model_id.into(),
            created_at: Utc::now(),
        }
    }

    /// Observed duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        (self.end_ts - self.start_ts).num_milliseconds() as f64 / 1000.0
    }
}
