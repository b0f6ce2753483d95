//! Raw captured segments.
//!
//! Segments are created by the capture collaborator when a fixed-length
//! recording unit completes. The time range is immutable once `ready`;
//! only the status and deleted flag may change afterwards.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fixed-duration recorded unit with a time range and storage handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    /// Unique identifier
    pub id: Uuid,

    /// When the recording started
    pub start_ts: DateTime<Utc>,

    /// When the recording ended
    pub end_ts: DateTime<Utc>,

    /// Path to the chunk file on disk
    pub file_path: PathBuf,

    /// Lifecycle status
    pub status: SegmentStatus,

    /// Set when the chunk file has been removed but the row is retained
    pub deleted: bool,

    /// When the row was created
    pub created_at: DateTime<Utc>,
}

impl Segment {
    /// Create a `ready` segment for a completed chunk file.
    pub fn ready(start_ts: DateTime<Utc>, end_ts: DateTime<Utc>, file_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_ts,
            end_ts,
            file_path,
            status: SegmentStatus::Ready,
            deleted: false,
            created_at: Utc::now(),
        }
    }

    /// Recorded duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        (self.end_ts - self.start_ts).num_milliseconds() as f64 / 1000.0
    }
}

/// Lifecycle status of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    /// Recording in progress
    Capturing,

    /// Chunk file complete and available for batching
    Ready,

    /// Capture failed; never batched
    Failed,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capturing => "capturing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "capturing" => Some(Self::Capturing),
            "ready" => Some(Self::Ready),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
