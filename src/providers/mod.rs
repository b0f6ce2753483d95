//! Provider abstraction for the AI transcription/summarization backend.
//!
//! Backends implement two operations behind one contract: `transcribe`
//! turns a batch of media chunks into time-ranged observations, and
//! `summarize_into_cards` turns a window of observations plus the prior
//! cards into a full replacement card set. Backends differ in call
//! fan-out (one combined HTTP call vs. many small local calls) but the
//! pipeline never sees the difference.
//!
//! Backend output is untrusted. The pipeline runs every transcription
//! result through [`validate_observations`] before anything is persisted:
//! out-of-range timestamps fail the call, individually malformed entries
//! are dropped, and the surviving union must cover the configured
//! fraction of the batch span.

pub mod cloud;
pub mod local;
pub mod retry;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::categories::Category;
use crate::config::{BackendKind, ProviderConfig};
use crate::credentials::SecretStore;
use crate::domain::{ActivityCard, Observation};
use crate::error::ProviderError;

pub use cloud::CloudProvider;
pub use local::LocalProvider;
pub use retry::RetryPolicy;

/// One media chunk of a batch, with its offset from the batch origin.
#[derive(Debug, Clone)]
pub struct MediaChunk {
    pub path: PathBuf,
    pub offset_secs: f64,
    pub duration_secs: f64,
}

/// Input to `transcribe`. Observation times in the result are relative
/// to `origin`, within `[0, duration_secs]`.
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub batch_id: Uuid,
    pub origin: DateTime<Utc>,
    pub duration_secs: f64,
    pub chunks: Vec<MediaChunk>,
}

impl TranscribeRequest {
    /// Short payload summary for the call ledger (no media content).
    pub fn summary(&self) -> String {
        format!(
            "batch {}: {} chunks spanning {:.0}s from {}",
            self.batch_id,
            self.chunks.len(),
            self.duration_secs,
            self.origin.to_rfc3339(),
        )
    }
}

/// A transcription result entry, relative to the batch origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObservation {
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
}

/// Input to `summarize_into_cards`.
#[derive(Debug, Clone)]
pub struct SummarizeRequest {
    pub window_start: DateTime<Utc>,
    pub now: DateTime<Utc>,
    pub observations: Vec<Observation>,
    pub prior_cards: Vec<ActivityCard>,
    pub categories: Vec<Category>,
}

impl SummarizeRequest {
    /// Short payload summary for the call ledger.
    pub fn summary(&self) -> String {
        format!(
            "window {}..{}: {} observations, {} prior cards",
            self.window_start.to_rfc3339(),
            self.now.to_rfc3339(),
            self.observations.len(),
            self.prior_cards.len(),
        )
    }
}

/// A card as returned by the backend, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftCard {
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub detailed_summary: String,
    pub category: String,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub interruptions: Vec<DraftInterruption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftInterruption {
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub title: String,
}

/// The two-operation backend contract.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Backend name, recorded in batches and the call ledger.
    fn name(&self) -> &str;

    /// Transcribe a batch of media into time-ranged observations.
    async fn transcribe(
        &self,
        request: &TranscribeRequest,
    ) -> Result<Vec<RawObservation>, ProviderError>;

    /// Produce a full replacement card set for a window.
    async fn summarize_into_cards(
        &self,
        request: &SummarizeRequest,
    ) -> Result<Vec<DraftCard>, ProviderError>;
}

/// The closed set of configured backends.
///
/// Selection is a pure function of configuration, resolved once at
/// startup and passed explicitly into the pipeline.
pub enum ProviderBackend {
    Cloud(CloudProvider),
    Local(LocalProvider),
}

impl ProviderBackend {
    pub fn from_config(config: &ProviderConfig, secrets: SecretStore) -> Self {
        match config.backend {
            BackendKind::Cloud => Self::Cloud(CloudProvider::new(config, secrets)),
            BackendKind::Local => Self::Local(LocalProvider::new(config)),
        }
    }
}

#[async_trait]
impl Provider for ProviderBackend {
    fn name(&self) -> &str {
        match self {
            Self::Cloud(p) => p.name(),
            Self::Local(p) => p.name(),
        }
    }

    async fn transcribe(
        &self,
        request: &TranscribeRequest,
    ) -> Result<Vec<RawObservation>, ProviderError> {
        match self {
            Self::Cloud(p) => p.transcribe(request).await,
            Self::Local(p) => p.transcribe(request).await,
        }
    }

    async fn summarize_into_cards(
        &self,
        request: &SummarizeRequest,
    ) -> Result<Vec<DraftCard>, ProviderError> {
        match self {
            Self::Cloud(p) => p.summarize_into_cards(request).await,
            Self::Local(p) => p.summarize_into_cards(request).await,
        }
    }
}

/// Guidance shared by both backends when asking for cards.
pub(crate) const SUMMARIZE_INSTRUCTIONS: &str = "Merge the observations with the prior cards \
into one replacement card set for the window. When an activity continues across a prior card's \
end, keep that card's start time and extend its end rather than opening an adjacent card. \
Assign each card exactly one category chosen from the supplied list. Record interruptions as \
sub-intervals of their surrounding card.";

/// Validate untrusted transcription output against the batch span.
///
/// Malformed entries (empty text, non-positive or non-finite ranges) are
/// dropped. A range outside `[0, duration_secs]` fails the whole call.
/// The union of the surviving ranges must cover at least `min_coverage`
/// of the span.
pub fn validate_observations(
    raw: Vec<RawObservation>,
    duration_secs: f64,
    min_coverage: f64,
) -> Result<Vec<RawObservation>, ProviderError> {
    const EPSILON_SECS: f64 = 0.5;

    let mut kept = Vec::with_capacity(raw.len());
    for obs in raw {
        if !obs.start_secs.is_finite()
            || !obs.end_secs.is_finite()
            || obs.end_secs <= obs.start_secs
            || obs.text.trim().is_empty()
        {
            continue;
        }

        if obs.start_secs < -EPSILON_SECS || obs.end_secs > duration_secs + EPSILON_SECS {
            return Err(ProviderError::TimestampOutOfBounds {
                start_secs: obs.start_secs,
                end_secs: obs.end_secs,
                duration_secs,
            });
        }

        kept.push(RawObservation {
            start_secs: obs.start_secs.max(0.0),
            end_secs: obs.end_secs.min(duration_secs),
            ..obs
        });
    }

    let covered = covered_secs(&kept);
    let required = duration_secs * min_coverage;
    if duration_secs > 0.0 && covered < required {
        return Err(ProviderError::InsufficientCoverage {
            covered_pct: covered / duration_secs * 100.0,
            required_pct: min_coverage * 100.0,
        });
    }

    kept.sort_by(|a, b| a.start_secs.total_cmp(&b.start_secs));
    Ok(kept)
}

/// Length of the union of the given ranges, in seconds.
fn covered_secs(observations: &[RawObservation]) -> f64 {
    let mut ranges: Vec<(f64, f64)> = observations
        .iter()
        .map(|o| (o.start_secs, o.end_secs))
        .collect();
    ranges.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut covered = 0.0;
    let mut current: Option<(f64, f64)> = None;
    for (start, end) in ranges {
        match current {
            Some((cur_start, cur_end)) if start <= cur_end => {
                current = Some((cur_start, cur_end.max(end)));
            }
            Some((cur_start, cur_end)) => {
                covered += cur_end - cur_start;
                current = Some((start, end));
            }
            None => current = Some((start, end)),
        }
    }
    if let Some((start, end)) = current {
        covered += end - start;
    }
    covered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(start: f64, end: f64) -> RawObservation {
        RawObservation {
            start_secs: start,
            end_secs: end,
            text: "something on screen".to_string(),
        }
    }

    #[test]
    fn test_full_coverage_passes() {
        let kept = validate_observations(vec![obs(0.0, 450.0), obs(450.0, 900.0)], 900.0, 0.8)
            .unwrap();
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_out_of_bounds_fails() {
        let err =
            validate_observations(vec![obs(0.0, 950.0)], 900.0, 0.8).unwrap_err();
        assert!(matches!(err, ProviderError::TimestampOutOfBounds { .. }));

        let err = validate_observations(vec![obs(-20.0, 100.0)], 900.0, 0.8).unwrap_err();
        assert!(matches!(err, ProviderError::TimestampOutOfBounds { .. }));
    }

    #[test]
    fn test_insufficient_coverage_fails() {
        // 540 of 900 seconds = 60%
        let err = validate_observations(vec![obs(0.0, 540.0)], 900.0, 0.8).unwrap_err();
        match err {
            ProviderError::InsufficientCoverage {
                covered_pct,
                required_pct,
            } => {
                assert!((covered_pct - 60.0).abs() < 0.01);
                assert_eq!(required_pct, 80.0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_overlapping_ranges_count_once() {
        // Two overlapping 600s ranges only cover 700s, not 1200s
        let err = validate_observations(
            vec![obs(0.0, 600.0), obs(100.0, 700.0)],
            1000.0,
            0.8,
        )
        .unwrap_err();
        assert!(matches!(err, ProviderError::InsufficientCoverage { .. }));
    }

    #[test]
    fn test_malformed_entries_dropped_when_coverage_holds() {
        let mut empty_text = obs(100.0, 200.0);
        empty_text.text = "   ".to_string();
        let inverted = obs(300.0, 250.0);

        let kept = validate_observations(
            vec![obs(0.0, 900.0), empty_text, inverted],
            900.0,
            0.8,
        )
        .unwrap();
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_slight_overshoot_clamped() {
        // Sub-second overshoot is clamped, not rejected
        let kept = validate_observations(vec![obs(-0.2, 900.3)], 900.0, 0.8).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].start_secs, 0.0);
        assert_eq!(kept[0].end_secs, 900.0);
    }

    #[test]
    fn test_sorted_output() {
        let kept = validate_observations(
            vec![obs(600.0, 900.0), obs(0.0, 600.0)],
            900.0,
            0.8,
        )
        .unwrap();
        assert!(kept[0].start_secs < kept[1].start_secs);
    }
}
