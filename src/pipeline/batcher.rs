//! Batch Builder.
//!
//! Periodically scans unprocessed segments and groups contiguous runs
//! into analysis batches: a batch is cut when the accumulated duration
//! reaches the target, a gap larger than the tolerance starts a new run
//! (so a batch never silently spans a capture outage), and a trailing
//! partial run is flushed only once its oldest segment exceeds the
//! staleness ceiling.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::BatchingConfig;
use crate::domain::{Batch, Segment};
use crate::store::Database;

/// A planned batch: which segments, and the span they cover.
#[derive(Debug, Clone)]
pub(crate) struct BatchPlan {
    pub segment_ids: Vec<Uuid>,
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
}

/// Groups ready segments into pending batches.
pub struct BatchBuilder {
    db: Database,
    config: BatchingConfig,
    provider: String,
    model: String,
}

impl BatchBuilder {
    pub fn new(
        db: Database,
        config: BatchingConfig,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            db,
            config,
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Build any batches that are ready as of `now`. Returns the new
    /// batch ids. A segment fetch failure skips the whole cycle; the
    /// next tick retries with nothing persisted.
    pub async fn build_ready_batches(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let segments = match self.db.unbatched_ready_segments().await {
            Ok(segments) => segments,
            Err(err) => {
                warn!(error = %err, "segment fetch failed, skipping batch cycle");
                return Ok(Vec::new());
            }
        };

        let plans = plan_batches(&segments, now, &self.config);
        let mut created = Vec::with_capacity(plans.len());

        for plan in plans {
            let batch = Batch::pending(plan.start_ts, plan.end_ts, &self.provider, &self.model);
            match self
                .db
                .insert_batch_with_links(&batch, plan.segment_ids.clone())
                .await
            {
                Ok(()) => {
                    info!(
                        batch_id = %batch.id,
                        segments = plan.segment_ids.len(),
                        span_secs = batch.duration_secs(),
                        "created batch"
                    );
                    created.push(batch.id);
                }
                Err(err) => {
                    // Links are unique per segment; a lost race rolls the
                    // whole batch back and the next tick replans.
                    warn!(batch_id = %batch.id, error = %err, "failed to persist batch");
                }
            }
        }

        Ok(created)
    }
}

/// Pure batching decision over an ordered segment list.
pub(crate) fn plan_batches(
    segments: &[Segment],
    now: DateTime<Utc>,
    config: &BatchingConfig,
) -> Vec<BatchPlan> {
    let gap_tolerance = Duration::seconds(config.gap_tolerance_secs as i64);
    let staleness = Duration::seconds(config.staleness_secs as i64);
    let target_secs = config.target_batch_secs as f64;

    let mut plans = Vec::new();
    let mut run: Vec<&Segment> = Vec::new();
    let mut run_secs = 0.0;

    let mut close_run = |run: &mut Vec<&Segment>, run_secs: &mut f64, force: bool| {
        if run.is_empty() {
            return;
        }
        let oldest_age = now - run[0].start_ts;
        if force || *run_secs >= target_secs || oldest_age > staleness {
            plans.push(BatchPlan {
                segment_ids: run.iter().map(|s| s.id).collect(),
                start_ts: run[0].start_ts,
                end_ts: run.last().map(|s| s.end_ts).unwrap_or(run[0].end_ts),
            });
        }
        run.clear();
        *run_secs = 0.0;
    };

    for segment in segments {
        let starts_new_run = run
            .last()
            .map(|prev| segment.start_ts - prev.end_ts > gap_tolerance)
            .unwrap_or(false);

        if starts_new_run {
            // A gap ends the run; it only ships now if already stale
            close_run(&mut run, &mut run_secs, false);
        }

        run.push(segment);
        run_secs += segment.duration_secs();

        if run_secs >= target_secs {
            close_run(&mut run, &mut run_secs, true);
        }
    }

    // Trailing partial run: staleness decides
    close_run(&mut run, &mut run_secs, false);

    plans
}
