//! Batch processor: transcription with retry and ledger accounting.
//!
//! Claims one pending batch at a time (the status transition is the
//! lock), runs the provider's transcribe operation under the retry
//! policy, validates the output, and persists observations. Every
//! attempt lands in the call ledger. A batch that exhausts its retries
//! is marked failed and gets a placeholder card so its time range is not
//! silently missing from the timeline.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{day_key_for, ActivityCard, Batch, CallOperation, CallRecord, Observation};
use crate::error::ProviderError;
use crate::providers::{
    validate_observations, MediaChunk, Provider, RawObservation, RetryPolicy, TranscribeRequest,
};
use crate::store::Database;

/// Result of one processing step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Observations persisted; the window consolidator should run
    Completed { batch_id: Uuid },

    /// Retries exhausted or output rejected; placeholder card written
    Failed { batch_id: Uuid },

    /// Configuration problem; batch returned to pending, no attempt spent
    ReturnedToPending { batch_id: Uuid },

    /// Shutdown interrupted the call; batch left for the stale reclaim
    Abandoned { batch_id: Uuid },
}

enum AttemptError {
    Provider(ProviderError),
    Abandoned,
}

/// Runs transcription for pending batches.
pub struct BatchProcessor {
    db: Database,
    provider: Arc<dyn Provider>,
    policy: RetryPolicy,
    min_coverage: f64,
    day_start_hour: u32,
    fallback_category: String,
}

impl BatchProcessor {
    pub fn new(
        db: Database,
        provider: Arc<dyn Provider>,
        policy: RetryPolicy,
        min_coverage: f64,
        day_start_hour: u32,
        fallback_category: impl Into<String>,
    ) -> Self {
        Self {
            db,
            provider,
            policy,
            min_coverage,
            day_start_hour,
            fallback_category: fallback_category.into(),
        }
    }

    /// Claim and process the oldest pending batch. Returns `None` when
    /// nothing is pending.
    pub async fn process_next(
        &self,
        now: DateTime<Utc>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<Option<ProcessOutcome>> {
        let Some(batch) = self.db.claim_next_pending(now).await? else {
            return Ok(None);
        };

        info!(batch_id = %batch.id, span_secs = batch.duration_secs(), "processing batch");

        let segments = self.db.segments_for_batch(batch.id).await?;
        let request = TranscribeRequest {
            batch_id: batch.id,
            origin: batch.start_ts,
            duration_secs: batch.duration_secs(),
            chunks: segments
                .iter()
                .map(|s| MediaChunk {
                    path: s.file_path.clone(),
                    offset_secs: (s.start_ts - batch.start_ts).num_milliseconds() as f64 / 1000.0,
                    duration_secs: s.duration_secs(),
                })
                .collect(),
        };

        match self
            .transcribe_with_retry(&batch, &request, shutdown.clone())
            .await
        {
            Ok(raw) => {
                let observations = self.observations_from_raw(&batch, raw);
                self.db.insert_observations(observations).await?;
                self.db.mark_batch_completed(batch.id, Utc::now()).await?;
                info!(batch_id = %batch.id, "batch completed");
                Ok(Some(ProcessOutcome::Completed { batch_id: batch.id }))
            }
            Err(AttemptError::Abandoned) => {
                // Stale-processing reclaim will return it to pending
                warn!(batch_id = %batch.id, "provider call abandoned on shutdown");
                Ok(Some(ProcessOutcome::Abandoned { batch_id: batch.id }))
            }
            Err(AttemptError::Provider(err)) if err.is_configuration() => {
                warn!(batch_id = %batch.id, error = %err, "configuration error, batch left pending");
                self.db.return_batch_to_pending(batch.id, Utc::now()).await?;
                Ok(Some(ProcessOutcome::ReturnedToPending { batch_id: batch.id }))
            }
            Err(AttemptError::Provider(err)) => {
                error!(batch_id = %batch.id, error = %err, "batch failed");
                self.db
                    .mark_batch_failed(batch.id, &err.to_string(), Utc::now())
                    .await?;
                // Exhausted retries leave a visible gap; validation
                // failures write nothing so prior cards stand untouched.
                if err.is_transient() {
                    if let Err(card_err) =
                        self.write_placeholder_card(&batch, &err.to_string()).await
                    {
                        warn!(batch_id = %batch.id, error = %card_err, "failed to write placeholder card");
                    }
                }
                Ok(Some(ProcessOutcome::Failed { batch_id: batch.id }))
            }
        }
    }

    /// Run transcribe under the retry policy, recording every attempt.
    async fn transcribe_with_retry(
        &self,
        batch: &Batch,
        request: &TranscribeRequest,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<Vec<RawObservation>, AttemptError> {
        let group_id = Uuid::new_v4();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let started = Instant::now();

            let call = tokio::select! {
                result = self.provider.transcribe(request) => result,
                _ = shutdown.changed() => {
                    let record = CallRecord::failure(
                        Some(batch.id),
                        group_id,
                        attempt,
                        self.provider.name(),
                        CallOperation::Transcribe,
                        started.elapsed().as_millis() as u64,
                        request.summary(),
                        "abandoned on shutdown",
                    );
                    if let Err(err) = self.db.append_call_record(&record).await {
                        warn!(error = %err, "failed to record abandoned call");
                    }
                    return Err(AttemptError::Abandoned);
                }
            };

            // Untrusted backend output is validated before anything is kept
            let result = call.and_then(|raw| {
                validate_observations(raw, request.duration_secs, self.min_coverage)
            });

            let latency_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(observations) => {
                    let response = serde_json::to_string(&observations).unwrap_or_default();
                    let record = CallRecord::success(
                        Some(batch.id),
                        group_id,
                        attempt,
                        self.provider.name(),
                        CallOperation::Transcribe,
                        latency_ms,
                        request.summary(),
                    )
                    .with_response(response);
                    if let Err(err) = self.db.append_call_record(&record).await {
                        warn!(error = %err, "failed to append call record");
                    }
                    return Ok(observations);
                }
                Err(err) if err.is_configuration() => {
                    // No attempt consumed, no ledger row
                    return Err(AttemptError::Provider(err));
                }
                Err(err) => {
                    let record = CallRecord::failure(
                        Some(batch.id),
                        group_id,
                        attempt,
                        self.provider.name(),
                        CallOperation::Transcribe,
                        latency_ms,
                        request.summary(),
                        err.to_string(),
                    );
                    if let Err(ledger_err) = self.db.append_call_record(&record).await {
                        warn!(error = %ledger_err, "failed to append call record");
                    }

                    if err.is_transient() && self.policy.should_retry(attempt) {
                        let delay = self.policy.delay_for_attempt(attempt);
                        warn!(
                            batch_id = %batch.id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "transcription failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return Err(AttemptError::Provider(err));
                }
            }
        }
    }

    /// Turn validated, origin-relative observations into absolute rows.
    fn observations_from_raw(&self, batch: &Batch, raw: Vec<RawObservation>) -> Vec<Observation> {
        raw.into_iter()
            .map(|obs| {
                let start =
                    batch.start_ts + chrono::Duration::milliseconds((obs.start_secs * 1000.0) as i64);
                let end =
                    batch.start_ts + chrono::Duration::milliseconds((obs.end_secs * 1000.0) as i64);
                Observation::new(batch.id, start, end, obs.text, batch.model.clone())
            })
            .collect()
    }

    /// Synthesize an error card over the batch's span so the failure is
    /// visible on the timeline. Only written when the range holds no
    /// cards already; consolidated cards are never clobbered.
    async fn write_placeholder_card(&self, batch: &Batch, reason: &str) -> Result<()> {
        let existing = self.db.cards_in_range(batch.start_ts, batch.end_ts).await?;
        if !existing.is_empty() {
            return Ok(());
        }

        let card = ActivityCard {
            id: Uuid::new_v4(),
            batch_id: batch.id,
            start_ts: batch.start_ts,
            end_ts: batch.end_ts,
            day_key: day_key_for(batch.start_ts, self.day_start_hour),
            title: "Processing failed".to_string(),
            summary: format!("This period could not be analyzed: {reason}"),
            detailed_summary: format!(
                "Transcription for this period failed after retries ({reason}). \
                 Reset the batch to try again."
            ),
            category: self.fallback_category.clone(),
            subcategory: None,
            interruptions: Vec::new(),
            media_path: None,
            created_at: Utc::now(),
        };

        self.db
            .replace_cards_in_window(batch.start_ts, batch.end_ts, vec![card])
            .await?;
        Ok(())
    }
}
