//! Window Consolidator.
//!
//! Re-evaluates a trailing window on every completed batch: the window's
//! observations plus the cards currently stored there go to the provider,
//! which returns a full replacement set that merges, extends, and splits
//! activities. The swap is atomic; on any failure the prior cards stand.
//!
//! Consolidation runs are serialized through an internal mutex, since
//! concurrent replacement on overlapping ranges would race on the
//! delete/insert.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::categories::CategoryCatalog;
use crate::config::ConsolidationConfig;
use crate::domain::{day_key_for, ActivityCard, CallOperation, CallRecord, Interruption};
use crate::error::ProviderError;
use crate::providers::{DraftCard, Provider, RetryPolicy, SummarizeRequest};
use crate::store::Database;

/// What a consolidation run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsolidationOutcome {
    /// Window swapped for the new card set
    Replaced { removed: usize, inserted: usize },

    /// Nothing to summarize in the window
    SkippedNoObservations,

    /// Provider failed after retries; prior cards untouched
    ProviderFailed(String),

    /// Zero cards against non-trivial observations; prior cards retained
    RejectedEmpty,

    /// Returned cards violated the window bounds; prior cards retained
    RejectedInvalid(String),
}

/// Merges a trailing window of observations into the stored cards.
pub struct WindowConsolidator {
    db: Database,
    provider: Arc<dyn Provider>,
    catalog: Arc<CategoryCatalog>,
    policy: RetryPolicy,
    config: ConsolidationConfig,
    /// Serializes consolidation runs
    active: Mutex<()>,
}

impl WindowConsolidator {
    pub fn new(
        db: Database,
        provider: Arc<dyn Provider>,
        catalog: Arc<CategoryCatalog>,
        policy: RetryPolicy,
        config: ConsolidationConfig,
    ) -> Self {
        Self {
            db,
            provider,
            catalog,
            policy,
            config,
            active: Mutex::new(()),
        }
    }

    /// Consolidate the trailing window ending at `now`, on behalf of the
    /// batch whose completion triggered the run.
    pub async fn consolidate(
        &self,
        batch_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ConsolidationOutcome> {
        let _active = self.active.lock().await;

        let window_start = now - Duration::seconds(self.config.window_secs as i64);

        let observations = self.db.observations_in_range(window_start, now).await?;
        if observations.is_empty() {
            return Ok(ConsolidationOutcome::SkippedNoObservations);
        }

        let prior_cards = self.db.cards_in_range(window_start, now).await?;

        let request = SummarizeRequest {
            window_start,
            now,
            observations,
            prior_cards: prior_cards.clone(),
            categories: self.catalog.list_for_prompt().to_vec(),
        };

        let drafts = match self.summarize_with_retry(batch_id, &request).await {
            Ok(drafts) => drafts,
            Err(err) => {
                warn!(batch_id = %batch_id, error = %err, "summarize failed, window unchanged");
                return Ok(ConsolidationOutcome::ProviderFailed(err.to_string()));
            }
        };

        // Zero cards against real observation coverage is a quality
        // failure, not an instruction to blank the window.
        if drafts.is_empty() {
            warn!(batch_id = %batch_id, "provider returned no cards, retaining prior set");
            return Ok(ConsolidationOutcome::RejectedEmpty);
        }

        // A merged card may legitimately start before the window when it
        // extends a prior card; anything earlier is invalid.
        let earliest_prior = prior_cards
            .iter()
            .map(|c| c.start_ts)
            .min()
            .unwrap_or(window_start);
        let slack = Duration::seconds(self.config.slack_secs as i64);
        let lower_bound = window_start.min(earliest_prior) - slack;
        let upper_bound = now + slack;

        for draft in &drafts {
            if draft.end_ts <= draft.start_ts
                || draft.start_ts < lower_bound
                || draft.end_ts > upper_bound
            {
                let reason = format!(
                    "card '{}' [{} .. {}] outside window bounds [{} .. {}]",
                    draft.title,
                    draft.start_ts.to_rfc3339(),
                    draft.end_ts.to_rfc3339(),
                    lower_bound.to_rfc3339(),
                    upper_bound.to_rfc3339(),
                );
                warn!(batch_id = %batch_id, %reason, "rejecting card set, retaining prior");
                return Ok(ConsolidationOutcome::RejectedInvalid(reason));
            }
        }

        let cards = self.finalize_cards(batch_id, drafts);

        let replace_start = cards
            .first()
            .map(|c| c.start_ts.min(window_start))
            .unwrap_or(window_start);
        let replace_end = cards
            .last()
            .map(|c| c.end_ts.max(now))
            .unwrap_or(now);

        let inserted = cards.len();
        let removed = self
            .db
            .replace_cards_in_window(replace_start, replace_end, cards)
            .await?;

        info!(
            batch_id = %batch_id,
            removed = removed.len(),
            inserted,
            "window consolidated"
        );

        // Outside the storage transaction, best effort only
        self.cleanup_media(&removed).await;

        Ok(ConsolidationOutcome::Replaced {
            removed: removed.len(),
            inserted,
        })
    }

    /// Run summarize under the retry policy, recording every attempt.
    async fn summarize_with_retry(
        &self,
        batch_id: Uuid,
        request: &SummarizeRequest,
    ) -> Result<Vec<DraftCard>, ProviderError> {
        let group_id = Uuid::new_v4();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let started = Instant::now();

            let result = self.provider.summarize_into_cards(request).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(drafts) => {
                    let response = serde_json::to_string(&drafts).unwrap_or_default();
                    let record = CallRecord::success(
                        Some(batch_id),
                        group_id,
                        attempt,
                        self.provider.name(),
                        CallOperation::Summarize,
                        latency_ms,
                        request.summary(),
                    )
                    .with_response(response);
                    if let Err(err) = self.db.append_call_record(&record).await {
                        warn!(error = %err, "failed to append call record");
                    }
                    return Ok(drafts);
                }
                Err(err) if err.is_configuration() => {
                    return Err(err);
                }
                Err(err) => {
                    let record = CallRecord::failure(
                        Some(batch_id),
                        group_id,
                        attempt,
                        self.provider.name(),
                        CallOperation::Summarize,
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
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "summarize failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    return Err(err);
                }
            }
        }
    }

    /// Normalize categories, stamp day keys, and repair ordering so the
    /// stored set always satisfies the per-day invariants. The repair is
    /// deterministic, which keeps repeated consolidation of identical
    /// input idempotent.
    fn finalize_cards(&self, batch_id: Uuid, drafts: Vec<DraftCard>) -> Vec<ActivityCard> {
        let now = Utc::now();
        let mut cards: Vec<ActivityCard> = drafts
            .into_iter()
            .map(|draft| ActivityCard {
                id: Uuid::new_v4(),
                batch_id,
                start_ts: draft.start_ts,
                end_ts: draft.end_ts,
                day_key: day_key_for(draft.start_ts, self.config.day_start_hour),
                title: draft.title,
                summary: draft.summary,
                detailed_summary: draft.detailed_summary,
                category: self.catalog.normalize(&draft.category),
                subcategory: draft.subcategory,
                interruptions: draft
                    .interruptions
                    .into_iter()
                    .map(|i| Interruption {
                        start_ts: i.start_ts,
                        end_ts: i.end_ts,
                        title: i.title,
                    })
                    .collect(),
                media_path: None,
                created_at: now,
            })
            .collect();

        cards.sort_by_key(|c| c.start_ts);

        // Clip any overlap the backend produced; drop cards clipped away
        let mut repaired: Vec<ActivityCard> = Vec::with_capacity(cards.len());
        for mut card in cards {
            if let Some(prev) = repaired.last() {
                if card.start_ts < prev.end_ts {
                    card.start_ts = prev.end_ts;
                    card.day_key = day_key_for(card.start_ts, self.config.day_start_hour);
                }
            }
            if card.end_ts > card.start_ts {
                repaired.push(card);
            }
        }

        repaired
    }

    /// Remove media artifacts referenced only by the replaced cards.
    async fn cleanup_media(&self, removed: &[ActivityCard]) {
        let mut seen: HashSet<&std::path::Path> = HashSet::new();
        for card in removed {
            let Some(path) = card.media_path.as_deref() else {
                continue;
            };
            if !seen.insert(path) {
                continue;
            }

            match self.db.media_reference_count(path.to_path_buf()).await {
                Ok(0) => {
                    if let Err(err) = tokio::fs::remove_file(path).await {
                        if err.kind() != std::io::ErrorKind::NotFound {
                            warn!(path = %path.display(), error = %err, "failed to remove media artifact");
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to check media references");
                }
            }
        }
    }
}
