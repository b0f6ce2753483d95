//! Batch processing integration tests.
//!
//! Covers the retry/ledger accounting around transcription, the
//! validation of untrusted backend output, failure surfacing, and the
//! configuration-error path.

mod common;

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use tempfile::TempDir;
use tokio::sync::watch;
use uuid::Uuid;

use dayline::domain::BatchStatus;
use dayline::error::ProviderError;
use dayline::pipeline::{BatchProcessor, ProcessOutcome};
use dayline::providers::RawObservation;
use dayline::store::Database;

use common::{fast_retry, seed_contiguous_segments, ScriptedProvider};

async fn test_db() -> (Database, TempDir) {
    let temp = TempDir::new().unwrap();
    let db = Database::open(temp.path().join("test.db")).unwrap();
    (db, temp)
}

fn processor(db: &Database, provider: Arc<ScriptedProvider>) -> BatchProcessor {
    BatchProcessor::new(db.clone(), provider, fast_retry(), 0.8, 4, "Work")
}

/// Seed one pending batch covering `segments` 900 seconds of capture.
async fn seed_pending_batch(db: &Database) -> Uuid {
    let base = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
    let segments = seed_contiguous_segments(db, base, 60, 15).await;

    let batch = dayline::domain::Batch::pending(
        segments[0].start_ts,
        segments[59].end_ts,
        "scripted",
        "flash-2",
    );
    db.insert_batch_with_links(&batch, segments.iter().map(|s| s.id).collect())
        .await
        .unwrap();
    batch.id
}

fn full_coverage() -> Vec<RawObservation> {
    vec![
        RawObservation {
            start_secs: 0.0,
            end_secs: 450.0,
            text: "writing code in an editor".to_string(),
        },
        RawObservation {
            start_secs: 450.0,
            end_secs: 900.0,
            text: "reviewing a pull request".to_string(),
        },
    ]
}

#[tokio::test]
async fn test_successful_batch_persists_observations() {
    let (db, _temp) = test_db().await;
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_transcribe(Ok(full_coverage()));

    let batch_id = seed_pending_batch(&db).await;
    let (_tx, shutdown) = watch::channel(false);

    let outcome = processor(&db, provider)
        .process_next(Utc::now(), &shutdown)
        .await
        .unwrap();
    assert_eq!(outcome, Some(ProcessOutcome::Completed { batch_id }));

    let batch = db.batch_by_id(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);

    // Observations carry absolute times inside the batch span
    let observations = db.observations_for_batch(batch_id).await.unwrap();
    assert_eq!(observations.len(), 2);
    for obs in &observations {
        assert!(obs.start_ts >= batch.start_ts);
        assert!(obs.end_ts <= batch.end_ts);
    }
    assert_eq!(observations[0].start_ts, batch.start_ts);
    assert_eq!(
        observations[1].end_ts,
        batch.start_ts + Duration::seconds(900)
    );

    // One successful ledger row
    let records = db.call_records_for_batch(batch_id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempt, 1);
}

#[tokio::test]
async fn test_transient_failures_exhaust_retries() {
    let (db, _temp) = test_db().await;
    let provider = Arc::new(ScriptedProvider::new());
    for _ in 0..3 {
        provider.push_transcribe(Err(ProviderError::Transient("connection reset".into())));
    }

    let batch_id = seed_pending_batch(&db).await;
    let (_tx, shutdown) = watch::channel(false);

    let outcome = processor(&db, provider.clone())
        .process_next(Utc::now(), &shutdown)
        .await
        .unwrap();
    assert_eq!(outcome, Some(ProcessOutcome::Failed { batch_id }));
    assert_eq!(provider.transcribe_call_count(), 3);

    // Batch failed with the last error as reason
    let batch = db.batch_by_id(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    assert!(batch
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("connection reset"));

    // Exactly three ledger rows in one attempt group, no observations
    let records = db.call_records_for_batch(batch_id).await.unwrap();
    assert_eq!(records.len(), 3);
    let group = records[0].group_id;
    assert!(records.iter().all(|r| r.group_id == group));
    assert_eq!(
        records.iter().map(|r| r.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(db.observations_for_batch(batch_id).await.unwrap().is_empty());

    // The gap is visible as a placeholder card
    let cards = db.cards_in_range(batch.start_ts, batch.end_ts).await.unwrap();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].title, "Processing failed");
    assert_eq!(cards[0].category, "Work");
}

#[tokio::test]
async fn test_insufficient_coverage_fails_without_retry() {
    let (db, _temp) = test_db().await;
    let provider = Arc::new(ScriptedProvider::new());

    // 540 of 900 seconds = 60%, below the 80% threshold
    provider.push_transcribe(Ok(vec![RawObservation {
        start_secs: 0.0,
        end_secs: 540.0,
        text: "partial transcription".to_string(),
    }]));

    let batch_id = seed_pending_batch(&db).await;
    let (_tx, shutdown) = watch::channel(false);

    let outcome = processor(&db, provider.clone())
        .process_next(Utc::now(), &shutdown)
        .await
        .unwrap();
    assert_eq!(outcome, Some(ProcessOutcome::Failed { batch_id }));

    // Validation failures are not retried with the same input
    assert_eq!(provider.transcribe_call_count(), 1);
    let records = db.call_records_for_batch(batch_id).await.unwrap();
    assert_eq!(records.len(), 1);

    let batch = db.batch_by_id(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    assert!(batch.failure_reason.as_deref().unwrap().contains("cover"));

    // No observations and no cards for this batch alone
    assert!(db.observations_for_batch(batch_id).await.unwrap().is_empty());
    assert!(db
        .cards_in_range(batch.start_ts, batch.end_ts)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_out_of_bounds_timestamp_fails_batch() {
    let (db, _temp) = test_db().await;
    let provider = Arc::new(ScriptedProvider::new());

    provider.push_transcribe(Ok(vec![RawObservation {
        start_secs: 0.0,
        end_secs: 1200.0, // past the 900s batch span
        text: "hallucinated range".to_string(),
    }]));

    let batch_id = seed_pending_batch(&db).await;
    let (_tx, shutdown) = watch::channel(false);

    let outcome = processor(&db, provider)
        .process_next(Utc::now(), &shutdown)
        .await
        .unwrap();
    assert_eq!(outcome, Some(ProcessOutcome::Failed { batch_id }));

    let batch = db.batch_by_id(batch_id).await.unwrap().unwrap();
    assert!(batch
        .failure_reason
        .as_deref()
        .unwrap()
        .contains("outside batch span"));
}

#[tokio::test]
async fn test_configuration_error_leaves_batch_pending() {
    let (db, _temp) = test_db().await;
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_transcribe(Err(ProviderError::Configuration("no api key".into())));

    let batch_id = seed_pending_batch(&db).await;
    let (_tx, shutdown) = watch::channel(false);

    let outcome = processor(&db, provider)
        .process_next(Utc::now(), &shutdown)
        .await
        .unwrap();
    assert_eq!(outcome, Some(ProcessOutcome::ReturnedToPending { batch_id }));

    // Batch is claimable again and no attempt was consumed
    let batch = db.batch_by_id(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Pending);
    assert!(db.call_records_for_batch(batch_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_batch_can_be_reprocessed() {
    let (db, _temp) = test_db().await;
    let provider = Arc::new(ScriptedProvider::new());

    // First pass fails, the retry succeeds
    for _ in 0..3 {
        provider.push_transcribe(Err(ProviderError::Transient("boom".into())));
    }
    provider.push_transcribe(Ok(full_coverage()));

    let batch_id = seed_pending_batch(&db).await;
    let (_tx, shutdown) = watch::channel(false);
    let processor = processor(&db, provider);

    processor.process_next(Utc::now(), &shutdown).await.unwrap();
    assert_eq!(
        db.batch_by_id(batch_id).await.unwrap().unwrap().status,
        BatchStatus::Failed
    );

    assert!(db.reset_failed_batch(batch_id, Utc::now()).await.unwrap());
    let outcome = processor.process_next(Utc::now(), &shutdown).await.unwrap();
    assert_eq!(outcome, Some(ProcessOutcome::Completed { batch_id }));
    assert_eq!(db.observations_for_batch(batch_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_nothing_pending_returns_none() {
    let (db, _temp) = test_db().await;
    let provider = Arc::new(ScriptedProvider::new());
    let (_tx, shutdown) = watch::channel(false);

    let outcome = processor(&db, provider)
        .process_next(Utc::now(), &shutdown)
        .await
        .unwrap();
    assert!(outcome.is_none());
}
