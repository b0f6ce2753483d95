//! Batch repository.
//!
//! The `pending → processing` transition doubles as the lock preventing
//! duplicate provider spend: the UPDATE is guarded on the current status,
//! so of two concurrent claims exactly one observes a changed row.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::domain::{Batch, BatchStatus};

use super::{parse_datetime, parse_uuid, Database};

fn row_to_batch(row: &Row) -> Result<Batch> {
    Ok(Batch {
        id: parse_uuid(&row.get::<_, String>("id")?)?,
        start_ts: parse_datetime(&row.get::<_, String>("start_ts")?)?,
        end_ts: parse_datetime(&row.get::<_, String>("end_ts")?)?,
        status: BatchStatus::parse(&row.get::<_, String>("status")?)
            .ok_or_else(|| anyhow::anyhow!("unknown batch status"))?,
        failure_reason: row.get::<_, Option<String>>("failure_reason")?,
        provider: row.get::<_, String>("provider")?,
        model: row.get::<_, String>("model")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?)?,
        updated_at: parse_datetime(&row.get::<_, String>("updated_at")?)?,
    })
}

const BATCH_COLUMNS: &str =
    "id, start_ts, end_ts, status, failure_reason, provider, model, created_at, updated_at";

/// Batch counts by status, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStatusCounts {
    pub pending: u32,
    pub processing: u32,
    pub completed: u32,
    pub failed: u32,
}

impl Database {
    /// Insert a batch together with its segment links in one transaction.
    ///
    /// A batch must never exist without its links, and a segment must
    /// never be claimed by two batches; the UNIQUE constraint on
    /// `segment_id` rolls the whole insert back on a double claim.
    pub async fn insert_batch_with_links(
        &self,
        batch: &Batch,
        segment_ids: Vec<Uuid>,
    ) -> Result<()> {
        if segment_ids.is_empty() {
            bail!("refusing to insert batch {} with no segments", batch.id);
        }

        let batch = batch.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO batches (id, start_ts, end_ts, status, failure_reason, provider, model, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    batch.id.to_string(),
                    batch.start_ts.to_rfc3339(),
                    batch.end_ts.to_rfc3339(),
                    batch.status.as_str(),
                    batch.failure_reason,
                    batch.provider,
                    batch.model,
                    batch.created_at.to_rfc3339(),
                    batch.updated_at.to_rfc3339(),
                ],
            )
            .context("failed to insert batch")?;

            for segment_id in &segment_ids {
                tx.execute(
                    "INSERT INTO segment_batch_links (segment_id, batch_id) VALUES (?1, ?2)",
                    params![segment_id.to_string(), batch.id.to_string()],
                )
                .with_context(|| {
                    format!("segment {segment_id} already claimed by another batch")
                })?;
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Claim the oldest pending batch, transitioning it to `processing`.
    ///
    /// Compare-and-swap on the status column: returns `None` when there is
    /// no pending batch or another worker won the claim.
    pub async fn claim_next_pending(&self, now: DateTime<Utc>) -> Result<Option<Batch>> {
        self.execute(move |conn| {
            let candidate: Option<String> = conn
                .query_row(
                    "SELECT id FROM batches WHERE status = 'pending' ORDER BY start_ts ASC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(id) = candidate else {
                return Ok(None);
            };

            let updated = conn.execute(
                "UPDATE batches SET status = 'processing', updated_at = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![now.to_rfc3339(), id],
            )?;

            if updated != 1 {
                return Ok(None);
            }

            let batch = conn.query_row(
                &format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1"),
                params![id],
                |row| Ok(row_to_batch(row)),
            )??;
            Ok(Some(batch))
        })
        .await
    }

    pub async fn batch_by_id(&self, id: Uuid) -> Result<Option<Batch>> {
        self.execute(move |conn| {
            let batch = conn
                .query_row(
                    &format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1"),
                    params![id.to_string()],
                    |row| Ok(row_to_batch(row)),
                )
                .optional()?
                .transpose()?;
            Ok(batch)
        })
        .await
    }

    pub async fn mark_batch_completed(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "UPDATE batches SET status = 'completed', failure_reason = NULL, updated_at = ?1
                 WHERE id = ?2 AND status = 'processing'",
                params![now.to_rfc3339(), id.to_string()],
            )
            .context("failed to mark batch completed")?;
            Ok(())
        })
        .await
    }

    pub async fn mark_batch_failed(
        &self,
        id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let reason = reason.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE batches SET status = 'failed', failure_reason = ?1, updated_at = ?2
                 WHERE id = ?3",
                params![reason, now.to_rfc3339(), id.to_string()],
            )
            .context("failed to mark batch failed")?;
            Ok(())
        })
        .await
    }

    /// Return a claimed batch to `pending` without recording a failure
    /// (configuration errors consume no attempt).
    pub async fn return_batch_to_pending(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "UPDATE batches SET status = 'pending', updated_at = ?1
                 WHERE id = ?2 AND status = 'processing'",
                params![now.to_rfc3339(), id.to_string()],
            )
            .context("failed to return batch to pending")?;
            Ok(())
        })
        .await
    }

    /// Reset a failed batch for reprocessing, deleting its superseded
    /// observations in the same transaction. Returns false when the batch
    /// was not in `failed`.
    pub async fn reset_failed_batch(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let id = id.to_string();

            let updated = tx.execute(
                "UPDATE batches SET status = 'pending', failure_reason = NULL, updated_at = ?1
                 WHERE id = ?2 AND status = 'failed'",
                params![now.to_rfc3339(), id],
            )?;

            if updated == 1 {
                tx.execute("DELETE FROM observations WHERE batch_id = ?1", params![id])?;
            }

            tx.commit()?;
            Ok(updated == 1)
        })
        .await
    }

    /// Reclaim `processing` batches whose last transition is older than
    /// `cutoff` (abandoned by a crashed or shut-down worker). Returns the
    /// number of reclaimed batches.
    pub async fn reclaim_stale_processing(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<u32> {
        self.execute(move |conn| {
            let reclaimed = conn.execute(
                "UPDATE batches SET status = 'pending', updated_at = ?1
                 WHERE status = 'processing' AND updated_at < ?2",
                params![now.to_rfc3339(), cutoff.to_rfc3339()],
            )?;
            Ok(reclaimed as u32)
        })
        .await
    }

    pub async fn batch_status_counts(&self) -> Result<BatchStatusCounts> {
        self.execute(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM batches GROUP BY status")?;
            let mut rows = stmt.query([])?;

            let mut counts = BatchStatusCounts::default();
            while let Some(row) = rows.next()? {
                let status: String = row.get(0)?;
                let count: u32 = row.get(1)?;
                match status.as_str() {
                    "pending" => counts.pending = count,
                    "processing" => counts.processing = count,
                    "completed" => counts.completed = count,
                    "failed" => counts.failed = count,
                    _ => {}
                }
            }
            Ok(counts)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Segment;
    use chrono::{Duration, TimeZone};
    use std::path::PathBuf;
    use tempfile::TempDir;

    async fn test_db() -> (Database, TempDir) {
        let temp = TempDir::new().unwrap();
        let db = Database::open(temp.path().join("test.db")).unwrap();
        (db, temp)
    }

    async fn seed_segments(db: &Database, count: i64) -> Vec<Segment> {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let mut segments = Vec::new();
        for i in 0..count {
            let start = base + Duration::seconds(i * 15);
            let segment = Segment::ready(
                start,
                start + Duration::seconds(15),
                PathBuf::from(format!("/tmp/chunk-{i}.mp4")),
            );
            db.register_segment(&segment, None).await.unwrap();
            segments.push(segment);
        }
        segments
    }

    #[tokio::test]
    async fn test_batch_and_links_are_atomic() {
        let (db, _temp) = test_db().await;
        let segments = seed_segments(&db, 3).await;

        let batch = Batch::pending(
            segments[0].start_ts,
            segments[2].end_ts,
            "cloud",
            "flash-2",
        );
        let ids: Vec<Uuid> = segments.iter().map(|s| s.id).collect();
        db.insert_batch_with_links(&batch, ids.clone()).await.unwrap();

        // All three segments are now claimed
        assert!(db.unbatched_ready_segments().await.unwrap().is_empty());

        // A second batch over any of the same segments must fail whole
        let second = Batch::pending(
            segments[0].start_ts,
            segments[2].end_ts,
            "cloud",
            "flash-2",
        );
        let result = db.insert_batch_with_links(&second, vec![ids[1]]).await;
        assert!(result.is_err());

        // And must not leave a dangling batch row behind
        assert!(db.batch_by_id(second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (db, _temp) = test_db().await;
        let segments = seed_segments(&db, 1).await;

        let batch = Batch::pending(segments[0].start_ts, segments[0].end_ts, "cloud", "flash-2");
        db.insert_batch_with_links(&batch, vec![segments[0].id])
            .await
            .unwrap();

        let now = Utc::now();
        let first = db.claim_next_pending(now).await.unwrap();
        let second = db.claim_next_pending(now).await.unwrap();

        assert_eq!(first.map(|b| b.id), Some(batch.id));
        assert!(second.is_none(), "only one claim may win");
    }

    #[tokio::test]
    async fn test_reset_failed_deletes_observations() {
        let (db, _temp) = test_db().await;
        let segments = seed_segments(&db, 1).await;

        let batch = Batch::pending(segments[0].start_ts, segments[0].end_ts, "cloud", "flash-2");
        db.insert_batch_with_links(&batch, vec![segments[0].id])
            .await
            .unwrap();

        let now = Utc::now();
        db.claim_next_pending(now).await.unwrap().unwrap();

        let observation = crate::domain::Observation::new(
            batch.id,
            batch.start_ts,
            batch.end_ts,
            "typing in an editor",
            "flash-2",
        );
        db.insert_observations(vec![observation]).await.unwrap();

        db.mark_batch_failed(batch.id, "provider exploded", now)
            .await
            .unwrap();

        assert!(db.reset_failed_batch(batch.id, now).await.unwrap());
        let reloaded = db.batch_by_id(batch.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, BatchStatus::Pending);
        assert!(reloaded.failure_reason.is_none());
        assert!(db
            .observations_for_batch(batch.id)
            .await
            .unwrap()
            .is_empty());

        // Resetting a non-failed batch is a no-op
        assert!(!db.reset_failed_batch(batch.id, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_processing_reclaim() {
        let (db, _temp) = test_db().await;
        let segments = seed_segments(&db, 1).await;

        let batch = Batch::pending(segments[0].start_ts, segments[0].end_ts, "cloud", "flash-2");
        db.insert_batch_with_links(&batch, vec![segments[0].id])
            .await
            .unwrap();

        let claimed_at = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        db.claim_next_pending(claimed_at).await.unwrap().unwrap();

        // Too fresh to reclaim
        let cutoff = claimed_at - Duration::minutes(10);
        assert_eq!(
            db.reclaim_stale_processing(cutoff, Utc::now()).await.unwrap(),
            0
        );

        // Past the timeout the batch returns to pending
        let cutoff = claimed_at + Duration::minutes(10);
        assert_eq!(
            db.reclaim_stale_processing(cutoff, Utc::now()).await.unwrap(),
            1
        );
        let reloaded = db.batch_by_id(batch.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, BatchStatus::Pending);
    }

    #[tokio::test]
    async fn test_status_counts() {
        let (db, _temp) = test_db().await;
        let segments = seed_segments(&db, 2).await;

        for segment in &segments {
            let batch = Batch::pending(segment.start_ts, segment.end_ts, "cloud", "flash-2");
            db.insert_batch_with_links(&batch, vec![segment.id])
                .await
                .unwrap();
        }

        let now = Utc::now();
        let claimed = db.claim_next_pending(now).await.unwrap().unwrap();
        db.mark_batch_failed(claimed.id, "boom", now).await.unwrap();

        let counts = db.batch_status_counts().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.processing, 0);
    }
}
