//! Segment repository.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use crate::domain::{Segment, SegmentStatus};

use super::{parse_datetime, parse_uuid, Database};

fn row_to_segment(row: &Row) -> Result<Segment> {
    Ok(Segment {
        id: parse_uuid(&row.get::<_, String>("id")?)?,
        start_ts: parse_datetime(&row.get::<_, String>("start_ts")?)?,
        end_ts: parse_datetime(&row.get::<_, String>("end_ts")?)?,
        file_path: PathBuf::from(row.get::<_, String>("file_path")?),
        status: SegmentStatus::parse(&row.get::<_, String>("status")?)
            .ok_or_else(|| anyhow::anyhow!("unknown segment status"))?,
        deleted: row.get::<_, i64>("deleted")? != 0,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?)?,
    })
}

const SEGMENT_COLUMNS: &str =
    "id, start_ts, end_ts, file_path, status, deleted, created_at";

impl Database {
    /// Register a segment. Idempotent on file path and content hash:
    /// returns false when the chunk was already registered.
    pub async fn register_segment(
        &self,
        segment: &Segment,
        content_hash: Option<String>,
    ) -> Result<bool> {
        let segment = segment.clone();
        self.execute(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO segments (id, start_ts, end_ts, file_path, content_hash, status, deleted, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT DO NOTHING",
                params![
                    segment.id.to_string(),
                    segment.start_ts.to_rfc3339(),
                    segment.end_ts.to_rfc3339(),
                    segment.file_path.to_string_lossy().to_string(),
                    content_hash,
                    segment.status.as_str(),
                    segment.deleted as i64,
                    segment.created_at.to_rfc3339(),
                ],
            )
            .context("failed to insert segment")?;
            Ok(inserted == 1)
        })
        .await
    }

    /// All `ready`, non-deleted segments not yet linked to any batch,
    /// ordered by start time.
    pub async fn unbatched_ready_segments(&self) -> Result<Vec<Segment>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SEGMENT_COLUMNS} FROM segments s
                 WHERE s.status = 'ready'
                   AND s.deleted = 0
                   AND NOT EXISTS (
                       SELECT 1 FROM segment_batch_links l WHERE l.segment_id = s.id
                   )
                 ORDER BY s.start_ts ASC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut segments = Vec::new();
            while let Some(row) = rows.next()? {
                segments.push(row_to_segment(row)?);
            }
            Ok(segments)
        })
        .await
    }

    /// Segments linked to a batch, ordered by start time.
    pub async fn segments_for_batch(&self, batch_id: Uuid) -> Result<Vec<Segment>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SEGMENT_COLUMNS} FROM segments s
                 JOIN segment_batch_links l ON l.segment_id = s.id
                 WHERE l.batch_id = ?1
                 ORDER BY s.start_ts ASC"
            ))?;

            let mut rows = stmt.query(params![batch_id.to_string()])?;
            let mut segments = Vec::new();
            while let Some(row) = rows.next()? {
                segments.push(row_to_segment(row)?);
            }
            Ok(segments)
        })
        .await
    }

    pub async fn segment_by_id(&self, id: Uuid) -> Result<Option<Segment>> {
        self.execute(move |conn| {
            let segment = conn
                .query_row(
                    &format!("SELECT {SEGMENT_COLUMNS} FROM segments WHERE id = ?1"),
                    params![id.to_string()],
                    |row| Ok(row_to_segment(row)),
                )
                .optional()?
                .transpose()?;
            Ok(segment)
        })
        .await
    }

    pub async fn mark_segment_status(&self, id: Uuid, status: SegmentStatus) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                "UPDATE segments SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id.to_string()],
            )
            .context("failed to update segment status")?;
            Ok(())
        })
        .await
    }

    /// Flag segments whose chunk files have been removed.
    pub async fn mark_segments_deleted(&self, ids: Vec<Uuid>) -> Result<()> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            for id in &ids {
                tx.execute(
                    "UPDATE segments SET deleted = 1 WHERE id = ?1",
                    params![id.to_string()],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Segments whose recording ended before `cutoff` and whose chunk
    /// files are still around (retention sweep candidates).
    pub async fn segments_ended_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Segment>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SEGMENT_COLUMNS} FROM segments
                 WHERE end_ts < ?1 AND deleted = 0
                 ORDER BY start_ts ASC"
            ))?;

            let mut rows = stmt.query(params![cutoff.to_rfc3339()])?;
            let mut segments = Vec::new();
            while let Some(row) = rows.next()? {
                segments.push(row_to_segment(row)?);
            }
            Ok(segments)
        })
        .await
    }

    /// Destroy expired segments whose chunk files are gone. Rows without
    /// a batch link are removed outright; rows still linked to a batch
    /// are kept for provenance with the deleted flag set.
    pub async fn destroy_segments(&self, ids: Vec<Uuid>) -> Result<()> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            for id in &ids {
                let id = id.to_string();
                let linked: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM segment_batch_links WHERE segment_id = ?1)",
                    params![id],
                    |row| row.get(0),
                )?;
                if linked {
                    tx.execute(
                        "UPDATE segments SET deleted = 1 WHERE id = ?1",
                        params![id],
                    )?;
                } else {
                    tx.execute("DELETE FROM segments WHERE id = ?1", params![id])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// File paths of all live (non-deleted) segments; used by the orphan
    /// sweep to decide which chunk files on disk are still referenced.
    pub async fn live_segment_paths(&self) -> Result<Vec<PathBuf>> {
        self.execute(|conn| {
            let mut stmt =
                conn.prepare("SELECT file_path FROM segments WHERE deleted = 0")?;
            let mut rows = stmt.query([])?;
            let mut paths = Vec::new();
            while let Some(row) = rows.next()? {
                paths.push(PathBuf::from(row.get::<_, String>(0)?));
            }
            Ok(paths)
        })
        .await
    }
}
