//! Observation repository.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::domain::Observation;

use super::{parse_datetime, parse_uuid, Database};

fn row_to_observation(row: &Row) -> Result<Observation> {
    Ok(Observation {
        id: parse_uuid(&row.get::<_, String>("id")?)?,
        batch_id: parse_uuid(&row.get::<_, String>("batch_id")?)?,
        start_ts: parse_datetime(&row.get::<_, String>("start_ts")?)?,
        end_ts: parse_datetime(&row.get::<_, String>("end_ts")?)?,
        text: row.get::<_, String>("text")?,
        model_id: row.get::<_, String>("model_id")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?)?,
    })
}

const OBSERVATION_COLUMNS: &str =
    "id, batch_id, start_ts, end_ts, text, model_id, created_at";

impl Database {
    /// Insert a batch's observations in one transaction.
    pub async fn insert_observations(&self, observations: Vec<Observation>) -> Result<()> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            for obs in &observations {
                tx.execute(
                    "INSERT INTO observations (id, batch_id, start_ts, end_ts, text, model_id, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        obs.id.to_string(),
                        obs.batch_id.to_string(),
                        obs.start_ts.to_rfc3339(),
                        obs.end_ts.to_rfc3339(),
                        obs.text,
                        obs.model_id,
                        obs.created_at.to_rfc3339(),
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn observations_for_batch(&self, batch_id: Uuid) -> Result<Vec<Observation>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations
                 WHERE batch_id = ?1
                 ORDER BY start_ts ASC"
            ))?;

            let mut rows = stmt.query(params![batch_id.to_string()])?;
            let mut observations = Vec::new();
            while let Some(row) = rows.next()? {
                observations.push(row_to_observation(row)?);
            }
            Ok(observations)
        })
        .await
    }

    /// Observations whose range intersects `[start, end)`.
    pub async fn observations_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations
                 WHERE start_ts < ?2 AND end_ts > ?1
                 ORDER BY start_ts ASC"
            ))?;

            let mut rows = stmt.query(params![start.to_rfc3339(), end.to_rfc3339()])?;
            let mut observations = Vec::new();
            while let Some(row) = rows.next()? {
                observations.push(row_to_observation(row)?);
            }
            Ok(observations)
        })
        .await
    }
}
