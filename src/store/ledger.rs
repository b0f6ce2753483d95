//! Call ledger repository. Append-only.

use anyhow::Result;
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::domain::{CallOperation, CallRecord, CallStatus};

use super::{parse_datetime, parse_uuid, to_i64, Database};

fn row_to_record(row: &Row) -> Result<CallRecord> {
    Ok(CallRecord {
        id: parse_uuid(&row.get::<_, String>("id")?)?,
        batch_id: row
            .get::<_, Option<String>>("batch_id")?
            .map(|s| parse_uuid(&s))
            .transpose()?,
        group_id: parse_uuid(&row.get::<_, String>("group_id")?)?,
        attempt: row.get::<_, u32>("attempt")?,
        provider: row.get::<_, String>("provider")?,
        operation: CallOperation::parse(&row.get::<_, String>("operation")?)
            .ok_or_else(|| anyhow::anyhow!("unknown call operation"))?,
        status: CallStatus::parse(&row.get::<_, String>("status")?)
            .ok_or_else(|| anyhow::anyhow!("unknown call status"))?,
        latency_ms: row.get::<_, i64>("latency_ms")? as u64,
        request: row.get::<_, String>("request")?,
        response: row.get::<_, Option<String>>("response")?,
        error: row.get::<_, Option<String>>("error")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?)?,
    })
}

const CALL_COLUMNS: &str = "id, batch_id, group_id, attempt, provider, operation, status, \
     latency_ms, request, response, error, created_at";

impl Database {
    /// Append one attempt row. Rows are never updated or deleted.
    pub async fn append_call_record(&self, record: &CallRecord) -> Result<()> {
        let record = record.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO call_records (id, batch_id, group_id, attempt, provider, operation, status, latency_ms, request, response, error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    record.id.to_string(),
                    record.batch_id.map(|id| id.to_string()),
                    record.group_id.to_string(),
                    record.attempt,
                    record.provider,
                    record.operation.as_str(),
                    record.status.as_str(),
                    to_i64(record.latency_ms)?,
                    record.request,
                    record.response,
                    record.error,
                    record.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// All attempts of one logical call, in attempt order.
    pub async fn call_records_for_group(&self, group_id: Uuid) -> Result<Vec<CallRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CALL_COLUMNS} FROM call_records
                 WHERE group_id = ?1
                 ORDER BY attempt ASC"
            ))?;

            let mut rows = stmt.query(params![group_id.to_string()])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_record(row)?);
            }
            Ok(records)
        })
        .await
    }

    /// All attempts made on behalf of a batch, oldest first.
    pub async fn call_records_for_batch(&self, batch_id: Uuid) -> Result<Vec<CallRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CALL_COLUMNS} FROM call_records
                 WHERE batch_id = ?1
                 ORDER BY created_at ASC, attempt ASC"
            ))?;

            let mut rows = stmt.query(params![batch_id.to_string()])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_record(row)?);
            }
            Ok(records)
        })
        .await
    }

    /// Most recent attempts, newest first.
    pub async fn recent_call_records(&self, limit: u32) -> Result<Vec<CallRecord>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CALL_COLUMNS} FROM call_records
                 ORDER BY created_at DESC
                 LIMIT ?1"
            ))?;

            let mut rows = stmt.query(params![limit])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_record(row)?);
            }
            Ok(records)
        })
        .await
    }
}
