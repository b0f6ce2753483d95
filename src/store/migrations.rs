//! Schema migrations, versioned through SQLite's `user_version` pragma.

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, Transaction};

const CURRENT_SCHEMA_VERSION: i32 = 1;

pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .context("failed to read user_version pragma")?;

    if version > CURRENT_SCHEMA_VERSION {
        bail!(
            "database version ({}) is newer than supported schema ({})",
            version,
            CURRENT_SCHEMA_VERSION
        );
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .context("failed to open migration transaction")?;

    while version < CURRENT_SCHEMA_VERSION {
        let next_version = version + 1;
        apply_migration(&tx, next_version)
            .with_context(|| format!("migration to version {next_version} failed"))?;
        version = next_version;
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)
        .context("failed to update user_version pragma")?;
    tx.commit().context("failed to commit migrations")?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<()> {
    match version {
        1 => {
            tx.execute_batch(SCHEMA_V1)
                .context("failed to execute schema v1")?;
            Ok(())
        }
        other => bail!("no migration defined for version {other}"),
    }
}

const SCHEMA_V1: &str = r#"
CREATE TABLE segments (
    id          TEXT PRIMARY KEY,
    start_ts    TEXT NOT NULL,
    end_ts      TEXT NOT NULL,
    file_path   TEXT NOT NULL UNIQUE,
    content_hash TEXT UNIQUE,
    status      TEXT NOT NULL,
    deleted     INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL
);
CREATE INDEX idx_segments_start ON segments(start_ts);
CREATE INDEX idx_segments_status ON segments(status);

CREATE TABLE batches (
    id             TEXT PRIMARY KEY,
    start_ts       TEXT NOT NULL,
    end_ts         TEXT NOT NULL,
    status         TEXT NOT NULL,
    failure_reason TEXT,
    provider       TEXT NOT NULL,
    model          TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);
CREATE INDEX idx_batches_status ON batches(status);
CREATE INDEX idx_batches_start ON batches(start_ts);

CREATE TABLE segment_batch_links (
    segment_id TEXT NOT NULL UNIQUE REFERENCES segments(id),
    batch_id   TEXT NOT NULL REFERENCES batches(id)
);
CREATE INDEX idx_links_batch ON segment_batch_links(batch_id);

CREATE TABLE observations (
    id         TEXT PRIMARY KEY,
    batch_id   TEXT NOT NULL,
    start_ts   TEXT NOT NULL,
    end_ts     TEXT NOT NULL,
    text       TEXT NOT NULL,
    model_id   TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX idx_observations_batch ON observations(batch_id);
CREATE INDEX idx_observations_range ON observations(start_ts, end_ts);

CREATE TABLE activity_cards (
    id               TEXT PRIMARY KEY,
    batch_id         TEXT NOT NULL,
    start_ts         TEXT NOT NULL,
    end_ts           TEXT NOT NULL,
    day_key          TEXT NOT NULL,
    title            TEXT NOT NULL,
    summary          TEXT NOT NULL,
    detailed_summary TEXT NOT NULL,
    category         TEXT NOT NULL,
    subcategory      TEXT,
    interruptions    TEXT NOT NULL,
    media_path       TEXT,
    created_at       TEXT NOT NULL
);
CREATE INDEX idx_cards_day ON activity_cards(day_key);
CREATE INDEX idx_cards_range ON activity_cards(start_ts, end_ts);

CREATE TABLE call_records (
    id         TEXT PRIMARY KEY,
    batch_id   TEXT,
    group_id   TEXT NOT NULL,
    attempt    INTEGER NOT NULL,
    provider   TEXT NOT NULL,
    operation  TEXT NOT NULL,
    status     TEXT NOT NULL,
    latency_ms INTEGER NOT NULL,
    request    TEXT NOT NULL,
    response   TEXT,
    error      TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX idx_calls_group ON call_records(group_id);
CREATE INDEX idx_calls_batch ON call_records(batch_id);
"#;
