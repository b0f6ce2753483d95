//! Activity card repository.
//!
//! Cards are only ever written through `replace_cards_in_window`: one
//! transaction deletes every card overlapping the range and inserts the
//! replacement set, so readers never observe a half-swapped window.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::domain::{ActivityCard, Interruption};

use super::{parse_datetime, parse_uuid, Database};

fn row_to_card(row: &Row) -> Result<ActivityCard> {
    let interruptions: Vec<Interruption> =
        serde_json::from_str(&row.get::<_, String>("interruptions")?)
            .context("failed to parse interruptions column")?;

    Ok(ActivityCard {
        id: parse_uuid(&row.get::<_, String>("id")?)?,
        batch_id: parse_uuid(&row.get::<_, String>("batch_id")?)?,
        start_ts: parse_datetime(&row.get::<_, String>("start_ts")?)?,
        end_ts: parse_datetime(&row.get::<_, String>("end_ts")?)?,
        day_key: row.get::<_, String>("day_key")?,
        title: row.get::<_, String>("title")?,
        summary: row.get::<_, String>("summary")?,
        detailed_summary: row.get::<_, String>("detailed_summary")?,
        category: row.get::<_, String>("category")?,
        subcategory: row.get::<_, Option<String>>("subcategory")?,
        interruptions,
        media_path: row
            .get::<_, Option<String>>("media_path")?
            .map(PathBuf::from),
        created_at: parse_datetime(&row.get::<_, String>("created_at")?)?,
    })
}

const CARD_COLUMNS: &str = "id, batch_id, start_ts, end_ts, day_key, title, summary, \
     detailed_summary, category, subcategory, interruptions, media_path, created_at";

impl Database {
    /// Atomically replace all cards overlapping `[start, end)` with the
    /// given set. Returns the removed cards so the caller can clean up
    /// media artifacts they exclusively referenced.
    pub async fn replace_cards_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cards: Vec<ActivityCard>,
    ) -> Result<Vec<ActivityCard>> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let removed = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {CARD_COLUMNS} FROM activity_cards
                     WHERE start_ts < ?2 AND end_ts > ?1"
                ))?;
                let mut rows = stmt.query(params![start.to_rfc3339(), end.to_rfc3339()])?;
                let mut removed = Vec::new();
                while let Some(row) = rows.next()? {
                    removed.push(row_to_card(row)?);
                }
                removed
            };

            tx.execute(
                "DELETE FROM activity_cards WHERE start_ts < ?2 AND end_ts > ?1",
                params![start.to_rfc3339(), end.to_rfc3339()],
            )?;

            for card in &cards {
                let interruptions = serde_json::to_string(&card.interruptions)
                    .context("failed to serialize interruptions")?;
                tx.execute(
                    "INSERT INTO activity_cards (id, batch_id, start_ts, end_ts, day_key, title, summary, detailed_summary, category, subcategory, interruptions, media_path, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        card.id.to_string(),
                        card.batch_id.to_string(),
                        card.start_ts.to_rfc3339(),
                        card.end_ts.to_rfc3339(),
                        card.day_key,
                        card.title,
                        card.summary,
                        card.detailed_summary,
                        card.category,
                        card.subcategory,
                        interruptions,
                        card.media_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                        card.created_at.to_rfc3339(),
                    ],
                )?;
            }

            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    /// Cards for a logical day, ordered by start time.
    pub async fn cards_for_day(&self, day_key: &str) -> Result<Vec<ActivityCard>> {
        let day_key = day_key.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CARD_COLUMNS} FROM activity_cards
                 WHERE day_key = ?1
                 ORDER BY start_ts ASC"
            ))?;

            let mut rows = stmt.query(params![day_key])?;
            let mut cards = Vec::new();
            while let Some(row) = rows.next()? {
                cards.push(row_to_card(row)?);
            }
            Ok(cards)
        })
        .await
    }

    /// Cards whose range intersects `[start, end)`, ordered by start time.
    pub async fn cards_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ActivityCard>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CARD_COLUMNS} FROM activity_cards
                 WHERE start_ts < ?2 AND end_ts > ?1
                 ORDER BY start_ts ASC"
            ))?;

            let mut rows = stmt.query(params![start.to_rfc3339(), end.to_rfc3339()])?;
            let mut cards = Vec::new();
            while let Some(row) = rows.next()? {
                cards.push(row_to_card(row)?);
            }
            Ok(cards)
        })
        .await
    }

    /// How many cards still reference a media path. Drives best-effort
    /// artifact cleanup after a window replace.
    pub async fn media_reference_count(&self, path: PathBuf) -> Result<u32> {
        self.execute(move |conn| {
            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM activity_cards WHERE media_path = ?1",
                params![path.to_string_lossy().to_string()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::day_key_for;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn card(start: DateTime<Utc>, minutes: i64, title: &str) -> ActivityCard {
        ActivityCard {
            id: Uuid::new_v4(),
            batch_id: Uuid::new_v4(),
            start_ts: start,
            end_ts: start + Duration::minutes(minutes),
            day_key: day_key_for(start, 4),
            title: title.to_string(),
            summary: format!("{title} summary"),
            detailed_summary: String::new(),
            category: "Work".to_string(),
            subcategory: None,
            interruptions: Vec::new(),
            media_path: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_replace_swaps_only_overlapping_cards() {
        let temp = TempDir::new().unwrap();
        let db = Database::open(temp.path().join("test.db")).unwrap();

        let base = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let early = card(base, 30, "Email");
        let inside = card(base + Duration::hours(1), 30, "Coding");
        db.replace_cards_in_window(early.start_ts, inside.end_ts, vec![early.clone(), inside.clone()])
            .await
            .unwrap();

        // Replace the later hour only
        let replacement = card(base + Duration::hours(1), 50, "Coding and review");
        let removed = db
            .replace_cards_in_window(
                base + Duration::hours(1),
                base + Duration::hours(2),
                vec![replacement.clone()],
            )
            .await
            .unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, inside.id);

        let day = db.cards_for_day(&early.day_key).await.unwrap();
        let titles: Vec<&str> = day.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Email", "Coding and review"]);
    }

    #[tokio::test]
    async fn test_interruptions_round_trip() {
        let temp = TempDir::new().unwrap();
        let db = Database::open(temp.path().join("test.db")).unwrap();

        let base = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut with_break = card(base, 60, "Writing");
        with_break.interruptions = vec![Interruption {
            start_ts: base + Duration::minutes(20),
            end_ts: base + Duration::minutes(25),
            title: "Checked messages".to_string(),
        }];

        db.replace_cards_in_window(base, base + Duration::hours(1), vec![with_break.clone()])
            .await
            .unwrap();

        let reloaded = db.cards_for_day(&with_break.day_key).await.unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].interruptions.len(), 1);
        assert_eq!(reloaded[0].interruptions[0].title, "Checked messages");
    }

    #[tokio::test]
    async fn test_media_reference_count() {
        let temp = TempDir::new().unwrap();
        let db = Database::open(temp.path().join("test.db")).unwrap();

        let base = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap();
        let mut first = card(base, 30, "A");
        let mut second = card(base + Duration::minutes(30), 30, "B");
        let media = PathBuf::from("/tmp/timelapse.mp4");
        first.media_path = Some(media.clone());
        second.media_path = Some(media.clone());

        db.replace_cards_in_window(base, base + Duration::hours(1), vec![first, second])
            .await
            .unwrap();

        assert_eq!(db.media_reference_count(media).await.unwrap(), 2);
    }
}
