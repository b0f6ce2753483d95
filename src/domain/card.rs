//! Activity cards.
//!
//! Cards are the durable, user-visible unit of the timeline. For a given
//! day key they are non-overlapping and ordered by start time. They are
//! created and destroyed only through the consolidator's atomic window
//! replace, so a window's content is always the result of one provider
//! round trip.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A consolidated record of one continuous activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityCard {
    /// Unique identifier
    pub id: Uuid,

    /// Batch whose consolidation produced this card
    pub batch_id: Uuid,

    /// When the activity started
    pub start_ts: DateTime<Utc>,

    /// When the activity ended
    pub end_ts: DateTime<Utc>,

    /// Logical day the card belongs to (`YYYY-MM-DD`)
    pub day_key: String,

    /// Short title, e.g. "Reviewing pull requests"
    pub title: String,

    /// One-sentence summary
    pub summary: String,

    /// Longer narrative of the activity
    pub detailed_summary: String,

    /// Category label, normalized onto the configured list
    pub category: String,

    /// Optional finer-grained label, free text from the backend
    pub subcategory: Option<String>,

    /// Sub-intervals where the main activity was interrupted, in order
    pub interruptions: Vec<Interruption>,

    /// Optional media artifact for the card (e.g. a timelapse file)
    pub media_path: Option<PathBuf>,

    /// When the row was created
    pub created_at: DateTime<Utc>,
}

impl ActivityCard {
    /// Whether this card's range intersects `[start, end)`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start_ts < end && self.end_ts > start
    }

    /// Card span in seconds.
    pub fn duration_secs(&self) -> f64 {
        (self.end_ts - self.start_ts).num_milliseconds() as f64 / 1000.0
    }
}

/// A sub-interval during which the card's main activity was interrupted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interruption {
    pub start_ts: DateTime<Utc>,
    pub end_ts: DateTime<Utc>,
    pub title: String,
}

/// Compute the logical day key for a timestamp.
///
/// The day boundary is shifted back from midnight by `day_start_hour`
/// hours, so activity shortly after midnight attaches to the preceding
/// day (e.g. with a 4 o'clock boundary, 01:30 belongs to yesterday).
pub fn day_key_for(ts: DateTime<Utc>, day_start_hour: u32) -> String {
    let shifted = ts - Duration::hours(i64::from(day_start_hour));
    shifted.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_day_key_daytime() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 14, 0, 0).unwrap();
        assert_eq!(day_key_for(ts, 4), "2026-03-01");
    }

    #[test]
    fn test_day_key_late_night_attaches_to_previous_day() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 1, 30, 0).unwrap();
        assert_eq!(day_key_for(ts, 4), "2026-03-01");

        // Exactly at the boundary the new day starts
        let boundary = Utc.with_ymd_and_hms(2026, 3, 2, 4, 0, 0).unwrap();
        assert_eq!(day_key_for(boundary, 4), "2026-03-02");
    }

    #[test]
    fn test_overlaps() {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let end = start + Duration::minutes(30);
        let card = ActivityCard {
            id: Uuid::new_v4(),
            batch_id: Uuid::new_v4(),
            start_ts: start,
            end_ts: end,
            day_key: "2026-03-01".to_string(),
            title: "Work".to_string(),
            summary: String::new(),
            detailed_summary: String::new(),
            category: "Work".to_string(),
            subcategory: None,
            interruptions: Vec::new(),
            media_path: None,
            created_at: Utc::now(),
        };

        assert!(card.overlaps(start - Duration::minutes(5), start + Duration::minutes(5)));
        assert!(card.overlaps(start + Duration::minutes(10), end + Duration::minutes(10)));
        // Touching ranges do not overlap
        assert!(!card.overlaps(end, end + Duration::minutes(10)));
        assert!(!card.overlaps(start - Duration::minutes(10), start));
    }
}
