//! Playlist items and their day/time validity rules.
//!
//! A playlist item is valid at a given local time iff:
//!
//! 1. its `daysOfWeek` set is absent, empty, or contains today (0 = Sunday), and
//! 2. it has no time window, or the current minute lies in `[start, end)`.
//!
//! Windows whose start is after their end wrap midnight, so `22:00–06:00`
//! covers the late evening and the early morning.

use std::time::Duration;

use chrono::{Datelike, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::warn;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Errors raised while interpreting playlist fields.
#[derive(Debug, Error, PartialEq)]
pub enum PlaylistError {
    /// A `timeWindowStart`/`timeWindowEnd` value is not `HH:mm`.
    #[error("invalid time of day '{0}', expected HH:mm")]
    InvalidTimeOfDay(String),
}

/// The content an item points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRef {
    /// Absolute URL or a path relative to the server origin.
    pub url: String,
    /// Human-readable name (informational only).
    #[serde(default)]
    pub name: String,
}

/// One schedulable unit of content.
///
/// Items are replaced wholesale on every content update and never mutated by
/// the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub content_id: String,
    pub content: ContentRef,
    /// Display time in milliseconds; `0` means permanent.
    #[serde(default)]
    pub display_duration: u64,
    #[serde(default)]
    pub order_index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window_start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window_end: Option<String>,
    /// Allowed days, 0 = Sunday … 6 = Saturday.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<Vec<u8>>,
}

/// A parsed `[start, end)` time-of-day window with minute granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    /// Parses a window from its two `HH:mm` bounds.
    ///
    /// # Errors
    ///
    /// Returns [`PlaylistError::InvalidTimeOfDay`] if either bound is malformed.
    pub fn parse(start: &str, end: &str) -> Result<Self, PlaylistError> {
        Ok(Self {
            start: parse_time_of_day(start)?,
            end: parse_time_of_day(end)?,
        })
    }

    /// Returns `true` if the minute containing `time` lies inside the window.
    pub fn contains(&self, time: NaiveTime) -> bool {
        let now = minute_of_day(time);
        let start = minute_of_day(self.start);
        let end = minute_of_day(self.end);
        if start <= end {
            now >= start && now < end
        } else {
            now >= start || now < end
        }
    }

    /// Time left until the window closes, measured from `time`.
    ///
    /// Only meaningful while `contains(time)` holds.
    pub fn remaining(&self, time: NaiveTime) -> Duration {
        let now_secs = time.num_seconds_from_midnight();
        let end_secs = self.end.num_seconds_from_midnight();
        let secs = if end_secs > now_secs {
            end_secs - now_secs
        } else {
            end_secs + MINUTES_PER_DAY * 60 - now_secs
        };
        Duration::from_secs(u64::from(secs))
    }
}

impl PlaylistItem {
    /// The configured display time; zero for permanent items.
    pub fn display_duration(&self) -> Duration {
        Duration::from_millis(self.display_duration)
    }

    pub fn is_permanent(&self) -> bool {
        self.display_duration == 0
    }

    /// Returns the item's time window, if both bounds are present and valid.
    ///
    /// A malformed bound is logged and treated as "no window" so a typo on the
    /// server never blanks the screen.
    pub fn time_window(&self) -> Option<TimeWindow> {
        let (start, end) = match (&self.time_window_start, &self.time_window_end) {
            (Some(s), Some(e)) if !s.is_empty() && !e.is_empty() => (s, e),
            _ => return None,
        };
        match TimeWindow::parse(start, end) {
            Ok(window) => Some(window),
            Err(e) => {
                warn!("playlist item {}: ignoring time window: {e}", self.id);
                None
            }
        }
    }

    /// Returns `true` if the item may be shown on the day of `now`.
    pub fn runs_on(&self, now: NaiveDateTime) -> bool {
        match &self.days_of_week {
            None => true,
            Some(days) if days.is_empty() => true,
            Some(days) => {
                let today = now.weekday().num_days_from_sunday();
                days.iter().any(|d| u32::from(*d) == today)
            }
        }
    }

    /// Applies the full validity predicate at `now` (local time).
    pub fn is_valid_at(&self, now: NaiveDateTime) -> bool {
        if !self.runs_on(now) {
            return false;
        }
        self.time_window()
            .map_or(true, |window| window.contains(now.time()))
    }

    /// Returns `true` if any field that affects rotation timing differs.
    ///
    /// Day sets are compared as sets: `[1, 2]` and `[2, 1]` are equal.
    pub fn scheduling_differs(&self, other: &PlaylistItem) -> bool {
        self.display_duration != other.display_duration || self.validity_differs(other)
    }

    /// Returns `true` if the window or the day set differs, i.e. the two
    /// items may be valid at different times.
    pub fn validity_differs(&self, other: &PlaylistItem) -> bool {
        self.time_window_start != other.time_window_start
            || self.time_window_end != other.time_window_end
            || normalized_days(&self.days_of_week) != normalized_days(&other.days_of_week)
    }
}

/// Parses `HH:mm` (seconds, if present, are ignored).
///
/// # Errors
///
/// Returns [`PlaylistError::InvalidTimeOfDay`] for anything else.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, PlaylistError> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
        .map(|t| t.with_second(0).unwrap_or(t))
        .map_err(|_| PlaylistError::InvalidTimeOfDay(value.to_string()))
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

fn normalized_days(days: &Option<Vec<u8>>) -> Vec<u8> {
    let mut out = days.clone().unwrap_or_default();
    out.sort_unstable();
    out.dedup();
    out
}

/// Accepts ids sent either as JSON strings or numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(f) => f.to_string(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;

    /// Builds an unconstrained item with the given id, duration, and order.
    pub(crate) fn item(id: &str, duration_ms: u64, order: i64) -> PlaylistItem {
        PlaylistItem {
            id: id.to_string(),
            content_id: format!("content-{id}"),
            content: ContentRef {
                url: format!("https://cdn.example.com/{id}"),
                name: id.to_uppercase(),
            },
            display_duration: duration_ms,
            order_index: order,
            time_window_start: None,
            time_window_end: None,
            days_of_week: None,
        }
    }

    /// 2024-06-05 was a Wednesday (day index 3).
    pub(crate) fn wednesday_at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 5)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_item_without_constraints_is_always_valid() {
        let it = item("a", 5000, 0);
        assert!(it.is_valid_at(wednesday_at(0, 0)));
        assert!(it.is_valid_at(wednesday_at(23, 59)));
    }

    #[test]
    fn test_window_is_half_open_at_minute_granularity() {
        // Arrange
        let mut it = item("b", 5000, 0);
        it.time_window_start = Some("09:00".into());
        it.time_window_end = Some("17:00".into());

        // Assert
        assert!(!it.is_valid_at(wednesday_at(8, 59)));
        assert!(it.is_valid_at(wednesday_at(9, 0)));
        assert!(it.is_valid_at(wednesday_at(16, 59)));
        assert!(!it.is_valid_at(wednesday_at(17, 0)));
        assert!(!it.is_valid_at(wednesday_at(20, 0)));
    }

    #[test]
    fn test_overnight_window_wraps_midnight() {
        let window = TimeWindow::parse("22:00", "06:00").unwrap();
        assert!(window.contains(NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
        assert!(window.contains(NaiveTime::from_hms_opt(5, 59, 0).unwrap()));
        assert!(!window.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }

    #[test]
    fn test_days_of_week_uses_sunday_as_zero() {
        let mut it = item("c", 0, 0);
        it.days_of_week = Some(vec![3]);
        assert!(it.is_valid_at(wednesday_at(12, 0)));

        it.days_of_week = Some(vec![0, 6]);
        assert!(!it.is_valid_at(wednesday_at(12, 0)));
    }

    #[test]
    fn test_empty_days_of_week_means_every_day() {
        let mut it = item("d", 0, 0);
        it.days_of_week = Some(vec![]);
        assert!(it.is_valid_at(wednesday_at(12, 0)));
    }

    #[test]
    fn test_malformed_window_is_treated_as_unconstrained() {
        let mut it = item("e", 0, 0);
        it.time_window_start = Some("9am".into());
        it.time_window_end = Some("17:00".into());
        assert!(it.time_window().is_none());
        assert!(it.is_valid_at(wednesday_at(3, 0)));
    }

    #[test]
    fn test_remaining_counts_to_window_end() {
        let window = TimeWindow::parse("09:00", "17:00").unwrap();
        let left = window.remaining(NaiveTime::from_hms_opt(16, 59, 30).unwrap());
        assert_eq!(left, Duration::from_secs(30));
    }

    #[test]
    fn test_remaining_wraps_for_overnight_window() {
        let window = TimeWindow::parse("22:00", "06:00").unwrap();
        let left = window.remaining(NaiveTime::from_hms_opt(23, 0, 0).unwrap());
        assert_eq!(left, Duration::from_secs(7 * 3600));
    }

    #[test]
    fn test_parse_time_of_day_accepts_seconds() {
        let t = parse_time_of_day("07:30:45").unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_time_of_day_rejects_garbage() {
        assert_eq!(
            parse_time_of_day("25:99"),
            Err(PlaylistError::InvalidTimeOfDay("25:99".into()))
        );
    }

    #[test]
    fn test_scheduling_differs_ignores_day_order() {
        let mut a = item("x", 1000, 0);
        let mut b = a.clone();
        a.days_of_week = Some(vec![1, 2]);
        b.days_of_week = Some(vec![2, 1]);
        assert!(!a.scheduling_differs(&b));

        b.display_duration = 2000;
        assert!(a.scheduling_differs(&b));
    }

    #[test]
    fn test_scheduling_ignores_content_changes() {
        let a = item("x", 1000, 0);
        let mut b = a.clone();
        b.content.name = "renamed".into();
        b.order_index = 7;
        assert!(!a.scheduling_differs(&b));
    }

    #[test]
    fn test_item_deserializes_numeric_ids() {
        // Arrange
        let json = r#"{
            "id": 17,
            "contentId": 4,
            "content": {"url": "/media/welcome.html", "name": "Welcome"},
            "displayDuration": 10000,
            "orderIndex": 2,
            "daysOfWeek": [1, 2, 3]
        }"#;

        // Act
        let it: PlaylistItem = serde_json::from_str(json).unwrap();

        // Assert
        assert_eq!(it.id, "17");
        assert_eq!(it.content_id, "4");
        assert_eq!(it.display_duration(), Duration::from_secs(10));
        assert_eq!(it.days_of_week, Some(vec![1, 2, 3]));
        assert!(it.time_window_start.is_none());
    }
}
