//! The rotation cursor, the constrained selection scan, and playlist diffing.
//!
//! # Cursor convention
//!
//! The cursor always points at the slot *after* the item currently on screen.
//! A forward scan therefore starts at the cursor, and a backward scan starts
//! two slots behind it (skipping the current item).
//!
//! ```text
//!  items:  [A] [B] [C]
//!               ^ showing B
//!                   ^ cursor
//! ```

use std::time::Duration;

use chrono::NaiveDateTime;

use crate::domain::playlist::PlaylistItem;

/// Substitute display time for permanent items in a multi-item playlist.
pub const DEFAULT_ROTATION_INTERVAL: Duration = Duration::from_secs(15);

/// Retry delay when no item is valid right now.
pub const NO_VALID_ITEM_RETRY: Duration = Duration::from_secs(60);

/// An ordered playlist plus its rotation cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rotation {
    items: Vec<PlaylistItem>,
    cursor: usize,
}

impl Rotation {
    /// Creates a rotation over `items`, stably sorted by `orderIndex`.
    pub fn new(mut items: Vec<PlaylistItem>) -> Self {
        items.sort_by_key(|item| item.order_index);
        Self { items, cursor: 0 }
    }

    pub fn items(&self) -> &[PlaylistItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Moves the cursor; wraps when `cursor >= len`.
    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = if self.items.is_empty() {
            0
        } else {
            cursor % self.items.len()
        };
    }

    pub fn get(&self, index: usize) -> Option<&PlaylistItem> {
        self.items.get(index)
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    /// Scans forward from the cursor for the first item valid at `now`.
    ///
    /// Visits at most `len` slots.  On success the cursor moves past the
    /// selected item (wrapping) and its index is returned.  Returns `None`
    /// without touching the cursor when nothing is valid.
    pub fn select_next(&mut self, now: NaiveDateTime) -> Option<usize> {
        let len = self.items.len();
        if len == 0 {
            return None;
        }
        let start = self.cursor % len;
        let found = (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&idx| self.items[idx].is_valid_at(now))?;
        self.cursor = (found + 1) % len;
        Some(found)
    }

    /// Scans backward from two slots behind the cursor for a valid item.
    pub fn select_previous(&mut self, now: NaiveDateTime) -> Option<usize> {
        let len = self.items.len();
        if len == 0 {
            return None;
        }
        let start = (self.cursor + 2 * len - 2) % len;
        let found = (0..len)
            .map(|offset| (start + len - offset) % len)
            .find(|&idx| self.items[idx].is_valid_at(now))?;
        self.cursor = (found + 1) % len;
        Some(found)
    }

    /// Advances one slot ignoring day/time constraints.
    pub fn step_forward(&mut self) -> Option<usize> {
        let len = self.items.len();
        if len == 0 {
            return None;
        }
        let idx = self.cursor % len;
        self.cursor = (idx + 1) % len;
        Some(idx)
    }

    /// Retreats one slot ignoring day/time constraints.
    pub fn step_backward(&mut self) -> Option<usize> {
        let len = self.items.len();
        if len == 0 {
            return None;
        }
        let idx = (self.cursor + 2 * len - 2) % len;
        self.cursor = (idx + 1) % len;
        Some(idx)
    }
}

/// How long `item` stays on screen before the next rotation.
///
/// Returns `None` for a lone permanent item, which is shown without any timer.
/// Permanent items in a multi-item playlist fall back to
/// [`DEFAULT_ROTATION_INTERVAL`].  Items with a time window never overrun the
/// window's end.
pub fn rotation_delay(item: &PlaylistItem, playlist_len: usize, now: NaiveDateTime) -> Option<Duration> {
    if playlist_len <= 1 && item.is_permanent() {
        return None;
    }
    let mut delay = if item.is_permanent() {
        DEFAULT_ROTATION_INTERVAL
    } else {
        item.display_duration()
    };
    if let Some(window) = item.time_window() {
        if window.contains(now.time()) {
            delay = delay.min(window.remaining(now.time()));
        }
    }
    Some(delay)
}

/// Outcome of comparing an incoming playlist with the running one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadPlan {
    /// Rotation must restart from the first valid item.
    Restart(RestartReason),
    /// The on-screen item is unaffected; keep its timer and continue.
    ///
    /// `cursor` is the new cursor value (one past the on-screen item's new
    /// position).
    Continue { cursor: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    CountChanged { old: usize, new: usize },
    SchedulingChanged { id: String },
    CurrentItemRemoved,
    NothingDisplayed,
}

/// Decides restart-versus-continue for a playlist update.
///
/// A restart is required if the item count changed, if any item present in
/// both lists (matched by id) changed its window or days, or if the on-screen
/// item changed its duration.  A new duration on some other item takes effect
/// on that item's next turn.  Otherwise rotation continues, provided the
/// on-screen item still exists.
///
/// Pure reordering with unchanged scheduling fields does not force a restart.
pub fn plan_reload(
    current: &[PlaylistItem],
    incoming: &[PlaylistItem],
    displayed_id: Option<&str>,
) -> ReloadPlan {
    if current.len() != incoming.len() {
        return ReloadPlan::Restart(RestartReason::CountChanged {
            old: current.len(),
            new: incoming.len(),
        });
    }

    for new_item in incoming {
        if let Some(old_item) = current.iter().find(|old| old.id == new_item.id) {
            let displayed = displayed_id == Some(new_item.id.as_str());
            let changed = if displayed {
                old_item.scheduling_differs(new_item)
            } else {
                old_item.validity_differs(new_item)
            };
            if changed {
                return ReloadPlan::Restart(RestartReason::SchedulingChanged {
                    id: new_item.id.clone(),
                });
            }
        }
    }

    let Some(displayed_id) = displayed_id else {
        return ReloadPlan::Restart(RestartReason::NothingDisplayed);
    };

    let mut sorted: Vec<&PlaylistItem> = incoming.iter().collect();
    sorted.sort_by_key(|item| item.order_index);
    match sorted.iter().position(|item| item.id == displayed_id) {
        Some(pos) => ReloadPlan::Continue {
            cursor: (pos + 1) % sorted.len(),
        },
        None => ReloadPlan::Restart(RestartReason::CurrentItemRemoved),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::playlist::tests::{item, wednesday_at};

    fn windowed(id: &str, duration: u64, order: i64, start: &str, end: &str) -> PlaylistItem {
        let mut it = item(id, duration, order);
        it.time_window_start = Some(start.into());
        it.time_window_end = Some(end.into());
        it
    }

    fn ids(rotation: &Rotation, picks: &[usize]) -> Vec<String> {
        picks
            .iter()
            .map(|&i| rotation.get(i).unwrap().id.clone())
            .collect()
    }

    #[test]
    fn test_new_sorts_by_order_index() {
        let rotation = Rotation::new(vec![item("c", 0, 3), item("a", 0, 1), item("b", 0, 2)]);
        let order: Vec<_> = rotation.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(order, ["a", "b", "c"]);
    }

    #[test]
    fn test_select_next_cycles_in_order_and_wraps() {
        // Arrange
        let mut rotation = Rotation::new(vec![item("a", 1000, 0), item("b", 1000, 1), item("c", 1000, 2)]);
        let now = wednesday_at(12, 0);

        // Act
        let picks: Vec<usize> = (0..4).map(|_| rotation.select_next(now).unwrap()).collect();

        // Assert
        assert_eq!(ids(&rotation, &picks), ["a", "b", "c", "a"]);
        assert_eq!(rotation.cursor(), 1);
    }

    #[test]
    fn test_select_next_skips_items_outside_window() {
        let mut rotation = Rotation::new(vec![
            item("a", 0, 0),
            windowed("b", 5000, 1, "09:00", "17:00"),
        ]);
        let evening = wednesday_at(20, 0);

        for _ in 0..5 {
            assert_eq!(rotation.select_next(evening), Some(0));
        }
    }

    #[test]
    fn test_select_next_returns_none_and_keeps_cursor_when_nothing_valid() {
        let mut rotation = Rotation::new(vec![
            windowed("a", 1000, 0, "06:00", "07:00"),
            windowed("b", 1000, 1, "07:00", "08:00"),
        ]);
        rotation.set_cursor(1);

        assert_eq!(rotation.select_next(wednesday_at(12, 0)), None);
        assert_eq!(rotation.cursor(), 1);
    }

    #[test]
    fn test_select_previous_starts_two_behind_cursor() {
        // Arrange: showing "c" (cursor wrapped to 0)
        let mut rotation = Rotation::new(vec![item("a", 1000, 0), item("b", 1000, 1), item("c", 1000, 2)]);
        let now = wednesday_at(12, 0);
        for _ in 0..3 {
            rotation.select_next(now);
        }
        assert_eq!(rotation.cursor(), 0);

        // Act
        let prev = rotation.select_previous(now).unwrap();

        // Assert
        assert_eq!(rotation.get(prev).unwrap().id, "b");
        assert_eq!(rotation.cursor(), 2);
    }

    #[test]
    fn test_select_previous_skips_invalid_items() {
        let mut rotation = Rotation::new(vec![
            item("a", 1000, 0),
            windowed("b", 1000, 1, "06:00", "07:00"),
            item("c", 1000, 2),
        ]);
        rotation.set_cursor(0); // showing "c"

        let prev = rotation.select_previous(wednesday_at(12, 0)).unwrap();

        assert_eq!(rotation.get(prev).unwrap().id, "a");
    }

    #[test]
    fn test_step_forward_ignores_constraints() {
        let mut rotation = Rotation::new(vec![
            item("a", 1000, 0),
            windowed("b", 1000, 1, "06:00", "07:00"),
        ]);
        rotation.set_cursor(1);

        assert_eq!(rotation.step_forward(), Some(1));
        assert_eq!(rotation.cursor(), 0);
    }

    #[test]
    fn test_step_backward_on_single_item_stays_put() {
        let mut rotation = Rotation::new(vec![item("only", 0, 0)]);
        rotation.select_next(wednesday_at(12, 0));
        assert_eq!(rotation.step_backward(), Some(0));
        assert_eq!(rotation.cursor(), 0);
    }

    #[test]
    fn test_empty_rotation_selects_nothing() {
        let mut rotation = Rotation::default();
        assert_eq!(rotation.select_next(wednesday_at(12, 0)), None);
        assert_eq!(rotation.step_forward(), None);
        assert_eq!(rotation.step_backward(), None);
    }

    // ── rotation_delay ────────────────────────────────────────────────────────

    #[test]
    fn test_single_permanent_item_has_no_timer() {
        assert_eq!(rotation_delay(&item("a", 0, 0), 1, wednesday_at(12, 0)), None);
    }

    #[test]
    fn test_single_timed_item_loops_on_its_duration() {
        assert_eq!(
            rotation_delay(&item("a", 8000, 0), 1, wednesday_at(12, 0)),
            Some(Duration::from_secs(8))
        );
    }

    #[test]
    fn test_permanent_item_in_multi_item_playlist_uses_default_interval() {
        assert_eq!(
            rotation_delay(&item("a", 0, 0), 3, wednesday_at(12, 0)),
            Some(DEFAULT_ROTATION_INTERVAL)
        );
    }

    #[test]
    fn test_delay_is_clamped_to_window_end() {
        let it = windowed("a", 600_000, 0, "09:00", "12:05");
        assert_eq!(
            rotation_delay(&it, 2, wednesday_at(12, 0)),
            Some(Duration::from_secs(300))
        );
    }

    // ── plan_reload ───────────────────────────────────────────────────────────

    #[test]
    fn test_plan_reload_restarts_on_count_change() {
        let old = vec![item("a", 1000, 0)];
        let new = vec![item("a", 1000, 0), item("b", 1000, 1)];
        assert_eq!(
            plan_reload(&old, &new, Some("a")),
            ReloadPlan::Restart(RestartReason::CountChanged { old: 1, new: 2 })
        );
    }

    #[test]
    fn test_plan_reload_restarts_when_matched_item_window_changes() {
        let old = vec![item("a", 1000, 0), item("b", 1000, 1)];
        let mut new = old.clone();
        new[1].time_window_start = Some("08:00".into());
        new[1].time_window_end = Some("10:00".into());

        assert_eq!(
            plan_reload(&old, &new, Some("a")),
            ReloadPlan::Restart(RestartReason::SchedulingChanged { id: "b".into() })
        );
    }

    #[test]
    fn test_plan_reload_restarts_when_displayed_item_duration_changes() {
        let old = vec![item("a", 1000, 0), item("b", 1000, 1)];
        let mut new = old.clone();
        new[0].display_duration = 9000;

        assert_eq!(
            plan_reload(&old, &new, Some("a")),
            ReloadPlan::Restart(RestartReason::SchedulingChanged { id: "a".into() })
        );
    }

    #[test]
    fn test_plan_reload_continues_when_other_item_duration_changes() {
        let old = vec![item("a", 1000, 0), item("b", 1000, 1), item("c", 1000, 2)];
        let mut new = old.clone();
        new[2].display_duration = 9000;

        assert_eq!(
            plan_reload(&old, &new, Some("a")),
            ReloadPlan::Continue { cursor: 1 }
        );
    }

    #[test]
    fn test_plan_reload_continues_when_only_content_changes() {
        let old = vec![item("a", 1000, 0), item("b", 1000, 1), item("c", 1000, 2)];
        let mut new = old.clone();
        new[2].content.url = "https://cdn.example.com/c-v2".into();

        assert_eq!(
            plan_reload(&old, &new, Some("b")),
            ReloadPlan::Continue { cursor: 2 }
        );
    }

    #[test]
    fn test_plan_reload_continue_follows_reordered_position() {
        let old = vec![item("a", 1000, 0), item("b", 1000, 1), item("c", 1000, 2)];
        let new = vec![item("a", 1000, 2), item("b", 1000, 0), item("c", 1000, 1)];

        // "b" is now first, so the cursor points at slot 1.
        assert_eq!(
            plan_reload(&old, &new, Some("b")),
            ReloadPlan::Continue { cursor: 1 }
        );
    }

    #[test]
    fn test_plan_reload_restarts_when_displayed_item_disappears() {
        let old = vec![item("a", 1000, 0), item("b", 1000, 1)];
        let new = vec![item("a", 1000, 0), item("z", 1000, 1)];
        assert_eq!(
            plan_reload(&old, &new, Some("b")),
            ReloadPlan::Restart(RestartReason::CurrentItemRemoved)
        );
    }

    #[test]
    fn test_select_next_requires_both_day_and_window() {
        // Arrange: "b" runs on Wednesdays 09:00-17:00 only.
        let mut b = windowed("b", 1000, 1, "09:00", "17:00");
        b.days_of_week = Some(vec![3]);
        let mut rotation = Rotation::new(vec![item("a", 1000, 0), b]);
        let thursday_noon = wednesday_at(12, 0) + chrono::Duration::days(1);

        // Act
        let wednesday_noon: Vec<usize> =
            (0..2).map(|_| rotation.select_next(wednesday_at(12, 0)).unwrap()).collect();
        let wednesday_evening: Vec<usize> =
            (0..2).map(|_| rotation.select_next(wednesday_at(18, 0)).unwrap()).collect();
        let thursday: Vec<usize> =
            (0..2).map(|_| rotation.select_next(thursday_noon).unwrap()).collect();

        // Assert
        assert_eq!(ids(&rotation, &wednesday_noon), ["a", "b"]);
        assert_eq!(ids(&rotation, &wednesday_evening), ["a", "a"]);
        assert_eq!(ids(&rotation, &thursday), ["a", "a"]);
    }

    mod properties {
        use super::*;
        use chrono::{Duration as ChronoDuration, NaiveDate};
        use proptest::prelude::*;

        fn hhmm() -> impl Strategy<Value = String> {
            (0u32..24, 0u32..60).prop_map(|(h, m)| format!("{h:02}:{m:02}"))
        }

        fn any_item() -> impl Strategy<Value = PlaylistItem> {
            (
                0u64..60_000,
                -5i64..5,
                prop::option::of((hhmm(), hhmm())),
                prop::option::of(prop::collection::vec(0u8..7, 0..4)),
            )
                .prop_map(|(duration, order, window, days)| {
                    let mut it = item("x", duration, order);
                    if let Some((start, end)) = window {
                        it.time_window_start = Some(start);
                        it.time_window_end = Some(end);
                    }
                    it.days_of_week = days;
                    it
                })
        }

        /// Any minute of the week starting Sunday 2024-06-02.
        fn any_time() -> impl Strategy<Value = NaiveDateTime> {
            (0i64..7 * 24 * 60).prop_map(|minutes| {
                NaiveDate::from_ymd_opt(2024, 6, 2)
                    .unwrap()
                    .and_hms_opt(0, 0, 0)
                    .unwrap()
                    + ChronoDuration::minutes(minutes)
            })
        }

        proptest! {
            #[test]
            fn selected_items_are_always_valid(
                items in prop::collection::vec(any_item(), 0..8),
                now in any_time(),
                cursor in 0usize..8,
                forward in prop::collection::vec(any::<bool>(), 1..12),
            ) {
                let mut rotation = Rotation::new(items);
                rotation.set_cursor(cursor);
                let any_valid = rotation.items().iter().any(|it| it.is_valid_at(now));

                for step_forward in forward {
                    let picked = if step_forward {
                        rotation.select_next(now)
                    } else {
                        rotation.select_previous(now)
                    };
                    match picked {
                        Some(idx) => prop_assert!(rotation.get(idx).unwrap().is_valid_at(now)),
                        None => prop_assert!(!any_valid),
                    }
                }
            }

            #[test]
            fn unconstrained_playlists_cycle_in_order(
                orders in prop::collection::vec(-20i64..20, 2..8),
                now in any_time(),
            ) {
                let items: Vec<PlaylistItem> = orders
                    .iter()
                    .enumerate()
                    .map(|(i, &order)| item(&format!("i{i}"), 1000, order))
                    .collect();
                let mut rotation = Rotation::new(items);
                let len = rotation.len();

                let picks: Vec<usize> = (0..2 * len)
                    .map(|_| rotation.select_next(now).unwrap())
                    .collect();

                prop_assert!(rotation
                    .items()
                    .windows(2)
                    .all(|pair| pair[0].order_index <= pair[1].order_index));
                let expected: Vec<usize> = (0..2 * len).map(|k| k % len).collect();
                prop_assert_eq!(picks, expected);
            }
        }
    }
}
