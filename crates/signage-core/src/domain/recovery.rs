//! Backoff policies for reconnection and crash recovery.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Reconnect delay for the first attempt.
pub const RECONNECT_BASE: Duration = Duration::from_secs(5);
/// Upper bound for the reconnect delay.
pub const RECONNECT_MAX: Duration = Duration::from_secs(60);

/// Window in which page crashes are counted.
pub const CRASH_WINDOW: Duration = Duration::from_secs(5 * 60);
/// Reloads attempted before the browser process is relaunched.
pub const MAX_CRASH_RELOADS: usize = 3;
const CRASH_BACKOFF_BASE: Duration = Duration::from_secs(2);
const CRASH_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Capped exponential backoff: `base, 2·base, 4·base, … max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, attempt: 0 }
    }

    /// The reconnect policy of the control channel (5 s doubling to 60 s).
    pub fn reconnect() -> Self {
        Self::new(RECONNECT_BASE, RECONNECT_MAX)
    }

    /// Returns the next delay and advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = exponential(self.base, self.max, self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// What to do about a page crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashAction {
    /// Wait `backoff`, then reload the last known-good URL.
    Reload { attempt: usize, backoff: Duration },
    /// Tear down and relaunch the whole browser.
    Relaunch,
}

/// Counts crash failures inside a rolling window.
#[derive(Debug, Clone)]
pub struct CrashBudget {
    window: Duration,
    max_reloads: usize,
    failures: VecDeque<Instant>,
}

impl Default for CrashBudget {
    fn default() -> Self {
        Self::new(CRASH_WINDOW, MAX_CRASH_RELOADS)
    }
}

impl CrashBudget {
    pub fn new(window: Duration, max_reloads: usize) -> Self {
        Self {
            window,
            max_reloads,
            failures: VecDeque::new(),
        }
    }

    /// Records a failure at `now` and decides the next step.
    ///
    /// Failures older than the window are forgotten first.  Once more than
    /// `max_reloads` failures sit inside the window the answer is
    /// [`CrashAction::Relaunch`] and the budget starts over.
    pub fn record_failure(&mut self, now: Instant) -> CrashAction {
        while let Some(&oldest) = self.failures.front() {
            if now.saturating_duration_since(oldest) > self.window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
        self.failures.push_back(now);

        let attempt = self.failures.len();
        if attempt > self.max_reloads {
            self.failures.clear();
            return CrashAction::Relaunch;
        }
        let exp = u32::try_from(attempt - 1).unwrap_or(u32::MAX);
        CrashAction::Reload {
            attempt,
            backoff: exponential(CRASH_BACKOFF_BASE, CRASH_BACKOFF_MAX, exp),
        }
    }

    pub fn failures_in_window(&self) -> usize {
        self.failures.len()
    }

    pub fn reset(&mut self) {
        self.failures.clear();
    }
}

fn exponential(base: Duration, max: Duration, exp: u32) -> Duration {
    let factor = 2u32.checked_pow(exp).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(max, |d| d.min(max))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_backoff_doubles_and_caps_at_sixty_seconds() {
        // Arrange
        let mut backoff = Backoff::reconnect();

        // Act
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();

        // Assert
        assert_eq!(delays, [5, 10, 20, 40, 60, 60]);
    }

    #[test]
    fn test_backoff_reset_starts_over() {
        let mut backoff = Backoff::reconnect();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), RECONNECT_BASE);
    }

    #[test]
    fn test_backoff_survives_huge_attempt_counts() {
        let mut backoff = Backoff::reconnect();
        for _ in 0..200 {
            assert!(backoff.next_delay() <= RECONNECT_MAX);
        }
    }

    #[test]
    fn test_crash_budget_reloads_then_relaunches() {
        // Arrange
        let mut budget = CrashBudget::default();
        let t0 = Instant::now();

        // Act / Assert
        assert_eq!(
            budget.record_failure(t0),
            CrashAction::Reload { attempt: 1, backoff: Duration::from_secs(2) }
        );
        assert_eq!(
            budget.record_failure(t0 + Duration::from_secs(10)),
            CrashAction::Reload { attempt: 2, backoff: Duration::from_secs(4) }
        );
        assert_eq!(
            budget.record_failure(t0 + Duration::from_secs(20)),
            CrashAction::Reload { attempt: 3, backoff: Duration::from_secs(8) }
        );
        assert_eq!(budget.record_failure(t0 + Duration::from_secs(30)), CrashAction::Relaunch);
        assert_eq!(budget.failures_in_window(), 0);
    }

    #[test]
    fn test_crash_budget_forgets_failures_outside_window() {
        let mut budget = CrashBudget::default();
        let t0 = Instant::now();
        budget.record_failure(t0);
        budget.record_failure(t0 + Duration::from_secs(1));
        budget.record_failure(t0 + Duration::from_secs(2));

        // Six minutes later the earlier crashes no longer count.
        let action = budget.record_failure(t0 + Duration::from_secs(362));

        assert_eq!(
            action,
            CrashAction::Reload { attempt: 1, backoff: Duration::from_secs(2) }
        );
    }
}
