//! Wall-clock abstraction.
//!
//! Schedule rules run against *local* time.  The scheduler reads the time
//! through [`Clock`] so tests can pin it to any minute of any weekday.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};

pub trait Clock: Send + Sync {
    /// Current local date and time.
    fn now(&self) -> NaiveDateTime;
}

/// The host's local clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, to: NaiveDateTime) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            let step = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::zero());
            *now += step;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_manual_clock_advances() {
        let start = NaiveDate::from_ymd_opt(2024, 6, 5)
            .unwrap()
            .and_hms_opt(23, 59, 30)
            .unwrap();
        let clock = ManualClock::new(start);

        clock.advance(Duration::from_secs(60));

        assert_eq!(clock.now().to_string(), "2024-06-06 00:00:30");
    }
}
