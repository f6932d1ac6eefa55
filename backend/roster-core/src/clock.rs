// src/clock.rs
use chrono::{DateTime, Local, NaiveDate, Utc};

/// Source of "now" and of the caller's current date.
///
/// "Today" is the local calendar date of the portal; it decides `isToday` on
/// reads and which date the daily run defaults to.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

#[cfg(test)]
pub use test_clock::TestClock;
