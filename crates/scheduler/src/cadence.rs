//! Structured job cadences.
//!
//! All wall-clock cadences are evaluated in UTC.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};

use crate::SchedulerError;

const MIN_INTERVAL: Duration = Duration::from_secs(1);
const MAX_INTERVAL: Duration = Duration::from_secs(366 * 24 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Fixed interval, measured from the end of the previous run.
    Every(Duration),
    /// Once a day at a time of day.
    Daily { at: NaiveTime },
    /// Once a week on a weekday at a time of day.
    Weekly { weekday: Weekday, at: NaiveTime },
}

impl Cadence {
    pub fn every_minutes(minutes: u64) -> Self {
        Cadence::Every(Duration::from_secs(minutes.saturating_mul(60)))
    }

    pub fn every_hours(hours: u64) -> Self {
        Cadence::Every(Duration::from_secs(hours.saturating_mul(3600)))
    }

    pub fn daily(hour: u32, minute: u32) -> Result<Self, SchedulerError> {
        Ok(Cadence::Daily {
            at: time_of_day(hour, minute)?,
        })
    }

    pub fn weekly(weekday: Weekday, hour: u32, minute: u32) -> Result<Self, SchedulerError> {
        Ok(Cadence::Weekly {
            weekday,
            at: time_of_day(hour, minute)?,
        })
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        match self {
            Cadence::Every(interval) if *interval < MIN_INTERVAL => {
                Err(SchedulerError::InvalidCadence(format!(
                    "interval {interval:?} is shorter than 1s"
                )))
            }
            Cadence::Every(interval) if *interval > MAX_INTERVAL => {
                Err(SchedulerError::InvalidCadence(format!(
                    "interval {interval:?} is longer than a year"
                )))
            }
            _ => Ok(()),
        }
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Cadence::Every(interval) => {
                after + chrono::Duration::milliseconds(interval.as_millis().max(1) as i64)
            }
            Cadence::Daily { at } => {
                let candidate = after.date_naive().and_time(at).and_utc();
                if candidate > after {
                    candidate
                } else {
                    candidate + chrono::Duration::days(1)
                }
            }
            Cadence::Weekly { weekday, at } => {
                let days_ahead = (7 + weekday.num_days_from_monday()
                    - after.weekday().num_days_from_monday())
                    % 7;
                let candidate = (after.date_naive() + chrono::Duration::days(i64::from(days_ahead)))
                    .and_time(at)
                    .and_utc();
                if candidate > after {
                    candidate
                } else {
                    candidate + chrono::Duration::days(7)
                }
            }
        }
    }

    /// Fire time that follows `previous`, the slot the timer last waited for.
    ///
    /// Wall-clock cadences advance from `previous` so a wake-up that lands a
    /// little before the slot cannot select the same slot again. Intervals are
    /// measured from `now`.
    pub fn following(&self, previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Cadence::Every(_) => self.next_after(now),
            Cadence::Daily { .. } | Cadence::Weekly { .. } => self.next_after(previous.max(now)),
        }
    }
}

fn time_of_day(hour: u32, minute: u32) -> Result<NaiveTime, SchedulerError> {
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| {
        SchedulerError::InvalidCadence(format!("invalid time of day {hour}:{minute:02}"))
    })
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Every(interval) => {
                let secs = interval.as_secs();
                if secs % 3600 == 0 {
                    write!(f, "every {}h", secs / 3600)
                } else if secs % 60 == 0 {
                    write!(f, "every {}m", secs / 60)
                } else {
                    write!(f, "every {}s", secs)
                }
            }
            Cadence::Daily { at } => write!(f, "daily at {} UTC", at.format("%H:%M")),
            Cadence::Weekly { weekday, at } => {
                write!(f, "weekly on {} at {} UTC", weekday, at.format("%H:%M"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_interval_validation() {
        assert!(Cadence::Every(Duration::from_millis(500)).validate().is_err());
        assert!(Cadence::Every(Duration::from_secs(1)).validate().is_ok());
        assert!(Cadence::every_hours(24 * 400).validate().is_err());
        assert!(Cadence::daily(25, 0).is_err());
        assert!(Cadence::weekly(Weekday::Sun, 10, 60).is_err());
    }

    #[test]
    fn test_every_adds_interval() {
        let t = utc(2025, 3, 10, 9, 0);
        assert_eq!(Cadence::every_minutes(5).next_after(t), utc(2025, 3, 10, 9, 5));
    }

    #[test]
    fn test_daily_is_strictly_after() {
        let daily = Cadence::daily(9, 0).unwrap();
        assert_eq!(daily.next_after(utc(2025, 3, 10, 8, 59)), utc(2025, 3, 10, 9, 0));
        assert_eq!(daily.next_after(utc(2025, 3, 10, 9, 0)), utc(2025, 3, 11, 9, 0));
        assert_eq!(daily.next_after(utc(2025, 12, 31, 23, 0)), utc(2026, 1, 1, 9, 0));
    }

    #[test]
    fn test_weekly_rolls_to_next_week() {
        // 2025-03-10 is a Monday.
        let sunday = Cadence::weekly(Weekday::Sun, 10, 0).unwrap();
        assert_eq!(sunday.next_after(utc(2025, 3, 10, 12, 0)), utc(2025, 3, 16, 10, 0));
        assert_eq!(sunday.next_after(utc(2025, 3, 16, 9, 0)), utc(2025, 3, 16, 10, 0));
        assert_eq!(sunday.next_after(utc(2025, 3, 16, 10, 0)), utc(2025, 3, 23, 10, 0));

        let monday = Cadence::weekly(Weekday::Mon, 4, 0).unwrap();
        assert_eq!(monday.next_after(utc(2025, 3, 10, 3, 0)), utc(2025, 3, 10, 4, 0));
    }

    #[test]
    fn test_following_never_repeats_a_slot() {
        let daily = Cadence::daily(9, 0).unwrap();
        let slot = utc(2025, 3, 10, 9, 0);
        // Woke up a moment early: the clock still reads before the slot.
        let early = slot - chrono::Duration::milliseconds(3);
        assert_eq!(daily.next_after(early), slot);
        assert_eq!(daily.following(slot, early), utc(2025, 3, 11, 9, 0));

        // A run that overran into a later slot skips ahead from the clock.
        let late = utc(2025, 3, 12, 10, 0);
        assert_eq!(daily.following(slot, late), utc(2025, 3, 13, 9, 0));

        let weekly = Cadence::weekly(Weekday::Sun, 3, 0).unwrap();
        let sunday = utc(2025, 3, 16, 3, 0);
        assert_eq!(
            weekly.following(sunday, sunday - chrono::Duration::seconds(1)),
            utc(2025, 3, 23, 3, 0)
        );
    }

    #[test]
    fn test_following_interval_counts_from_now() {
        let every = Cadence::every_minutes(5);
        let previous = utc(2025, 3, 10, 9, 0);
        let now = utc(2025, 3, 10, 9, 2);
        assert_eq!(every.following(previous, now), utc(2025, 3, 10, 9, 7));
    }

    #[test]
    fn test_display() {
        assert_eq!(Cadence::every_minutes(5).to_string(), "every 5m");
        assert_eq!(Cadence::every_hours(6).to_string(), "every 6h");
        assert_eq!(Cadence::daily(9, 0).unwrap().to_string(), "daily at 09:00 UTC");
        assert_eq!(
            Cadence::weekly(Weekday::Sun, 3, 0).unwrap().to_string(),
            "weekly on Sun at 03:00 UTC"
        );
    }
}
