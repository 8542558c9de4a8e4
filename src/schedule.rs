//! Wall-clock arithmetic for periodic recording.
//!
//! A period of `p` minutes produces one trigger minute per `p`-minute slot of the
//! hour, shifted one minute early. Within a trigger minute the fetch starts `lag`
//! seconds before the minute ends so that a multi-second fetch straddles the period
//! mark. Everything here is a pure function of the inputs.

use crate::error::RecorderError;
use chrono::{NaiveDateTime, TimeDelta, Timelike};
use std::collections::BTreeSet;
use std::time::Duration;

pub const DEFAULT_WAIT_SECONDS: u32 = 15;
pub const DEFAULT_WINDOW_START_HOUR: u32 = 6;
pub const DEFAULT_WINDOW_END_HOUR: u32 = 13;

/// Minutes of the hour on which a fetch fires for `period`.
///
/// Every value is one less than a multiple of `period`; with no lag this records one
/// minute ahead of the nominal mark.
pub fn trigger_minutes(period: u32) -> BTreeSet<u32> {
    if period == 0 {
        return BTreeSet::new();
    }
    (1..=60).filter(|p| p % period == 0).map(|p| p - 1).collect()
}

/// Seconds to sleep after a fetch so the same trigger window is not hit twice.
pub fn sleep_time(period: u32, wait: u32) -> u32 {
    (period * 60).saturating_sub(wait)
}

/// First second of a trigger minute at which firing is allowed.
pub fn fire_second(lag: u32) -> u32 {
    60u32.saturating_sub(lag) % 60
}

pub fn should_fire(now: NaiveDateTime, period: u32, lag: u32) -> bool {
    trigger_minutes(period).contains(&now.minute()) && now.second() >= fire_second(lag)
}

/// Earliest instant at or after `now` (whole seconds) satisfying [`should_fire`].
pub fn next_fire_instant(now: NaiveDateTime, period: u32, lag: u32) -> NaiveDateTime {
    let now = truncate_to_second(now);
    let hour_start = now - TimeDelta::seconds(i64::from(now.minute() * 60 + now.second()));
    let open_offset = TimeDelta::seconds(i64::from(fire_second(lag)));
    let triggers = trigger_minutes(period);

    (0..2)
        .flat_map(|hour| {
            triggers
                .iter()
                .map(move |minute| {
                    hour_start + TimeDelta::hours(hour) + TimeDelta::minutes(i64::from(*minute))
                })
        })
        .find_map(|minute_start| {
            let window_open = minute_start + open_offset;
            let window_close = minute_start + TimeDelta::seconds(59);
            (now <= window_close).then(|| window_open.max(now))
        })
        .unwrap_or(hour_start + TimeDelta::hours(1))
}

pub fn truncate_to_second(instant: NaiveDateTime) -> NaiveDateTime {
    instant.with_nanosecond(0).unwrap_or(instant)
}

/// Recording cadence for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub period_minutes: u32,
    pub lag_seconds: u32,
    pub wait_seconds: u32,
}

impl Schedule {
    pub fn new(period_minutes: u32, lag_seconds: u32) -> Result<Self, RecorderError> {
        let schedule = Self {
            period_minutes,
            lag_seconds,
            wait_seconds: DEFAULT_WAIT_SECONDS,
        };
        schedule.validate()?;
        Ok(schedule)
    }

    pub fn with_wait(mut self, wait_seconds: u32) -> Self {
        self.wait_seconds = wait_seconds;
        self
    }

    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.period_minutes == 0 || 60 % self.period_minutes != 0 {
            return Err(RecorderError::ScheduleMisconfiguration(format!(
                "period of {} minutes does not evenly divide an hour",
                self.period_minutes
            )));
        }
        if self.lag_seconds >= self.period_minutes * 60 {
            return Err(RecorderError::ScheduleMisconfiguration(format!(
                "lag of {}s must be shorter than the {}-minute period",
                self.lag_seconds, self.period_minutes
            )));
        }
        Ok(())
    }

    pub fn should_fire(&self, now: NaiveDateTime) -> bool {
        should_fire(now, self.period_minutes, self.lag_seconds)
    }

    pub fn next_fire_instant(&self, now: NaiveDateTime) -> NaiveDateTime {
        next_fire_instant(now, self.period_minutes, self.lag_seconds)
    }

    /// Next fire instant outside the trigger window that contained `fired_at`.
    pub fn next_fire_after(&self, now: NaiveDateTime, fired_at: NaiveDateTime) -> NaiveDateTime {
        let fired_at = truncate_to_second(fired_at);
        let window_end = fired_at - TimeDelta::seconds(i64::from(fired_at.second()))
            + TimeDelta::minutes(1);
        self.next_fire_instant(now.max(window_end))
    }

    pub fn sleep_time(&self) -> Duration {
        Duration::from_secs(u64::from(sleep_time(
            self.period_minutes,
            self.wait_seconds,
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    Before,
    Open,
    Closed,
}

/// Hours of the local day during which recording happens: from `start_hour`
/// inclusive until `end_hour`, after which a scheduler terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for ActiveWindow {
    fn default() -> Self {
        Self {
            start_hour: DEFAULT_WINDOW_START_HOUR,
            end_hour: DEFAULT_WINDOW_END_HOUR,
        }
    }
}

impl ActiveWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> Result<Self, RecorderError> {
        if start_hour >= end_hour || end_hour > 24 {
            return Err(RecorderError::ScheduleMisconfiguration(format!(
                "active window {}:00-{}:00 is empty or out of range",
                start_hour, end_hour
            )));
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    pub fn phase(&self, now: NaiveDateTime) -> WindowPhase {
        let hour = now.hour();
        if hour >= self.end_hour {
            WindowPhase::Closed
        } else if hour < self.start_hour {
            WindowPhase::Before
        } else {
            WindowPhase::Open
        }
    }

    /// Opening boundary on the same day as `now`.
    pub fn opens_at(&self, now: NaiveDateTime) -> NaiveDateTime {
        let midnight = now.date().and_time(chrono::NaiveTime::MIN);
        midnight + TimeDelta::hours(i64::from(self.start_hour))
    }
}
