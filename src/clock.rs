use async_trait::async_trait;
use chrono::{Local, NaiveDateTime, TimeDelta, Timelike};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Wall-clock source for scheduling. Times are naive local times at whole-second
/// resolution, which is what the record store writes.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    /// Suspend until `instant`. Returns immediately if it is already in the past.
    async fn sleep_until(&self, instant: NaiveDateTime);

    async fn sleep(&self, duration: Duration) {
        let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::zero());
        let target = self.now() + delta;
        self.sleep_until(target).await;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        let now = Local::now().naive_local();
        now.with_nanosecond(0).unwrap_or(now)
    }

    async fn sleep_until(&self, instant: NaiveDateTime) {
        let remaining = instant - Local::now().naive_local();
        if let Ok(duration) = remaining.to_std() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Clock that only moves when someone sleeps on it. Sleeping jumps straight to the
/// wake instant, so a whole trading session plays out instantly.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, delta: TimeDelta) {
        if let Ok(mut now) = self.now.lock() {
            *now += delta;
        }
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    async fn sleep_until(&self, instant: NaiveDateTime) {
        if let Ok(mut now) = self.now.lock() {
            if instant > *now {
                *now = instant;
            }
        }
        tokio::task::yield_now().await;
    }
}
