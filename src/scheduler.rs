use crate::fetcher::{CycleReport, FanOutFetcher};
use crate::models::SymbolContext;
use crate::schedule::{ActiveWindow, Schedule, WindowPhase};
use chrono::{NaiveDateTime, TimeDelta};
use log::{debug, info, warn};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    WaitingForWindow,
    Armed,
    Firing,
    Sleeping,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub symbol: String,
    pub cycles: usize,
    pub totals: CycleReport,
    pub fired_at: Vec<NaiveDateTime>,
    pub final_state: SchedulerState,
}

/// Drives recording for one symbol: waits for the active window, then fires a fan-out
/// cycle at every trigger instant until the window closes.
pub struct PeriodScheduler {
    ctx: SymbolContext,
    schedule: Schedule,
    window: ActiveWindow,
    fetcher: FanOutFetcher,
    state: SchedulerState,
}

impl PeriodScheduler {
    pub fn new(
        ctx: SymbolContext,
        schedule: Schedule,
        window: ActiveWindow,
        fetcher: FanOutFetcher,
    ) -> Self {
        Self {
            ctx,
            schedule,
            window,
            fetcher,
            state: SchedulerState::WaitingForWindow,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub async fn run(mut self) -> SchedulerSummary {
        let clock = Arc::clone(self.fetcher.clock());
        let sleep_time = TimeDelta::from_std(self.schedule.sleep_time()).unwrap_or(TimeDelta::zero());
        let mut totals = CycleReport::default();
        let mut fired_at = Vec::new();
        let mut last_fired: Option<NaiveDateTime> = None;

        info!("Starting: {}", self.ctx.symbol);

        loop {
            let now = clock.now();
            match self.window.phase(now) {
                WindowPhase::Closed => break,
                WindowPhase::Before => {
                    self.enter(SchedulerState::WaitingForWindow);
                    clock.sleep_until(self.window.opens_at(now)).await;
                    continue;
                }
                WindowPhase::Open => {}
            }

            self.enter(SchedulerState::Armed);
            let fire_at = match last_fired {
                Some(previous) => self.schedule.next_fire_after(now, previous),
                None => self.schedule.next_fire_instant(now),
            };
            if self.window.phase(fire_at) != WindowPhase::Open {
                break;
            }
            clock.sleep_until(fire_at).await;

            self.enter(SchedulerState::Firing);
            info!("{} Recording {}...", fire_at, self.ctx.symbol);
            let report = self.fetcher.record_cycle(&self.ctx).await;
            if report.failed > 0 {
                warn!(
                    "{}: {} of {} expirations failed this cycle",
                    self.ctx.symbol,
                    report.failed,
                    report.failed + report.succeeded
                );
            }
            if report.skipped_instruments > 0 {
                warn!(
                    "{}: {} contract(s) without an instrument log were not recorded",
                    self.ctx.symbol, report.skipped_instruments
                );
            }
            totals.merge(report);
            fired_at.push(fire_at);
            last_fired = Some(fire_at);

            self.enter(SchedulerState::Sleeping);
            clock.sleep_until(fire_at + sleep_time).await;
        }

        self.enter(SchedulerState::Terminated);
        info!(
            "Stopped recording {} after {} cycle(s)",
            self.ctx.symbol,
            fired_at.len()
        );

        SchedulerSummary {
            symbol: self.ctx.symbol,
            cycles: fired_at.len(),
            totals,
            fired_at,
            final_state: self.state,
        }
    }

    fn enter(&mut self, next: SchedulerState) {
        if self.state != next {
            debug!("{}: {:?} -> {:?}", self.ctx.symbol, self.state, next);
            self.state = next;
        }
    }
}
