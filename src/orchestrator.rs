use crate::error::RecorderError;
use crate::fetcher::{CycleReport, FanOutFetcher};
use crate::models::{OptionSide, SymbolContext};
use crate::retry::RetryPolicy;
use crate::schedule::{ActiveWindow, Schedule};
use crate::scheduler::{PeriodScheduler, SchedulerSummary};
use crate::store::RecordStore;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RecordingSummary {
    pub symbols: Vec<SchedulerSummary>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct SetupSummary {
    pub contexts: Vec<SymbolContext>,
    pub failed_symbols: Vec<String>,
    pub bootstrap: CycleReport,
    pub elapsed: Duration,
}

/// Top-level lifecycle: setup of the on-disk layout and the per-symbol recording
/// schedulers.
pub struct Recorder {
    fetcher: FanOutFetcher,
    schedule: Schedule,
    window: ActiveWindow,
}

impl Recorder {
    pub fn new(fetcher: FanOutFetcher, schedule: Schedule, window: ActiveWindow) -> Self {
        Self {
            fetcher,
            schedule,
            window,
        }
    }

    /// Runs one scheduler per symbol concurrently and waits for all of them to reach
    /// the end of the active window.
    pub async fn run_periodically(
        &self,
        contexts: Vec<SymbolContext>,
    ) -> Result<RecordingSummary, RecorderError> {
        self.schedule.validate()?;
        let start = Instant::now();

        let handles: Vec<_> = contexts
            .into_iter()
            .map(|ctx| {
                let symbol = ctx.symbol.clone();
                let scheduler =
                    PeriodScheduler::new(ctx, self.schedule, self.window, self.fetcher.clone());
                (symbol, tokio::spawn(scheduler.run()))
            })
            .collect();

        let mut symbols = Vec::with_capacity(handles.len());
        for (symbol, handle) in handles {
            match handle.await {
                Ok(summary) => symbols.push(summary),
                Err(join_err) => warn!("Scheduler for {} stopped unexpectedly: {}", symbol, join_err),
            }
        }

        let elapsed = start.elapsed();
        info!("Finished in: {:.2} second(s).", elapsed.as_secs_f64());
        Ok(RecordingSummary { symbols, elapsed })
    }

    /// Resolves each symbol's chain and creates its storage layout. With
    /// `bootstrap_files` the instrument logs and reference rows are created from a
    /// fresh fetch as well.
    ///
    /// The symbol list is processed in two halves to limit how many symbols hit the
    /// source at once; symbols within a half run concurrently.
    pub async fn run_setup(&self, symbols: &[String], bootstrap_files: bool) -> SetupSummary {
        let start = Instant::now();
        let progress = ProgressBar::new(symbols.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let mut contexts = Vec::new();
        let mut failed_symbols = Vec::new();
        let mut bootstrap = CycleReport::default();

        let (first_half, second_half) = symbols.split_at(symbols.len() / 2);
        for half in [first_half, second_half] {
            if half.is_empty() {
                continue;
            }

            let handles: Vec<_> = half
                .iter()
                .map(|symbol| {
                    let fetcher = self.fetcher.clone();
                    let symbol = symbol.clone();
                    tokio::spawn(async move {
                        let result = setup_symbol(&fetcher, &symbol, bootstrap_files).await;
                        (symbol, result)
                    })
                })
                .collect();

            for joined in join_all(handles).await {
                match joined {
                    Ok((symbol, Ok((ctx, report)))) => {
                        progress.set_message(symbol);
                        bootstrap.merge(report);
                        contexts.push(ctx);
                    }
                    Ok((symbol, Err(err))) => {
                        warn!("Setup for {} failed: {}", symbol, err);
                        failed_symbols.push(symbol);
                    }
                    Err(join_err) => warn!("Setup worker failed: {}", join_err),
                }
                progress.inc(1);
            }
        }

        progress.finish_with_message("Setup completed");
        let elapsed = start.elapsed();
        info!("Finished in: {:.2} second(s).", elapsed.as_secs_f64());

        SetupSummary {
            contexts,
            failed_symbols,
            bootstrap,
            elapsed,
        }
    }
}

async fn setup_symbol(
    fetcher: &FanOutFetcher,
    symbol: &str,
    bootstrap_files: bool,
) -> Result<(SymbolContext, CycleReport), RecorderError> {
    info!("Setting up {}", symbol);
    let source = fetcher.source();
    let listing = RetryPolicy::default()
        .run(
            fetcher.clock().as_ref(),
            &format!("resolving option chain for {}", symbol),
            || source.resolve_chain(symbol),
        )
        .await?;
    let ctx = SymbolContext::new(symbol, listing);

    let store = fetcher.store().clone();
    let layout_ctx = ctx.clone();
    tokio::task::spawn_blocking(move || prepare_layout(&store, &layout_ctx))
        .await
        .map_err(|_| RecorderError::WorkerPanicked(symbol.to_string()))??;

    let report = if bootstrap_files {
        fetcher.bootstrap(&ctx).await
    } else {
        CycleReport::default()
    };

    info!(
        "{}: chain {} with {} expiration(s) ready",
        ctx.symbol,
        ctx.chain_id,
        ctx.expirations.len()
    );
    Ok((ctx, report))
}

fn prepare_layout(store: &RecordStore, ctx: &SymbolContext) -> Result<(), RecorderError> {
    store.ensure_symbol_location(&ctx.symbol)?;
    for expiration in &ctx.expirations {
        store.ensure_location(&ctx.symbol, expiration)?;
        for side in OptionSide::ALL {
            store.ensure_reference_table(&ctx.symbol, expiration, side)?;
        }
    }
    Ok(())
}
