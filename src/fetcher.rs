use crate::clock::Clock;
use crate::error::RecorderError;
use crate::models::{OptionSide, Snapshot, SymbolContext};
use crate::source::SnapshotSource;
use crate::store::{EnsureOutcome, RecordStore};
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const DEFAULT_SETUP_COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// Append one row per instrument to logs that already exist.
    Record,
    /// Create locations, reference tables and log headers for what the fetch returns.
    Bootstrap,
}

/// Outcome of fanning out over a symbol's expirations.
///
/// `succeeded` and `failed` count expirations. `instruments` counts the rows written
/// (or logs prepared during setup) and `skipped_instruments` the contracts of a
/// successful fetch that could not be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub succeeded: usize,
    pub failed: usize,
    pub instruments: usize,
    pub skipped_instruments: usize,
}

impl CycleReport {
    pub fn merge(&mut self, other: CycleReport) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.instruments += other.instruments;
        self.skipped_instruments += other.skipped_instruments;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct UnitOutcome {
    written: usize,
    skipped: usize,
}

/// Fetches every expiration of a symbol concurrently and writes each snapshot to
/// its own directory of the record store.
#[derive(Clone)]
pub struct FanOutFetcher {
    source: Arc<dyn SnapshotSource>,
    store: RecordStore,
    clock: Arc<dyn Clock>,
    columns: Arc<Vec<String>>,
    max_concurrency: Option<usize>,
    setup_cooldown: Duration,
}

impl FanOutFetcher {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        store: RecordStore,
        clock: Arc<dyn Clock>,
        columns: Vec<String>,
    ) -> Self {
        Self {
            source,
            store,
            clock,
            columns: Arc::new(columns),
            max_concurrency: None,
            setup_cooldown: DEFAULT_SETUP_COOLDOWN,
        }
    }

    /// Caps in-flight expiration fetches. `None` runs all of a symbol's expirations
    /// at once.
    pub fn with_max_concurrency(mut self, limit: Option<usize>) -> Self {
        self.max_concurrency = limit.filter(|limit| *limit > 0);
        self
    }

    pub fn with_setup_cooldown(mut self, cooldown: Duration) -> Self {
        self.setup_cooldown = cooldown;
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn source(&self) -> &Arc<dyn SnapshotSource> {
        &self.source
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Steady-state recording: one snapshot per expiration, appended to the
    /// instrument logs created during setup.
    pub async fn record_cycle(&self, ctx: &SymbolContext) -> CycleReport {
        self.run_pool(ctx, &ctx.expirations, FetchMode::Record).await
    }

    /// Setup variant: works through the expirations in batches of the concurrency
    /// limit, pausing between batches to bound outbound requests.
    pub async fn bootstrap(&self, ctx: &SymbolContext) -> CycleReport {
        let batch_size = self.pool_width(ctx.expirations.len());
        let mut report = CycleReport::default();

        for (idx, batch) in ctx.expirations.chunks(batch_size).enumerate() {
            if idx > 0 {
                debug!(
                    "Cooling down {}s before next setup batch for {}",
                    self.setup_cooldown.as_secs(),
                    ctx.symbol
                );
                self.clock.sleep(self.setup_cooldown).await;
            }
            report.merge(self.run_pool(ctx, batch, FetchMode::Bootstrap).await);
        }

        report
    }

    fn pool_width(&self, jobs: usize) -> usize {
        self.max_concurrency.unwrap_or(jobs).min(jobs).max(1)
    }

    async fn run_pool(
        &self,
        ctx: &SymbolContext,
        sub_keys: &[String],
        mode: FetchMode,
    ) -> CycleReport {
        let mut report = CycleReport::default();
        let worker_limit = self.pool_width(sub_keys.len());

        let mut pending = sub_keys.iter().cloned();
        let mut in_flight: FuturesUnordered<_> = FuturesUnordered::new();

        for _ in 0..worker_limit {
            if let Some(sub_key) = pending.next() {
                in_flight.push(self.spawn_unit(ctx, sub_key, mode));
            }
        }

        while let Some(handle) = in_flight.next().await {
            match handle {
                Ok((_, Ok(outcome))) => {
                    report.succeeded += 1;
                    report.instruments += outcome.written;
                    report.skipped_instruments += outcome.skipped;
                }
                Ok((sub_key, Err(err))) => {
                    report.failed += 1;
                    if err.is_transient() {
                        warn!("Skipping {} {} this cycle: {}", ctx.symbol, sub_key, err);
                    } else {
                        error!("Writing {} {} failed: {}", ctx.symbol, sub_key, err);
                    }
                }
                Err(join_err) => {
                    report.failed += 1;
                    warn!("Fetch worker for {} failed: {}", ctx.symbol, join_err);
                }
            }

            if let Some(sub_key) = pending.next() {
                in_flight.push(self.spawn_unit(ctx, sub_key, mode));
            }
        }

        report
    }

    fn spawn_unit(
        &self,
        ctx: &SymbolContext,
        sub_key: String,
        mode: FetchMode,
    ) -> JoinHandle<(String, Result<UnitOutcome, RecorderError>)> {
        let unit = SubKeyUnit {
            source: Arc::clone(&self.source),
            store: self.store.clone(),
            clock: Arc::clone(&self.clock),
            columns: Arc::clone(&self.columns),
            symbol: ctx.symbol.clone(),
            chain_id: ctx.chain_id.clone(),
            sub_key: sub_key.clone(),
            mode,
        };
        tokio::spawn(async move { (sub_key, unit.run().await) })
    }
}

/// Fetch and write for a single expiration. Owns everything it touches.
struct SubKeyUnit {
    source: Arc<dyn SnapshotSource>,
    store: RecordStore,
    clock: Arc<dyn Clock>,
    columns: Arc<Vec<String>>,
    symbol: String,
    chain_id: String,
    sub_key: String,
    mode: FetchMode,
}

impl SubKeyUnit {
    async fn run(self) -> Result<UnitOutcome, RecorderError> {
        let SubKeyUnit {
            source,
            store,
            clock,
            columns,
            symbol,
            chain_id,
            sub_key,
            mode,
        } = self;

        let records = source.fetch(&chain_id, &sub_key).await?;
        let snapshot = Snapshot {
            sub_key,
            taken_at: clock.now(),
            records,
        };
        let label = format!("{} {}", symbol, snapshot.sub_key);

        tokio::task::spawn_blocking(move || match mode {
            FetchMode::Record => Ok(append_snapshot(&store, &symbol, &columns, &snapshot)),
            FetchMode::Bootstrap => bootstrap_snapshot(&store, &symbol, &columns, &snapshot),
        })
        .await
        .map_err(|_| RecorderError::WorkerPanicked(label))?
    }
}

/// Writes one row per contract. A contract whose log cannot be appended to is
/// skipped on its own; the rest of the snapshot is still recorded.
fn append_snapshot(
    store: &RecordStore,
    symbol: &str,
    columns: &[String],
    snapshot: &Snapshot,
) -> UnitOutcome {
    let timestamp = snapshot.timestamp_label();
    let mut outcome = UnitOutcome::default();

    for record in &snapshot.records {
        let values = record.column_values(columns);
        match store.append_instrument_row(symbol, &snapshot.sub_key, &record.id, &timestamp, &values)
        {
            Ok(()) => outcome.written += 1,
            Err(err @ RecorderError::MissingInstrumentLog { .. }) => {
                outcome.skipped += 1;
                warn!("{} {} not recorded: {}", symbol, snapshot.sub_key, err);
            }
            Err(err) => {
                outcome.skipped += 1;
                error!("{} {} {} not recorded: {}", symbol, snapshot.sub_key, record.id, err);
            }
        }
    }

    outcome
}

fn bootstrap_snapshot(
    store: &RecordStore,
    symbol: &str,
    columns: &[String],
    snapshot: &Snapshot,
) -> Result<UnitOutcome, RecorderError> {
    let sub_key = snapshot.sub_key.as_str();
    store.ensure_location(symbol, sub_key)?;
    for side in OptionSide::ALL {
        store.ensure_reference_table(symbol, sub_key, side)?;
    }

    let mut created_logs = 0usize;
    for record in &snapshot.records {
        store.append_reference_row(symbol, sub_key, record.side, record.strike_price, &record.id)?;
        if store.ensure_instrument_log(symbol, sub_key, &record.id, columns)?
            == EnsureOutcome::Created
        {
            created_logs += 1;
        }
    }

    if created_logs > 0 {
        debug!(
            "Created {} new instrument log(s) for {} {}",
            created_logs, symbol, sub_key
        );
    }
    Ok(UnitOutcome {
        written: snapshot.records.len(),
        skipped: 0,
    })
}
