use crate::context::AppContext;
use anyhow::{anyhow, Result};
use log::{info, warn};

/// Resolves the chains for the configured symbols and records until the active
/// window closes. With `bootstrap` the instrument logs are created first; otherwise
/// they must already exist from a previous `setup`.
pub async fn run(app: &AppContext, bootstrap: bool) -> Result<()> {
    let config = app.config();
    info!(
        "Recording {} every {} minute(s) with {}s lag between {}:00 and {}:00",
        config.symbols.join(", "),
        config.schedule.period_minutes,
        config.schedule.lag_seconds,
        config.window.start_hour,
        config.window.end_hour
    );

    let recorder = app.recorder();
    let setup = recorder.run_setup(&config.symbols, bootstrap).await;
    if !setup.failed_symbols.is_empty() {
        warn!(
            "Not recording {} symbol(s) that failed setup: {}",
            setup.failed_symbols.len(),
            setup.failed_symbols.join(", ")
        );
    }
    if setup.contexts.is_empty() {
        return Err(anyhow!("No symbols left to record"));
    }

    let summary = recorder.run_periodically(setup.contexts).await?;
    for symbol in &summary.symbols {
        info!(
            "{}: {} cycle(s), {} row(s) appended, {} contract(s) skipped, {} failed expiration fetch(es)",
            symbol.symbol,
            symbol.cycles,
            symbol.totals.instruments,
            symbol.totals.skipped_instruments,
            symbol.totals.failed
        );
    }
    Ok(())
}
