use crate::context::AppContext;
use anyhow::{anyhow, Result};
use log::{info, warn};

pub async fn run(app: &AppContext, bootstrap_files: bool) -> Result<()> {
    let symbols = &app.config().symbols;
    info!(
        "Setting up {} symbol(s) under {}{}",
        symbols.len(),
        app.config().storage_root.display(),
        if bootstrap_files {
            " with instrument files"
        } else {
            ""
        }
    );

    let recorder = app.recorder();
    let summary = recorder.run_setup(symbols, bootstrap_files).await;

    if !summary.failed_symbols.is_empty() {
        warn!(
            "Setup skipped {} symbol(s): {}",
            summary.failed_symbols.len(),
            summary.failed_symbols.join(", ")
        );
    }
    if summary.contexts.is_empty() {
        return Err(anyhow!("Setup failed for every requested symbol"));
    }

    if bootstrap_files {
        info!(
            "Bootstrapped {} instrument(s) across {} expiration(s); {} expiration(s) failed",
            summary.bootstrap.instruments,
            summary.bootstrap.succeeded,
            summary.bootstrap.failed
        );
    }
    info!("Setup ready for {} symbol(s)", summary.contexts.len());
    Ok(())
}
