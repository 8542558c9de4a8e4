use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use recorder::{
    commands::{record, setup},
    config::{
        settings_from_env, RecorderConfig, LAG_KEY, PERIOD_KEY, STORAGE_ROOT_KEY, SYMBOLS_KEY,
    },
    context::AppContext,
};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "recorder")]
#[command(about = "Records option-chain snapshots on a fixed wall-clock schedule")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve option chains and create the per-expiration directories and files
    Setup {
        /// Comma or space separated symbols (overrides RECORDER_SYMBOLS)
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        symbols: Vec<String>,
        /// Root directory for recorded data (overrides RECORDER_STORAGE_ROOT)
        #[arg(long = "storage-root", value_name = "PATH")]
        storage_root: Option<PathBuf>,
        /// Only create directories and reference tables, skip instrument files
        #[arg(long = "no-files")]
        no_files: bool,
    },
    /// Record snapshots every period until the end of the active window
    Record {
        /// Comma or space separated symbols (overrides RECORDER_SYMBOLS)
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        symbols: Vec<String>,
        /// Root directory for recorded data (overrides RECORDER_STORAGE_ROOT)
        #[arg(long = "storage-root", value_name = "PATH")]
        storage_root: Option<PathBuf>,
        /// Minutes between snapshots; must divide 60
        #[arg(long)]
        period: Option<u32>,
        /// Seconds to start ahead of each period mark
        #[arg(long)]
        lag: Option<u32>,
        /// Create missing instrument files before recording starts
        #[arg(long)]
        bootstrap: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();

    let mut settings = settings_from_env();
    apply_overrides(&mut settings, &command);
    let config = RecorderConfig::from_settings_map(&settings)?;
    let app_context = AppContext::initialize(config)?;

    info!("Starting option chain recorder");

    match command {
        Commands::Setup { no_files, .. } => {
            setup::run(&app_context, !no_files).await?;
        }
        Commands::Record { bootstrap, .. } => {
            record::run(&app_context, bootstrap).await?;
        }
    }

    Ok(())
}

fn apply_overrides(settings: &mut HashMap<String, String>, command: &Commands) {
    let (symbols, storage_root) = match command {
        Commands::Setup {
            symbols,
            storage_root,
            ..
        }
        | Commands::Record {
            symbols,
            storage_root,
            ..
        } => (symbols, storage_root),
    };

    if !symbols.is_empty() {
        settings.insert(SYMBOLS_KEY.to_string(), symbols.join(","));
    }
    if let Some(path) = storage_root {
        settings.insert(
            STORAGE_ROOT_KEY.to_string(),
            path.to_string_lossy().into_owned(),
        );
    }

    if let Commands::Record { period, lag, .. } = command {
        if let Some(period) = period {
            settings.insert(PERIOD_KEY.to_string(), period.to_string());
        }
        if let Some(lag) = lag {
            settings.insert(LAG_KEY.to_string(), lag.to_string());
        }
    }
}
