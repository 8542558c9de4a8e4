use crate::broker::DEFAULT_BROKER_URL;
use crate::fetcher::DEFAULT_SETUP_COOLDOWN;
use crate::models::{default_columns, RECORDED_COLUMNS};
use crate::schedule::{
    ActiveWindow, Schedule, DEFAULT_WAIT_SECONDS, DEFAULT_WINDOW_END_HOUR,
    DEFAULT_WINDOW_START_HOUR,
};
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const SYMBOLS_KEY: &str = "RECORDER_SYMBOLS";
pub const STORAGE_ROOT_KEY: &str = "RECORDER_STORAGE_ROOT";
pub const PERIOD_KEY: &str = "RECORDER_PERIOD_MINUTES";
pub const LAG_KEY: &str = "RECORDER_LAG_SECONDS";
pub const WAIT_KEY: &str = "RECORDER_WAIT_SECONDS";
pub const WINDOW_START_KEY: &str = "RECORDER_WINDOW_START_HOUR";
pub const WINDOW_END_KEY: &str = "RECORDER_WINDOW_END_HOUR";
pub const MAX_CONCURRENCY_KEY: &str = "RECORDER_MAX_CONCURRENCY";
pub const SETUP_COOLDOWN_KEY: &str = "RECORDER_SETUP_COOLDOWN_SECONDS";
pub const COLUMNS_KEY: &str = "RECORDER_COLUMNS";
pub const BROKER_URL_KEY: &str = "BROKER_API_URL";
pub const BROKER_TOKEN_KEY: &str = "BROKER_API_TOKEN";
pub const BROKER_TIMEOUT_KEY: &str = "BROKER_TIMEOUT_SECONDS";

const DEFAULT_STORAGE_ROOT: &str = "option-data";
const DEFAULT_PERIOD_MINUTES: u32 = 10;
const DEFAULT_LAG_SECONDS: u32 = 3;
const DEFAULT_BROKER_TIMEOUT_SECS: u32 = 30;

#[derive(Debug, Clone)]
pub struct BrokerSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

/// Everything a recording session needs, validated up front.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub symbols: Vec<String>,
    pub storage_root: PathBuf,
    pub schedule: Schedule,
    pub window: ActiveWindow,
    pub columns: Vec<String>,
    pub max_concurrency: Option<usize>,
    pub setup_cooldown: Duration,
    pub broker: BrokerSettings,
}

impl RecorderConfig {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let symbols = parse_symbols(optional_setting(settings, SYMBOLS_KEY).unwrap_or_default());
        if symbols.is_empty() {
            return Err(anyhow!(
                "Setting {} must list at least one symbol",
                SYMBOLS_KEY
            ));
        }

        let storage_root = PathBuf::from(
            optional_setting(settings, STORAGE_ROOT_KEY).unwrap_or(DEFAULT_STORAGE_ROOT),
        );

        let period = setting_u32(settings, PERIOD_KEY, DEFAULT_PERIOD_MINUTES, 1, 60)?;
        let lag = setting_u32(settings, LAG_KEY, DEFAULT_LAG_SECONDS, 0, 3_599)?;
        let wait = setting_u32(settings, WAIT_KEY, DEFAULT_WAIT_SECONDS, 0, 3_600)?;
        let schedule = Schedule::new(period, lag)?.with_wait(wait);

        let start_hour = setting_u32(settings, WINDOW_START_KEY, DEFAULT_WINDOW_START_HOUR, 0, 23)?;
        let end_hour = setting_u32(settings, WINDOW_END_KEY, DEFAULT_WINDOW_END_HOUR, 1, 24)?;
        let window = ActiveWindow::new(start_hour, end_hour)?;

        let columns = match optional_setting(settings, COLUMNS_KEY) {
            Some(raw) => parse_columns(raw)?,
            None => default_columns(),
        };

        let max_concurrency = match optional_setting(settings, MAX_CONCURRENCY_KEY) {
            Some(_) => Some(setting_u32(settings, MAX_CONCURRENCY_KEY, 0, 1, u32::MAX)? as usize),
            None => None,
        };

        let cooldown_secs = setting_u32(
            settings,
            SETUP_COOLDOWN_KEY,
            DEFAULT_SETUP_COOLDOWN.as_secs() as u32,
            0,
            3_600,
        )?;

        let broker = BrokerSettings {
            base_url: optional_setting(settings, BROKER_URL_KEY)
                .unwrap_or(DEFAULT_BROKER_URL)
                .to_string(),
            token: optional_setting(settings, BROKER_TOKEN_KEY).map(str::to_string),
            timeout: Duration::from_secs(u64::from(setting_u32(
                settings,
                BROKER_TIMEOUT_KEY,
                DEFAULT_BROKER_TIMEOUT_SECS,
                1,
                600,
            )?)),
        };

        Ok(Self {
            symbols,
            storage_root,
            schedule,
            window,
            columns,
            max_concurrency,
            setup_cooldown: Duration::from_secs(u64::from(cooldown_secs)),
            broker,
        })
    }
}

/// Process environment as a settings map.
pub fn settings_from_env() -> HashMap<String, String> {
    std::env::vars().collect()
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn setting_u32(
    settings: &HashMap<String, String>,
    key: &str,
    default: u32,
    min: u32,
    max: u32,
) -> Result<u32> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(default);
    };
    let value = raw
        .parse::<u32>()
        .map_err(|_| anyhow!("Setting {} must be a non-negative integer (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    if value > max {
        return Err(anyhow!(
            "Setting {} must be <= {} (value: {})",
            key,
            max,
            raw
        ));
    }
    Ok(value)
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.trim()
        .trim_matches(|c: char| c == '[' || c == ']')
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
}

/// Upper-cased, de-duplicated symbols in the order given.
pub fn parse_symbols(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for entry in split_list(raw) {
        let symbol = entry.to_uppercase();
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols
}

fn parse_columns(raw: &str) -> Result<Vec<String>> {
    let mut columns = Vec::new();
    for entry in split_list(raw) {
        if !RECORDED_COLUMNS.iter().any(|known| *known == entry) {
            return Err(anyhow!(
                "Setting {} contains unknown column {} (value: {})",
                COLUMNS_KEY,
                entry,
                raw
            ));
        }
        columns.push(entry.to_string());
    }
    if columns.is_empty() {
        return Err(anyhow!(
            "Setting {} must contain at least one column (value: {})",
            COLUMNS_KEY,
            raw
        ));
    }
    Ok(columns)
}
