use crate::error::RecorderError;
use crate::models::{OptionSide, TIME_COLUMN};
use csv::{ReaderBuilder, WriterBuilder};
use log::debug;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const REFERENCE_HEADER: [&str; 2] = ["Strike_Price", "Strike_ID"];
const REFERENCE_ID_COLUMN: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    AlreadyExists,
}

/// Append-only CSV layout under a root directory:
///
/// ```text
/// <root>/<SYMBOL>/<expiration>/Call_ID_Strike.csv
/// <root>/<SYMBOL>/<expiration>/Put_ID_Strike.csv
/// <root>/<SYMBOL>/<expiration>/<instrument_id>.csv
/// ```
///
/// Distinct `(symbol, expiration)` pairs never share a file, so writers working on
/// different expirations need no coordination.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.root.join(symbol)
    }

    pub fn location(&self, symbol: &str, sub_key: &str) -> PathBuf {
        self.symbol_dir(symbol).join(sub_key)
    }

    pub fn reference_table_path(&self, symbol: &str, sub_key: &str, side: OptionSide) -> PathBuf {
        self.location(symbol, sub_key)
            .join(format!("{}_ID_Strike.csv", side.label()))
    }

    pub fn instrument_log_path(&self, symbol: &str, sub_key: &str, instrument_id: &str) -> PathBuf {
        self.location(symbol, sub_key)
            .join(format!("{}.csv", instrument_id))
    }

    pub fn ensure_symbol_location(&self, symbol: &str) -> Result<EnsureOutcome, RecorderError> {
        create_dir(&self.symbol_dir(symbol))
    }

    pub fn ensure_location(&self, symbol: &str, sub_key: &str) -> Result<EnsureOutcome, RecorderError> {
        create_dir(&self.location(symbol, sub_key))
    }

    pub fn ensure_reference_table(
        &self,
        symbol: &str,
        sub_key: &str,
        side: OptionSide,
    ) -> Result<EnsureOutcome, RecorderError> {
        let path = self.reference_table_path(symbol, sub_key, side);
        create_with_header(&path, REFERENCE_HEADER.iter().copied())
    }

    /// Adds `instrument_id` to the side's reference table unless it is already listed.
    /// Returns whether a row was written.
    pub fn append_reference_row(
        &self,
        symbol: &str,
        sub_key: &str,
        side: OptionSide,
        strike: f64,
        instrument_id: &str,
    ) -> Result<bool, RecorderError> {
        let path = self.reference_table_path(symbol, sub_key, side);
        if self.reference_ids(&path)?.iter().any(|id| id == instrument_id) {
            return Ok(false);
        }

        let file = open_append(&path)?;
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        writer.write_record([format_strike(strike).as_str(), instrument_id])?;
        writer.flush().map_err(|err| RecorderError::io(&path, err))?;
        Ok(true)
    }

    pub fn reference_rows(
        &self,
        symbol: &str,
        sub_key: &str,
        side: OptionSide,
    ) -> Result<Vec<(String, String)>, RecorderError> {
        let path = self.reference_table_path(symbol, sub_key, side);
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_path(&path)?;
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push((
                record.get(0).unwrap_or_default().to_string(),
                record.get(REFERENCE_ID_COLUMN).unwrap_or_default().to_string(),
            ));
        }
        Ok(rows)
    }

    pub fn ensure_instrument_log<S: AsRef<str>>(
        &self,
        symbol: &str,
        sub_key: &str,
        instrument_id: &str,
        header_columns: &[S],
    ) -> Result<EnsureOutcome, RecorderError> {
        let path = self.instrument_log_path(symbol, sub_key, instrument_id);
        let header = std::iter::once(TIME_COLUMN).chain(header_columns.iter().map(|c| c.as_ref()));
        create_with_header(&path, header)
    }

    /// Appends `[timestamp, values...]` to an existing instrument log. The log must
    /// have been bootstrapped by [`RecordStore::ensure_instrument_log`].
    pub fn append_instrument_row<S: AsRef<str>>(
        &self,
        symbol: &str,
        sub_key: &str,
        instrument_id: &str,
        timestamp: &str,
        values: &[S],
    ) -> Result<(), RecorderError> {
        let path = self.instrument_log_path(symbol, sub_key, instrument_id);
        let file = match OpenOptions::new().append(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(RecorderError::MissingInstrumentLog { path });
            }
            Err(err) => return Err(RecorderError::io(&path, err)),
        };

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        let row = std::iter::once(timestamp).chain(values.iter().map(|v| v.as_ref()));
        writer.write_record(row)?;
        writer.flush().map_err(|err| RecorderError::io(&path, err))?;
        Ok(())
    }

    fn reference_ids(&self, path: &Path) -> Result<Vec<String>, RecorderError> {
        let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
        let mut ids = Vec::new();
        for record in reader.records() {
            if let Some(id) = record?.get(REFERENCE_ID_COLUMN) {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }
}

/// Strikes always carry a decimal point: `150.0`, `152.5`.
fn format_strike(strike: f64) -> String {
    let text = strike.to_string();
    if strike.is_finite() && !text.contains('.') {
        format!("{}.0", text)
    } else {
        text
    }
}

fn create_dir(path: &Path) -> Result<EnsureOutcome, RecorderError> {
    match fs::create_dir_all(path.parent().unwrap_or(path))
        .and_then(|_| fs::create_dir(path))
    {
        Ok(()) => Ok(EnsureOutcome::Created),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            debug!("Directory {} already exists", path.display());
            Ok(EnsureOutcome::AlreadyExists)
        }
        Err(err) => Err(RecorderError::io(path, err)),
    }
}

fn create_with_header<'a>(
    path: &Path,
    header: impl IntoIterator<Item = &'a str>,
) -> Result<EnsureOutcome, RecorderError> {
    let file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            return Ok(EnsureOutcome::AlreadyExists);
        }
        Err(err) => return Err(RecorderError::io(path, err)),
    };

    let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
    writer.write_record(header)?;
    writer.flush().map_err(|err| RecorderError::io(path, err))?;
    Ok(EnsureOutcome::Created)
}

fn open_append(path: &Path) -> Result<File, RecorderError> {
    OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|err| RecorderError::io(path, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<String> {
        vec!["mark_price".to_string(), "volume".to_string()]
    }

    #[test]
    fn ensure_calls_are_no_ops_the_second_time() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());

        assert_eq!(store.ensure_symbol_location("XYZ").unwrap(), EnsureOutcome::Created);
        assert_eq!(
            store.ensure_symbol_location("XYZ").unwrap(),
            EnsureOutcome::AlreadyExists
        );
        assert_eq!(
            store.ensure_location("XYZ", "2024-01-19").unwrap(),
            EnsureOutcome::Created
        );
        assert_eq!(
            store.ensure_location("XYZ", "2024-01-19").unwrap(),
            EnsureOutcome::AlreadyExists
        );
        assert_eq!(
            store
                .ensure_reference_table("XYZ", "2024-01-19", OptionSide::Put)
                .unwrap(),
            EnsureOutcome::Created
        );
        assert_eq!(
            store
                .ensure_reference_table("XYZ", "2024-01-19", OptionSide::Put)
                .unwrap(),
            EnsureOutcome::AlreadyExists
        );
        assert_eq!(
            store
                .ensure_instrument_log("XYZ", "2024-01-19", "abc", &columns())
                .unwrap(),
            EnsureOutcome::Created
        );
        assert_eq!(
            store
                .ensure_instrument_log("XYZ", "2024-01-19", "abc", &columns())
                .unwrap(),
            EnsureOutcome::AlreadyExists
        );

        let log = fs::read_to_string(store.instrument_log_path("XYZ", "2024-01-19", "abc")).unwrap();
        assert_eq!(log, "Time,mark_price,volume\n");
    }

    #[test]
    fn reference_rows_are_written_once_per_instrument() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        store.ensure_location("XYZ", "2024-01-19").unwrap();
        store
            .ensure_reference_table("XYZ", "2024-01-19", OptionSide::Call)
            .unwrap();

        assert!(store
            .append_reference_row("XYZ", "2024-01-19", OptionSide::Call, 152.5, "abc")
            .unwrap());
        assert!(!store
            .append_reference_row("XYZ", "2024-01-19", OptionSide::Call, 152.5, "abc")
            .unwrap());
        assert!(store
            .append_reference_row("XYZ", "2024-01-19", OptionSide::Call, 155.0, "def")
            .unwrap());

        let rows = store
            .reference_rows("XYZ", "2024-01-19", OptionSide::Call)
            .unwrap();
        assert_eq!(
            rows,
            vec![
                ("152.5".to_string(), "abc".to_string()),
                ("155.0".to_string(), "def".to_string()),
            ]
        );
    }

    #[test]
    fn strikes_are_written_with_a_decimal_point() {
        assert_eq!(format_strike(150.0), "150.0");
        assert_eq!(format_strike(152.5), "152.5");
        assert_eq!(format_strike(0.5), "0.5");
        assert_eq!(format_strike(1200.0), "1200.0");
    }

    #[test]
    fn appending_to_a_missing_log_fails_loudly() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        store.ensure_location("XYZ", "2024-01-19").unwrap();

        let err = store
            .append_instrument_row("XYZ", "2024-01-19", "ghost", "2024-01-19 09:09:57", &["1.0"])
            .unwrap_err();
        assert!(matches!(err, RecorderError::MissingInstrumentLog { .. }));
        assert!(!store.instrument_log_path("XYZ", "2024-01-19", "ghost").exists());
    }

    #[test]
    fn rows_are_appended_after_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path());
        store.ensure_location("XYZ", "2024-01-19").unwrap();
        store
            .ensure_instrument_log("XYZ", "2024-01-19", "abc", &columns())
            .unwrap();

        store
            .append_instrument_row("XYZ", "2024-01-19", "abc", "2024-01-19 09:09:57", &["1.25", "10"])
            .unwrap();
        store
            .append_instrument_row("XYZ", "2024-01-19", "abc", "2024-01-19 09:19:57", &["1.30", ""])
            .unwrap();

        let log = fs::read_to_string(store.instrument_log_path("XYZ", "2024-01-19", "abc")).unwrap();
        assert_eq!(
            log,
            "Time,mark_price,volume\n2024-01-19 09:09:57,1.25,10\n2024-01-19 09:19:57,1.30,\n"
        );
    }
}
