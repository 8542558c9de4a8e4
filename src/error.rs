use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    /// Network or API failure for a single sub-key. Isolated to its worker.
    #[error("fetch for {chain_id} {sub_key} failed: {message}")]
    TransientFetch {
        chain_id: String,
        sub_key: String,
        message: String,
    },

    /// `retryable` is false when the source gave a definitive answer, such as an
    /// unknown symbol or a rejected request.
    #[error("could not resolve option chain for {symbol}: {message}")]
    ChainResolution {
        symbol: String,
        message: String,
        retryable: bool,
    },

    #[error("invalid recording schedule: {0}")]
    ScheduleMisconfiguration(String),

    /// Steady-state recording found no log to append to; setup has not run for it.
    #[error("instrument log {} does not exist; run setup first", path.display())]
    MissingInstrumentLog { path: PathBuf },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("worker for {0} stopped unexpectedly")]
    WorkerPanicked(String),
}

impl RecorderError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFetch { .. })
    }

    /// Whether calling the source again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransientFetch { .. } => true,
            Self::ChainResolution { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
