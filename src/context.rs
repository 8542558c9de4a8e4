use crate::broker::BrokerClient;
use crate::clock::{Clock, SystemClock};
use crate::config::RecorderConfig;
use crate::fetcher::FanOutFetcher;
use crate::orchestrator::Recorder;
use crate::source::SnapshotSource;
use crate::store::RecordStore;
use anyhow::Result;
use log::info;
use std::sync::Arc;

/// Process-wide wiring: configuration plus the collaborators built from it.
#[derive(Clone)]
pub struct AppContext {
    config: RecorderConfig,
    source: Arc<dyn SnapshotSource>,
    clock: Arc<dyn Clock>,
}

impl AppContext {
    pub fn initialize(config: RecorderConfig) -> Result<Self> {
        let broker = BrokerClient::new(
            &config.broker.base_url,
            config.broker.token.as_deref(),
            config.broker.timeout,
        )?;
        info!("Using broker API at {}", config.broker.base_url);
        Ok(Self::with_components(
            config,
            Arc::new(broker),
            Arc::new(SystemClock),
        ))
    }

    pub fn with_components(
        config: RecorderConfig,
        source: Arc<dyn SnapshotSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            source,
            clock,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn recorder(&self) -> Recorder {
        let fetcher = FanOutFetcher::new(
            Arc::clone(&self.source),
            RecordStore::new(&self.config.storage_root),
            Arc::clone(&self.clock),
            self.config.columns.clone(),
        )
        .with_max_concurrency(self.config.max_concurrency)
        .with_setup_cooldown(self.config.setup_cooldown);

        Recorder::new(fetcher, self.config.schedule, self.config.window)
    }
}
