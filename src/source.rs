use crate::error::RecorderError;
use crate::models::{ChainListing, InstrumentRecord};
use async_trait::async_trait;

/// Remote provider of option-chain snapshots.
///
/// Implementations are shared across every per-symbol and per-expiration worker, so
/// both calls must be safe to issue concurrently.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Chain identifier and the expirations currently listed for `symbol`.
    async fn resolve_chain(&self, symbol: &str) -> Result<ChainListing, RecorderError>;

    /// Current quotes for every tradable instrument of `chain_id` expiring on `sub_key`.
    async fn fetch(
        &self,
        chain_id: &str,
        sub_key: &str,
    ) -> Result<Vec<InstrumentRecord>, RecorderError>;
}
