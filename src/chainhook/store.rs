//! Persistence interface for the chain tip

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::error::StoreError;
use super::tracker::ChainTipState;

/// Durable storage for the chain-tip state.
///
/// `save_tip` is a compare-and-swap on `version`: it succeeds only when the
/// stored state is at `tip.version - 1` (or absent and `tip.version == 1`).
#[async_trait]
pub trait TipStore: Send + Sync {
    async fn load_tip(&self) -> Result<Option<ChainTipState>, StoreError>;

    async fn save_tip(&self, tip: &ChainTipState) -> Result<(), StoreError>;
}

/// In-process tip store for tests and database-less deployments
#[derive(Debug, Default)]
pub struct InMemoryTipStore {
    tip: RwLock<Option<ChainTipState>>,
}

impl InMemoryTipStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an already persisted state
    pub fn with_tip(tip: ChainTipState) -> Self {
        Self {
            tip: RwLock::new(Some(tip)),
        }
    }

    pub async fn snapshot(&self) -> Option<ChainTipState> {
        self.tip.read().await.clone()
    }
}

#[async_trait]
impl TipStore for InMemoryTipStore {
    async fn load_tip(&self) -> Result<Option<ChainTipState>, StoreError> {
        Ok(self.tip.read().await.clone())
    }

    async fn save_tip(&self, tip: &ChainTipState) -> Result<(), StoreError> {
        let mut stored = self.tip.write().await;
        let found = stored.as_ref().map(|t| t.version);
        let expected = tip.version.saturating_sub(1);
        if found.unwrap_or(0) != expected || tip.version == 0 {
            return Err(StoreError::Conflict { expected, found });
        }

        debug!("Stored tip #{} at version {}", tip.height, tip.version);
        *stored = Some(tip.clone());
        Ok(())
    }
}
