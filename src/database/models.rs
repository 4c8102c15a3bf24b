use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::chainhook::models::Hash32;
use crate::chainhook::tracker::ChainTipState;

/// Persisted chain tip for one stream
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TipRow {
    pub stream: String,
    pub height: i64,
    /// `None` while the tip is unanchored
    pub hash: Option<String>,
    /// Recent canonical hashes keyed by height, as JSON
    pub history_json: String,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl TipRow {
    pub fn into_state(self) -> Result<ChainTipState> {
        let hash = self
            .hash
            .as_deref()
            .map(|h| h.parse::<Hash32>())
            .transpose()
            .map_err(|e| anyhow::anyhow!("Invalid stored tip hash: {e}"))?;
        let history: BTreeMap<u64, Hash32> = serde_json::from_str(&self.history_json)
            .context("Failed to decode stored tip history")?;

        Ok(ChainTipState {
            height: u64::try_from(self.height).context("Negative stored tip height")?,
            hash,
            history,
            version: u64::try_from(self.version).context("Negative stored tip version")?,
        })
    }
}

/// Column values for saving a tip
#[derive(Debug, Clone)]
pub struct NewTipRow {
    pub stream: String,
    pub height: i64,
    pub hash: Option<String>,
    pub history_json: String,
    pub version: i64,
}

impl NewTipRow {
    pub fn from_state(stream: &str, tip: &ChainTipState) -> Result<Self> {
        Ok(Self {
            stream: stream.to_string(),
            height: i64::try_from(tip.height).context("Tip height exceeds BIGINT")?,
            hash: tip.hash.map(|h| h.to_string()),
            history_json: serde_json::to_string(&tip.history)
                .context("Failed to encode tip history")?,
            version: i64::try_from(tip.version).context("Tip version exceeds BIGINT")?,
        })
    }
}

/// A stored chain event
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChainEventRow {
    pub tx_id: String,
    pub event_index: i32,
    pub block_height: i64,
    pub block_hash: String,
    pub event_kind: String,
    /// Serialized event data
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

/// Parameters for storing a chain event
#[derive(Debug, Clone)]
pub struct NewChainEvent {
    pub tx_id: String,
    pub event_index: i32,
    pub block_height: i64,
    pub block_hash: String,
    pub event_kind: String,
    pub payload: String,
}
