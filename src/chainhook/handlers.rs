//! Built-in chain event handlers

use async_trait::async_trait;
use tracing::{debug, info};

use super::dispatcher::{ChainEventHandler, TxContext};
use super::error::HandlerError;
use super::models::ReceiptEvent;
use crate::database::models::NewChainEvent;
use crate::database::ChainEventRepository;

/// Handler that only logs events
pub struct LogOnlyHandler {
    name: String,
}

impl LogOnlyHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl ChainEventHandler for LogOnlyHandler {
    async fn apply(&self, event: &ReceiptEvent, ctx: &TxContext) -> Result<(), HandlerError> {
        info!(
            "[{}] {} event {} of tx {} ({}, {}) at block {}",
            self.name,
            event.kind,
            event.index,
            ctx.tx_id,
            ctx.tx_kind,
            ctx.receipt_status.as_str(),
            ctx.block
        );
        debug!("[{}] Event data: {:?}", self.name, event.data);
        Ok(())
    }

    async fn compensate(&self, event: &ReceiptEvent, ctx: &TxContext) -> Result<(), HandlerError> {
        info!(
            "[{}] Rolled back {} event {} of tx {} at block {}",
            self.name, event.kind, event.index, ctx.tx_id, ctx.block
        );
        Ok(())
    }
}

/// Handler storing events in Postgres.
///
/// Rows are keyed on (tx id, event index): re-applying an event is a no-op,
/// and applying it under a new block hash replaces the stale row.
/// Compensation deletes the rows written at the rolled back height.
pub struct EventStoreHandler {
    repository: ChainEventRepository,
}

impl EventStoreHandler {
    pub fn new(repository: ChainEventRepository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl ChainEventHandler for EventStoreHandler {
    async fn apply(&self, event: &ReceiptEvent, ctx: &TxContext) -> Result<(), HandlerError> {
        let payload = serde_json::to_string(&event.data)
            .map_err(|e| HandlerError::permanent(format!("Failed to encode event data: {e}")))?;

        let record = NewChainEvent {
            tx_id: ctx.tx_id.to_string(),
            event_index: event.index as i32,
            block_height: ctx.block.index as i64,
            block_hash: ctx.block.hash.to_string(),
            event_kind: event.kind.to_string(),
            payload,
        };

        let inserted = self.repository.insert(&record).await.map_err(classify)?;
        if !inserted {
            debug!(
                "Event {} of tx {} already stored, skipping",
                event.index, ctx.tx_id
            );
        }
        Ok(())
    }

    async fn compensate(&self, event: &ReceiptEvent, ctx: &TxContext) -> Result<(), HandlerError> {
        let removed = self
            .repository
            .delete(&ctx.tx_id.to_string(), event.index as i32, ctx.block.index as i64)
            .await
            .map_err(classify)?;
        debug!(
            "Compensated event {} of tx {} at block {} (removed: {})",
            event.index, ctx.tx_id, ctx.block, removed
        );
        Ok(())
    }
}

/// Connection-level database failures are worth retrying, everything else is not
fn classify(err: anyhow::Error) -> HandlerError {
    let transient = match err.downcast_ref::<sqlx::Error>() {
        Some(
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed,
        ) => true,
        // serialization failure, deadlock
        Some(sqlx::Error::Database(db)) => {
            matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
        }
        _ => false,
    };

    if transient {
        HandlerError::transient(format!("{err:#}"))
    } else {
        HandlerError::permanent(format!("{err:#}"))
    }
}
