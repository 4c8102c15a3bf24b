use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing::debug;

use super::models::{ChainEventRow, NewChainEvent};

/// Repository for stored chain events
pub struct ChainEventRepository {
    pool: PgPool,
}

impl ChainEventRepository {
    /// Creates a new repository instance
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stores an event, replacing a row written for another block hash.
    /// Returns `false` when the same event was already stored.
    pub async fn insert(&self, event: &NewChainEvent) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO chain_events (
                tx_id,
                event_index,
                block_height,
                block_hash,
                event_kind,
                payload
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tx_id, event_index) DO UPDATE SET
                block_height = EXCLUDED.block_height,
                block_hash = EXCLUDED.block_hash,
                event_kind = EXCLUDED.event_kind,
                payload = EXCLUDED.payload
            WHERE chain_events.block_hash <> EXCLUDED.block_hash
               OR chain_events.block_height <> EXCLUDED.block_height
            "#,
        )
        .bind(&event.tx_id)
        .bind(event.event_index)
        .bind(event.block_height)
        .bind(&event.block_hash)
        .bind(&event.event_kind)
        .bind(&event.payload)
        .execute(&self.pool)
        .await
        .context("Failed to insert chain event")?;

        let inserted = result.rows_affected() > 0;
        debug!(
            "Stored event {} of tx {} at height {} (new: {})",
            event.event_index, event.tx_id, event.block_height, inserted
        );
        Ok(inserted)
    }

    /// Removes an event of a rolled back block. Returns `false` when absent.
    ///
    /// Matched by height, not hash: a fork rollback reports the block under
    /// a hash that differs from the one the event was stored with.
    pub async fn delete(&self, tx_id: &str, event_index: i32, block_height: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM chain_events
            WHERE tx_id = $1 AND event_index = $2 AND block_height = $3
            "#,
        )
        .bind(tx_id)
        .bind(event_index)
        .bind(block_height)
        .execute(&self.pool)
        .await
        .context("Failed to delete chain event")?;

        Ok(result.rows_affected() > 0)
    }

    /// Gets a stored event
    pub async fn get(&self, tx_id: &str, event_index: i32) -> Result<Option<ChainEventRow>> {
        let record = sqlx::query_as::<_, ChainEventRow>(
            r#"
            SELECT
                tx_id,
                event_index,
                block_height,
                block_hash,
                event_kind,
                payload,
                created_at
            FROM chain_events
            WHERE tx_id = $1 AND event_index = $2
            "#,
        )
        .bind(tx_id)
        .bind(event_index)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to get chain event")?;

        Ok(record)
    }

    /// Counts stored events for a block height
    pub async fn count_at_height(&self, block_height: i64) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM chain_events WHERE block_height = $1
            "#,
        )
        .bind(block_height)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count chain events")?;

        Ok(count.0)
    }
}
