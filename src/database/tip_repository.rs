use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, warn};

use super::models::{NewTipRow, TipRow};
use crate::chainhook::error::StoreError;
use crate::chainhook::store::TipStore;
use crate::chainhook::tracker::ChainTipState;

/// Postgres-backed tip store, one row per stream
pub struct PgTipStore {
    pool: PgPool,
    stream: String,
}

impl PgTipStore {
    pub fn new(pool: PgPool, stream: impl Into<String>) -> Self {
        Self {
            pool,
            stream: stream.into(),
        }
    }

    async fn stored_version(&self) -> Result<Option<u64>, StoreError> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM chain_tips WHERE stream = $1")
                .bind(&self.stream)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to read stored tip version")?;
        Ok(version.map(|v| v as u64))
    }
}

#[async_trait]
impl TipStore for PgTipStore {
    async fn load_tip(&self) -> Result<Option<ChainTipState>, StoreError> {
        let row = sqlx::query_as::<_, TipRow>(
            r#"
            SELECT
                stream,
                height,
                hash,
                history_json,
                version,
                updated_at
            FROM chain_tips
            WHERE stream = $1
            "#,
        )
        .bind(&self.stream)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to load chain tip")?;

        match row {
            Some(row) => {
                let state = row.into_state()?;
                debug!(
                    "Loaded tip #{} (version {}) for stream '{}'",
                    state.height, state.version, self.stream
                );
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    async fn save_tip(&self, tip: &ChainTipState) -> Result<(), StoreError> {
        let row = NewTipRow::from_state(&self.stream, tip)?;

        // The first version inserts; later versions update only from the preceding one
        let query = if row.version == 1 {
            sqlx::query(
                r#"
                INSERT INTO chain_tips (stream, height, hash, history_json, version, updated_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
                ON CONFLICT (stream) DO NOTHING
                "#,
            )
        } else {
            sqlx::query(
                r#"
                UPDATE chain_tips SET
                    height = $2,
                    hash = $3,
                    history_json = $4,
                    version = $5,
                    updated_at = NOW()
                WHERE stream = $1 AND version = $5 - 1
                "#,
            )
        };

        let result = query
            .bind(&row.stream)
            .bind(row.height)
            .bind(&row.hash)
            .bind(&row.history_json)
            .bind(row.version)
            .execute(&self.pool)
            .await
            .context("Failed to save chain tip")?;

        if result.rows_affected() == 0 {
            let found = self.stored_version().await?;
            warn!(
                "Tip version conflict for stream '{}': saving version {}, stored {:?}",
                self.stream, tip.version, found
            );
            return Err(StoreError::Conflict {
                expected: tip.version.saturating_sub(1),
                found,
            });
        }

        debug!(
            "Saved tip #{} (version {}) for stream '{}'",
            tip.height, tip.version, self.stream
        );
        Ok(())
    }
}
