#[cfg(test)]
mod tests {
    use crate::chainhook::dispatcher::{ChainEventHandler, DispatchMode, TxContext};
    use crate::chainhook::handlers::EventStoreHandler;
    use crate::chainhook::tracker::ChainTipState;
    use crate::database::models::{NewChainEvent, NewTipRow, TipRow};
    use crate::database::{establish_connection, run_migrations, ChainEventRepository};
    use crate::test_utils::{anchored_tip, block, hash_for, tx_id_for};
    use chrono::Utc;

    fn stored_row(new: NewTipRow) -> TipRow {
        TipRow {
            stream: new.stream,
            height: new.height,
            hash: new.hash,
            history_json: new.history_json,
            version: new.version,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_tip_row_round_trip() {
        let mut tip = anchored_tip(100, 0, 4);
        tip.version = 7;

        let row = NewTipRow::from_state("stacks-mainnet", &tip).unwrap();
        assert_eq!(row.stream, "stacks-mainnet");
        assert_eq!(row.height, 100);
        assert_eq!(row.hash.as_deref(), Some(hash_for(100, 0).to_string().as_str()));

        let restored = stored_row(row).into_state().unwrap();
        assert_eq!(restored, tip);
    }

    #[test]
    fn test_unanchored_tip_row() {
        let row = NewTipRow::from_state("devnet", &ChainTipState::unanchored()).unwrap();
        assert!(row.hash.is_none());
        assert_eq!(row.history_json, "{}");

        let restored = stored_row(row).into_state().unwrap();
        assert!(!restored.is_anchored());
    }

    #[test]
    fn test_corrupt_tip_row_is_rejected() {
        let mut row = stored_row(NewTipRow::from_state("devnet", &anchored_tip(5, 0, 2)).unwrap());
        row.hash = Some("0xnothex".to_string());
        assert!(row.into_state().is_err());

        let mut row = stored_row(NewTipRow::from_state("devnet", &anchored_tip(5, 0, 2)).unwrap());
        row.history_json = "[1, 2]".to_string();
        let err = row.into_state().unwrap_err();
        assert!(err.to_string().contains("Failed to decode stored tip history"));
    }

    #[test]
    fn test_new_chain_event_creation() {
        let event = NewChainEvent {
            tx_id: tx_id_for(101, 0, 0).to_string(),
            event_index: 1,
            block_height: 101,
            block_hash: hash_for(101, 0).to_string(),
            event_kind: "ft_transfer".to_string(),
            payload: r#"{"type":"transfer"}"#.to_string(),
        };

        assert_eq!(event.event_index, 1);
        assert_eq!(event.tx_id.len(), 66);
        assert_eq!(event.event_kind, "ft_transfer");
    }

    #[tokio::test]
    async fn test_establish_connection_no_database_url() {
        if std::env::var("DATABASE_URL").is_ok() {
            return;
        }

        let err = establish_connection(2).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("DATABASE_URL environment variable not set"));
    }

    #[tokio::test]
    #[ignore] // Requires a PostgreSQL database (DATABASE_URL)
    async fn test_event_rows_follow_fork_replacement() {
        let pool = establish_connection(2).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let repository = ChainEventRepository::new(pool);

        // random height keeps reruns against the same database independent
        let height = 1_000_000 + rand::random::<u32>() as i64;
        let event = |fork: u8| NewChainEvent {
            tx_id: tx_id_for(height as u64, 0, 0).to_string(),
            event_index: 0,
            block_height: height,
            block_hash: hash_for(height as u64, fork).to_string(),
            event_kind: "ft_transfer".to_string(),
            payload: format!(r#"{{"fork":{fork}}}"#),
        };

        assert!(repository.insert(&event(0)).await.unwrap());
        assert!(!repository.insert(&event(0)).await.unwrap());

        // the same transaction mined on another fork replaces the stale row
        assert!(repository.insert(&event(1)).await.unwrap());
        let stored = repository
            .get(&event(1).tx_id, 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.block_hash, hash_for(height as u64, 1).to_string());
        assert_eq!(repository.count_at_height(height).await.unwrap(), 1);

        assert!(repository.delete(&event(1).tx_id, 0, height).await.unwrap());
        assert!(repository.get(&event(1).tx_id, 0).await.unwrap().is_none());
        assert_eq!(repository.count_at_height(height).await.unwrap(), 0);
    }

    #[tokio::test]
    #[ignore] // Requires a PostgreSQL database (DATABASE_URL)
    async fn test_store_handler_compensates_under_fork_hash() {
        let pool = establish_connection(2).await.unwrap();
        run_migrations(&pool).await.unwrap();
        let handler = EventStoreHandler::new(ChainEventRepository::new(pool.clone()));
        let repository = ChainEventRepository::new(pool);

        let height = 1_000_000 + rand::random::<u32>() as u64;
        let applied = block(height, 0);
        let tx = &applied.transactions()[0];
        let ctx = TxContext::new(&applied, tx, DispatchMode::Apply);
        for event in &tx.receipt.events {
            handler.apply(event, &ctx).await.unwrap();
        }
        assert_eq!(repository.count_at_height(height as i64).await.unwrap(), 2);

        // the rollback names the block by a diverging hash
        let mut ctx = TxContext::new(&applied, tx, DispatchMode::Compensate);
        ctx.block.hash = hash_for(height, 1);
        for event in tx.receipt.events.iter().rev() {
            handler.compensate(event, &ctx).await.unwrap();
        }
        assert_eq!(repository.count_at_height(height as i64).await.unwrap(), 0);
    }
}
