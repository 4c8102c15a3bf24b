//! Construction of a [`WebhookService`] from parts or from configuration

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::backfill::{ChainQuery, HttpChainQuery};
use super::dispatcher::{
    ChainEventHandler, DispatchPolicy, Dispatcher, HandlerInterest, HandlerRegistration,
    HandlerRegistry, KindFilter,
};
use super::error::{PipelineError, RegistryError};
use super::handlers::{EventStoreHandler, LogOnlyHandler};
use super::models::{BlockIdentifier, EventKind, Hash32, TransactionKind};
use super::service::{ServicePolicy, WebhookService};
use super::store::{InMemoryTipStore, TipStore};
use super::tracker::{ChainTipState, TipTracker};
use crate::config::models::{BackfillConfig, DispatchConfig, HandlerConfig, HandlerType, IngestConfig};
use crate::constants;
use crate::database::{ChainEventRepository, DatabasePool, PgTipStore};
use crate::error::IngestError;

/// Builder for [`WebhookService`]
pub struct WebhookServiceBuilder {
    stream: String,
    registry: HandlerRegistry,
    dispatch_policy: DispatchPolicy,
    service_policy: ServicePolicy,
    history_depth: usize,
    bootstrap: Option<BlockIdentifier>,
    tip_store: Option<Arc<dyn TipStore>>,
    chain_query: Option<Arc<dyn ChainQuery>>,
}

impl WebhookServiceBuilder {
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            registry: HandlerRegistry::new(),
            dispatch_policy: DispatchPolicy::default(),
            service_policy: ServicePolicy::default(),
            history_depth: constants::tracker::HISTORY_DEPTH,
            bootstrap: None,
            tip_store: None,
            chain_query: None,
        }
    }

    /// Defaults to an in-memory store
    pub fn with_tip_store(mut self, store: Arc<dyn TipStore>) -> Self {
        self.tip_store = Some(store);
        self
    }

    pub fn with_chain_query(mut self, query: Arc<dyn ChainQuery>) -> Self {
        self.chain_query = Some(query);
        self
    }

    pub fn register_handler(
        mut self,
        registration: HandlerRegistration,
        handler: Arc<dyn ChainEventHandler>,
    ) -> Result<Self, RegistryError> {
        self.registry.register(registration, handler)?;
        Ok(self)
    }

    pub fn with_dispatch_policy(mut self, policy: DispatchPolicy) -> Self {
        self.dispatch_policy = policy;
        self
    }

    pub fn with_service_policy(mut self, policy: ServicePolicy) -> Self {
        self.service_policy = policy;
        self
    }

    pub fn with_history_depth(mut self, depth: usize) -> Self {
        self.history_depth = depth.max(1);
        self
    }

    /// Anchor used when the store holds no tip yet
    pub fn with_bootstrap(mut self, anchor: BlockIdentifier) -> Self {
        self.bootstrap = Some(anchor);
        self
    }

    /// Load the stored tip (or bootstrap) and assemble the service
    pub async fn build(self) -> Result<WebhookService, PipelineError> {
        let store = self
            .tip_store
            .unwrap_or_else(|| Arc::new(InMemoryTipStore::new()));

        let tip = match store.load_tip().await.map_err(PipelineError::Store)? {
            Some(tip) => {
                info!(
                    "Resuming stream '{}' at tip #{} (version {})",
                    self.stream, tip.height, tip.version
                );
                tip
            }
            None => match self.bootstrap {
                Some(anchor) => {
                    info!("Bootstrapping stream '{}' at {}", self.stream, anchor);
                    ChainTipState::anchored(anchor)
                }
                None => {
                    info!(
                        "No stored tip for stream '{}', the first apply payload will anchor it",
                        self.stream
                    );
                    ChainTipState::unanchored()
                }
            },
        };

        if self.registry.is_empty() {
            warn!("No handlers registered for stream '{}'", self.stream);
        } else {
            info!(
                "Dispatching to handlers in order: {}",
                self.registry.names().join(", ")
            );
        }

        Ok(WebhookService::new(
            self.stream,
            TipTracker::new(tip, self.history_depth),
            Dispatcher::new(self.registry, self.dispatch_policy),
            store,
            self.chain_query,
            self.service_policy,
        ))
    }

    /// Assemble a service from configuration.
    ///
    /// With a pool the tip is persisted in Postgres and `store_db` handlers
    /// are available; without one the tip lives in memory.
    pub async fn from_config(
        config: &IngestConfig,
        pool: Option<DatabasePool>,
    ) -> Result<WebhookService, IngestError> {
        let mut builder = Self::new(config.stream.clone())
            .with_dispatch_policy(dispatch_policy(&config.dispatch))
            .with_service_policy(service_policy(&config.backfill, &config.dispatch))
            .with_history_depth(config.tracker.history_depth);

        if let Some(bootstrap) = &config.bootstrap {
            let hash: Hash32 = bootstrap.hash.parse().map_err(|e: String| {
                IngestError::Other(anyhow::anyhow!(
                    "Invalid bootstrap hash '{}': {}",
                    bootstrap.hash,
                    e
                ))
            })?;
            builder = builder.with_bootstrap(BlockIdentifier::new(bootstrap.index, hash));
        }

        match &pool {
            Some(pool) => {
                builder = builder.with_tip_store(Arc::new(PgTipStore::new(
                    pool.clone(),
                    config.stream.clone(),
                )));
            }
            None => warn!("Database disabled, the chain tip will not survive a restart"),
        }

        if let Some(chain_query) = &config.chain_query {
            builder = builder.with_chain_query(Arc::new(HttpChainQuery::new(chain_query)?));
        }

        for handler_config in &config.handlers {
            let handler: Arc<dyn ChainEventHandler> = match handler_config.handler_type {
                HandlerType::LogOnly => Arc::new(LogOnlyHandler::new(&handler_config.name)),
                HandlerType::StoreDb => {
                    let pool = pool.clone().ok_or_else(|| {
                        anyhow::anyhow!(
                            "Handler '{}' requires a database connection",
                            handler_config.name
                        )
                    })?;
                    Arc::new(EventStoreHandler::new(ChainEventRepository::new(pool)))
                }
            };
            builder = registration(handler_config)
                .and_then(|registration| builder.register_handler(registration, handler))
                .map_err(PipelineError::from)?;
        }

        Ok(builder.build().await?)
    }
}

pub fn dispatch_policy(config: &DispatchConfig) -> DispatchPolicy {
    DispatchPolicy {
        handler_timeout: Duration::from_millis(config.handler_timeout_ms),
        max_attempts: config.max_attempts,
        initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        max_backoff: Duration::from_millis(config.max_backoff_ms),
        concurrent: config.concurrent_handlers,
        halt_on_exhausted_transient: config.halt_on_exhausted_transient,
    }
}

pub fn service_policy(backfill: &BackfillConfig, dispatch: &DispatchConfig) -> ServicePolicy {
    ServicePolicy {
        backfill_enabled: backfill.enabled,
        backfill_max_attempts: backfill.max_attempts,
        fetch_timeout: Duration::from_millis(backfill.fetch_timeout_ms),
        backfill_initial_backoff: Duration::from_millis(backfill.initial_backoff_ms),
        backfill_max_backoff: Duration::from_millis(backfill.max_backoff_ms),
        max_parked: backfill.max_parked_payloads,
        alert_after_exhausted: backfill.alert_after_exhausted,
        replay_duplicates: dispatch.replay_duplicates,
    }
}

/// Registration for a configured handler; empty kind lists match everything
pub fn registration(config: &HandlerConfig) -> Result<HandlerRegistration, RegistryError> {
    let invalid = |reason: String| RegistryError::InvalidInterest {
        handler: config.name.clone(),
        reason,
    };

    let events = if config.events.is_empty() {
        KindFilter::Any
    } else {
        KindFilter::only(
            config
                .events
                .iter()
                .map(|kind| kind.parse::<EventKind>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(invalid)?,
        )
    };
    let transactions = if config.transactions.is_empty() {
        KindFilter::Any
    } else {
        KindFilter::only(
            config
                .transactions
                .iter()
                .map(|kind| kind.parse::<TransactionKind>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(invalid)?,
        )
    };

    Ok(HandlerRegistration::new(config.name.clone())
        .with_priority(config.priority)
        .with_interest(HandlerInterest {
            events,
            transactions,
            include_failed: config.include_failed,
        }))
}
