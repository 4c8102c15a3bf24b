//! Handler registry and ordered event dispatch

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::error::{FailureKind, HandlerError, HandlerFailure, RegistryError};
use super::metrics::PipelineMetrics;
use super::models::{
    Block, BlockIdentifier, ChainPayload, EventKind, Hash32, PayloadKind, ReceiptEvent,
    ReceiptStatus, Transaction, TransactionKind,
};

/// Whether handlers apply events or compensate for them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    Apply,
    Compensate,
}

impl DispatchMode {
    pub fn for_payload(kind: PayloadKind) -> Self {
        match kind {
            PayloadKind::Apply => Self::Apply,
            PayloadKind::Rollback => Self::Compensate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Compensate => "compensate",
        }
    }
}

/// Block and transaction context handed to handlers with each event
#[derive(Debug, Clone)]
pub struct TxContext {
    pub block: BlockIdentifier,
    pub parent: BlockIdentifier,
    pub timestamp: DateTime<Utc>,
    pub tx_id: Hash32,
    pub tx_index: u32,
    pub tx_kind: TransactionKind,
    pub receipt_status: ReceiptStatus,
    pub sender: Option<String>,
    pub mode: DispatchMode,
}

impl TxContext {
    pub fn new(block: &Block, tx: &Transaction, mode: DispatchMode) -> Self {
        Self {
            block: block.identifier(),
            parent: block.parent(),
            timestamp: block.timestamp(),
            tx_id: tx.id,
            tx_index: tx.index,
            tx_kind: tx.kind.clone(),
            receipt_status: tx.receipt.status,
            sender: tx.sender.clone(),
            mode,
        }
    }
}

/// Downstream consumer of parsed chain events.
///
/// `apply` must be idempotent: the same event may be delivered more than once
/// (duplicate replay, retries after a timeout). `compensate` undoes what
/// `apply` did for an event whose block was rolled back.
#[async_trait]
pub trait ChainEventHandler: Send + Sync {
    async fn apply(&self, event: &ReceiptEvent, ctx: &TxContext) -> Result<(), HandlerError>;

    async fn compensate(&self, event: &ReceiptEvent, ctx: &TxContext) -> Result<(), HandlerError>;
}

/// Filter over event or transaction kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindFilter<K: Eq + Hash> {
    Any,
    Only(HashSet<K>),
}

impl<K: Eq + Hash> KindFilter<K> {
    pub fn only(kinds: impl IntoIterator<Item = K>) -> Self {
        Self::Only(kinds.into_iter().collect())
    }

    pub fn matches(&self, kind: &K) -> bool {
        match self {
            Self::Any => true,
            Self::Only(kinds) => kinds.contains(kind),
        }
    }
}

impl<K: Eq + Hash> Default for KindFilter<K> {
    fn default() -> Self {
        Self::Any
    }
}

/// Which events a handler wants to see
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerInterest {
    pub events: KindFilter<EventKind>,
    pub transactions: KindFilter<TransactionKind>,
    /// Deliver events of transactions whose receipt failed
    pub include_failed: bool,
}

impl HandlerInterest {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn events(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            events: KindFilter::only(kinds),
            ..Self::default()
        }
    }

    pub fn matches(&self, event: &ReceiptEvent, ctx: &TxContext) -> bool {
        if ctx.receipt_status == ReceiptStatus::Failure && !self.include_failed {
            return false;
        }
        self.events.matches(&event.kind) && self.transactions.matches(&ctx.tx_kind)
    }

    fn validate(&self) -> Result<(), String> {
        if matches!(&self.events, KindFilter::Only(kinds) if kinds.is_empty()) {
            return Err("event filter is empty and would match nothing".to_string());
        }
        if matches!(&self.transactions, KindFilter::Only(kinds) if kinds.is_empty()) {
            return Err("transaction filter is empty and would match nothing".to_string());
        }
        Ok(())
    }
}

/// Registration metadata for a handler
#[derive(Debug, Clone)]
pub struct HandlerRegistration {
    pub name: String,
    /// Lower runs first
    pub priority: i32,
    pub interest: HandlerInterest,
}

impl HandlerRegistration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            interest: HandlerInterest::all(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_interest(mut self, interest: HandlerInterest) -> Self {
        self.interest = interest;
        self
    }
}

struct RegisteredHandler {
    registration: HandlerRegistration,
    handler: Arc<dyn ChainEventHandler>,
    sequence: usize,
}

/// Handlers in dispatch order: priority ascending, then registration order
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<RegisteredHandler>,
    next_sequence: usize,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Names must be unique.
    pub fn register(
        &mut self,
        registration: HandlerRegistration,
        handler: Arc<dyn ChainEventHandler>,
    ) -> Result<(), RegistryError> {
        if registration.name.trim().is_empty() {
            return Err(RegistryError::InvalidInterest {
                handler: registration.name,
                reason: "handler name must not be empty".to_string(),
            });
        }
        if self
            .handlers
            .iter()
            .any(|h| h.registration.name == registration.name)
        {
            return Err(RegistryError::DuplicateHandler(registration.name));
        }
        registration
            .interest
            .validate()
            .map_err(|reason| RegistryError::InvalidInterest {
                handler: registration.name.clone(),
                reason,
            })?;

        debug!(
            "Registered handler '{}' with priority {}",
            registration.name, registration.priority
        );
        self.handlers.push(RegisteredHandler {
            registration,
            handler,
            sequence: self.next_sequence,
        });
        self.next_sequence += 1;
        self.handlers
            .sort_by_key(|h| (h.registration.priority, h.sequence));
        Ok(())
    }

    /// Handler names in dispatch order
    pub fn names(&self) -> Vec<&str> {
        self.handlers
            .iter()
            .map(|h| h.registration.name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Timeouts and retry bounds for handler calls
#[derive(Debug, Clone)]
pub struct DispatchPolicy {
    pub handler_timeout: Duration,
    /// Total attempts per (handler, event), including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Run handlers concurrently, each over the full ordered event stream
    pub concurrent: bool,
    /// Treat exhausted transient failures as fatal: the tip does not advance
    pub halt_on_exhausted_transient: bool,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_millis(crate::constants::dispatch::HANDLER_TIMEOUT_MS),
            max_attempts: crate::constants::dispatch::MAX_ATTEMPTS,
            initial_backoff: Duration::from_millis(crate::constants::dispatch::INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(crate::constants::dispatch::MAX_BACKOFF_MS),
            concurrent: false,
            halt_on_exhausted_transient: false,
        }
    }
}

impl DispatchPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: self.max_backoff,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Per-handler outcome of one dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HandlerStatus {
    Succeeded { events: usize },
    /// No event matched the handler's interest
    Skipped,
    Failed { failed: usize, succeeded: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerReport {
    pub handler: String,
    #[serde(flatten)]
    pub status: HandlerStatus,
}

/// Summary of dispatching one payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub mode: DispatchMode,
    pub from_height: u64,
    pub to_height: u64,
    /// One report per registered handler, in registry order
    pub reports: Vec<HandlerReport>,
    pub failures: Vec<HandlerFailure>,
}

impl DispatchResult {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn exhausted_transients(&self) -> usize {
        self.failures
            .iter()
            .filter(|f| f.kind == FailureKind::Transient)
            .count()
    }

    /// Fatal failures keep the tip from advancing
    pub fn is_fatal(&self, policy: &DispatchPolicy) -> bool {
        policy.halt_on_exhausted_transient && self.exhausted_transients() > 0
    }

    pub fn report(&self, handler: &str) -> Option<&HandlerReport> {
        self.reports.iter().find(|r| r.handler == handler)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    succeeded: usize,
    failed: usize,
}

impl Tally {
    fn status(self) -> HandlerStatus {
        match (self.succeeded, self.failed) {
            (0, 0) => HandlerStatus::Skipped,
            (succeeded, 0) => HandlerStatus::Succeeded { events: succeeded },
            (succeeded, failed) => HandlerStatus::Failed { failed, succeeded },
        }
    }
}

/// Delivers payload events to registered handlers
pub struct Dispatcher {
    registry: HandlerRegistry,
    policy: DispatchPolicy,
    metrics: PipelineMetrics,
}

impl Dispatcher {
    pub fn new(registry: HandlerRegistry, policy: DispatchPolicy) -> Self {
        Self {
            registry,
            policy,
            metrics: PipelineMetrics::global(),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Dispatch every event of `payload`.
    ///
    /// Apply walks blocks ascending, transactions in sequence and events in
    /// emission order; compensation walks the same stream backwards. Handler
    /// failures are recorded, never propagated.
    pub async fn dispatch(&self, payload: &ChainPayload) -> DispatchResult {
        let mode = DispatchMode::for_payload(payload.kind());
        let start_time = Instant::now();

        let (tallies, failures) = if self.policy.concurrent {
            self.dispatch_concurrent(payload, mode).await
        } else {
            self.dispatch_sequential(payload, mode).await
        };

        let reports: Vec<HandlerReport> = self
            .registry
            .handlers
            .iter()
            .zip(tallies)
            .map(|(entry, tally)| HandlerReport {
                handler: entry.registration.name.clone(),
                status: tally.status(),
            })
            .collect();

        let duration = start_time.elapsed();
        self.metrics
            .record_dispatch_duration(mode.as_str(), duration.as_secs_f64());

        info!(
            "Dispatched {} events of blocks {}..={} ({}) to {} handlers in {:?} with {} failures",
            payload.event_count(),
            payload.first_height(),
            payload.last_height(),
            mode.as_str(),
            reports.len(),
            duration,
            failures.len()
        );

        DispatchResult {
            mode,
            from_height: payload.first_height(),
            to_height: payload.last_height(),
            reports,
            failures,
        }
    }

    async fn dispatch_sequential(
        &self,
        payload: &ChainPayload,
        mode: DispatchMode,
    ) -> (Vec<Tally>, Vec<HandlerFailure>) {
        let mut tallies = vec![Tally::default(); self.registry.len()];
        let mut failures = Vec::new();

        for (ctx, event) in delivery_order(payload, mode) {
            for (i, entry) in self.registry.handlers.iter().enumerate() {
                if !entry.registration.interest.matches(event, &ctx) {
                    continue;
                }
                match self.invoke(entry, event, &ctx).await {
                    Ok(()) => tallies[i].succeeded += 1,
                    Err(failure) => {
                        tallies[i].failed += 1;
                        failures.push(failure);
                    }
                }
            }
        }

        (tallies, failures)
    }

    async fn dispatch_concurrent(
        &self,
        payload: &ChainPayload,
        mode: DispatchMode,
    ) -> (Vec<Tally>, Vec<HandlerFailure>) {
        let outcomes = join_all(
            self.registry
                .handlers
                .iter()
                .map(|entry| self.run_handler(entry, payload, mode)),
        )
        .await;

        let mut tallies = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for (tally, handler_failures) in outcomes {
            tallies.push(tally);
            failures.extend(handler_failures);
        }
        (tallies, failures)
    }

    /// Feed the full ordered event stream to a single handler
    async fn run_handler(
        &self,
        entry: &RegisteredHandler,
        payload: &ChainPayload,
        mode: DispatchMode,
    ) -> (Tally, Vec<HandlerFailure>) {
        let mut tally = Tally::default();
        let mut failures = Vec::new();

        for (ctx, event) in delivery_order(payload, mode) {
            if !entry.registration.interest.matches(event, &ctx) {
                continue;
            }
            match self.invoke(entry, event, &ctx).await {
                Ok(()) => tally.succeeded += 1,
                Err(failure) => {
                    tally.failed += 1;
                    failures.push(failure);
                }
            }
        }

        (tally, failures)
    }

    /// Call a handler for one event with timeout and bounded retries
    async fn invoke(
        &self,
        entry: &RegisteredHandler,
        event: &ReceiptEvent,
        ctx: &TxContext,
    ) -> Result<(), HandlerFailure> {
        let name = entry.registration.name.as_str();
        let mode = ctx.mode.as_str();
        let mut backoff = self.policy.backoff();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let call = async {
                match ctx.mode {
                    DispatchMode::Apply => entry.handler.apply(event, ctx).await,
                    DispatchMode::Compensate => entry.handler.compensate(event, ctx).await,
                }
            };

            let (result, timed_out) =
                match tokio::time::timeout(self.policy.handler_timeout, call).await {
                    Ok(result) => (result, false),
                    Err(_) => (
                        Err(HandlerError::transient(format!(
                            "timed out after {:?}",
                            self.policy.handler_timeout
                        ))),
                        true,
                    ),
                };

            let err = match result {
                Ok(()) => {
                    self.metrics.record_handler_invocation(name, mode, true);
                    if attempts > 1 {
                        debug!(
                            "Handler '{}' succeeded on event {} of tx {} after {} attempts",
                            name, event.index, ctx.tx_id, attempts
                        );
                    }
                    return Ok(());
                }
                Err(err) => err,
            };
            self.metrics.record_handler_invocation(name, mode, false);

            if err.is_transient() && attempts < max_attempts {
                let delay = backoff.next_backoff().unwrap_or(self.policy.max_backoff);
                warn!(
                    "Handler '{}' failed on event {} of tx {} at height {} (attempt {}/{}): {}. Retrying in {:?}...",
                    name, event.index, ctx.tx_id, ctx.block.index, attempts, max_attempts, err, delay
                );
                self.metrics
                    .record_handler_retry(name, if timed_out { "timeout" } else { "transient" });
                tokio::time::sleep(delay).await;
                continue;
            }

            let (kind, reason) = match err {
                HandlerError::Transient(reason) => (FailureKind::Transient, reason),
                HandlerError::Permanent(reason) => (FailureKind::Permanent, reason),
            };
            let failure = HandlerFailure {
                handler: name.to_string(),
                block_height: ctx.block.index,
                tx_id: ctx.tx_id.to_string(),
                event_index: event.index,
                kind,
                reason,
                attempts,
            };
            error!("{}", failure);
            return Err(failure);
        }
    }
}

/// Events in the order handlers see them: compensation undoes the payload
/// newest event first
fn delivery_order(payload: &ChainPayload, mode: DispatchMode) -> Vec<(TxContext, &ReceiptEvent)> {
    let mut events = Vec::with_capacity(payload.event_count());
    for block in payload.blocks() {
        for tx in block.transactions() {
            let ctx = TxContext::new(block, tx, mode);
            for event in &tx.receipt.events {
                events.push((ctx.clone(), event));
            }
        }
    }
    if mode == DispatchMode::Compensate {
        events.reverse();
    }
    events
}
