//! Webhook service: the single entry point of the ingestion pipeline
//!
//! Every payload runs validate → dispatch → commit while holding the writer
//! lock, so tip updates are serialized in lock acquisition order. Gap
//! backfills release the lock while fetching and are cancelled when a
//! concurrent delivery moves the tip past the gap.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use super::backfill::ChainQuery;
use super::dispatcher::{DispatchResult, Dispatcher};
use super::error::{BackfillError, MalformedPayload, PipelineError, Result, StoreError};
use super::metrics::PipelineMetricsContext;
use super::models::{Block, ChainPayload, Hash32, PayloadKind};
use super::parser::PayloadParser;
use super::store::TipStore;
use super::tracker::{ChainTipState, Decision, TipTracker};
use crate::constants;

/// Service-level policy for gaps, parking and duplicates
#[derive(Debug, Clone)]
pub struct ServicePolicy {
    pub backfill_enabled: bool,
    /// Fetch attempts before a gap is reported as exhausted
    pub backfill_max_attempts: u32,
    pub fetch_timeout: Duration,
    pub backfill_initial_backoff: Duration,
    pub backfill_max_backoff: Duration,
    /// Payloads kept while their gap is unresolved
    pub max_parked: usize,
    /// Consecutive exhausted backfills before an operational alert
    pub alert_after_exhausted: u32,
    /// Re-dispatch duplicate apply payloads without touching the tip
    pub replay_duplicates: bool,
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            backfill_enabled: true,
            backfill_max_attempts: constants::backfill::MAX_ATTEMPTS,
            fetch_timeout: Duration::from_millis(constants::backfill::FETCH_TIMEOUT_MS),
            backfill_initial_backoff: Duration::from_millis(constants::backfill::INITIAL_BACKOFF_MS),
            backfill_max_backoff: Duration::from_millis(constants::backfill::MAX_BACKOFF_MS),
            max_parked: constants::backfill::MAX_PARKED_PAYLOADS,
            alert_after_exhausted: constants::backfill::ALERT_AFTER_EXHAUSTED,
            replay_duplicates: false,
        }
    }
}

impl ServicePolicy {
    fn backfill_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.backfill_initial_backoff,
            initial_interval: self.backfill_initial_backoff,
            randomization_factor: 0.1,
            multiplier: 2.0,
            max_interval: self.backfill_max_backoff,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Acknowledgement status returned to the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Accepted,
    DuplicateIgnored,
    RejectedMalformed,
    RejectedInvalidTip,
    AcceptedWithHandlerErrors,
}

impl AckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::DuplicateIgnored => "duplicate_ignored",
            Self::RejectedMalformed => "rejected_malformed",
            Self::RejectedInvalidTip => "rejected_invalid_tip",
            Self::AcceptedWithHandlerErrors => "accepted_with_handler_errors",
        }
    }

    /// Status code for an HTTP transport
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Accepted | Self::DuplicateIgnored => 200,
            Self::AcceptedWithHandlerErrors => 202,
            Self::RejectedMalformed => 400,
            Self::RejectedInvalidTip => 409,
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::RejectedMalformed | Self::RejectedInvalidTip)
    }
}

/// Result of handling one webhook body
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub status: AckStatus,
    pub tip_height: u64,
    pub tip_hash: Option<Hash32>,
    pub tip_version: u64,
    pub dispatch: Vec<DispatchResult>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Received,
    Parsed,
    TipValidated,
    Dispatching,
    Committed,
    Rejected,
    RejectedMalformed,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Parsed => "parsed",
            Self::TipValidated => "tip_validated",
            Self::Dispatching => "dispatching",
            Self::Committed => "committed",
            Self::Rejected => "rejected",
            Self::RejectedMalformed => "rejected_malformed",
        }
    }
}

/// Outcome of processing one payload. Dispatch results are collected
/// separately so parked and backfilled payloads reach the same ack.
#[derive(Debug)]
enum Outcome {
    Committed,
    Duplicate,
    Rejected(String),
}

enum Step {
    Done(Outcome),
    Gap(RangeInclusive<u64>),
}

enum FetchOutcome {
    Fetched(Vec<Block>),
    /// The tip moved past the gap while fetching
    Superseded,
    Failed(BackfillError),
}

/// State guarded by the single-writer lock
struct WriterState {
    tracker: TipTracker,
    /// Payloads whose gap could not be closed, keyed by first height
    parked: BTreeMap<u64, ChainPayload>,
    /// Committed blocks within the history window, kept for compensation
    retained: BTreeMap<u64, Block>,
}

impl WriterState {
    /// Retained blocks `from..=to` as a rollback payload
    fn retained_rollback(&self, from: u64, to: u64) -> std::result::Result<ChainPayload, String> {
        let blocks: Vec<Block> = self.retained.range(from..=to).map(|(_, b)| b.clone()).collect();
        if blocks.len() as u64 != to - from + 1 {
            return Err(format!(
                "blocks {from}..={to} above the rollback are not retained for compensation"
            ));
        }
        ChainPayload::new(PayloadKind::Rollback, blocks, None).map_err(|e| e.to_string())
    }

    /// Track the blocks of a committed payload, dropping what left the history window
    fn record_commit(&mut self, payload: &ChainPayload) {
        if payload.kind() == PayloadKind::Apply {
            for block in payload.blocks() {
                self.retained.insert(block.height(), block.clone());
            }
        }
        let tip = self.tracker.current_tip();
        self.retained
            .retain(|height, block| tip.recorded_hash(*height) == Some(block.hash()));
    }
}

/// Store failures and fatal dispatches while filling a gap count as failed attempts
fn is_retryable(err: &PipelineError) -> bool {
    matches!(err, PipelineError::Store(_) | PipelineError::DispatchFatal { .. })
}

/// Orchestrates parsing, tip validation, dispatch and commit
pub struct WebhookService {
    stream: String,
    writer: Mutex<WriterState>,
    tip_tx: watch::Sender<ChainTipState>,
    dispatcher: Dispatcher,
    store: Arc<dyn TipStore>,
    chain_query: Option<Arc<dyn ChainQuery>>,
    policy: ServicePolicy,
    halted: AtomicBool,
    consecutive_exhausted: AtomicU32,
    metrics: PipelineMetricsContext,
}

impl WebhookService {
    pub fn new(
        stream: impl Into<String>,
        tracker: TipTracker,
        dispatcher: Dispatcher,
        store: Arc<dyn TipStore>,
        chain_query: Option<Arc<dyn ChainQuery>>,
        policy: ServicePolicy,
    ) -> Self {
        let stream = stream.into();
        let tip = tracker.current_tip();
        let metrics = PipelineMetricsContext::new(stream.clone());
        metrics.tip_height(tip.height);
        let (tip_tx, _) = watch::channel(tip);

        Self {
            stream,
            writer: Mutex::new(WriterState {
                tracker,
                parked: BTreeMap::new(),
                retained: BTreeMap::new(),
            }),
            tip_tx,
            dispatcher,
            store,
            chain_query,
            policy,
            halted: AtomicBool::new(false),
            consecutive_exhausted: AtomicU32::new(0),
            metrics,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Snapshot of the committed tip
    pub fn current_tip(&self) -> ChainTipState {
        self.tip_tx.borrow().clone()
    }

    /// Receive every committed tip
    pub fn subscribe(&self) -> watch::Receiver<ChainTipState> {
        self.tip_tx.subscribe()
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn parked_count(&self) -> usize {
        self.writer.lock().await.parked.len()
    }

    /// Handle a raw webhook body
    pub async fn handle(&self, body: &[u8]) -> Result<WebhookAck> {
        if self.is_halted() {
            return Err(PipelineError::Halted);
        }
        self.enter(Stage::Received);
        let value: Value = match serde_json::from_slice(body) {
            Ok(value) => value,
            Err(e) => {
                return Ok(self.reject_malformed(MalformedPayload::new(
                    "$",
                    format!("invalid JSON: {e}"),
                )))
            }
        };
        self.process_body(&value).await
    }

    /// Handle an already decoded webhook body
    pub async fn handle_value(&self, body: &Value) -> Result<WebhookAck> {
        self.enter(Stage::Received);
        self.process_body(body).await
    }

    async fn process_body(&self, body: &Value) -> Result<WebhookAck> {
        if self.is_halted() {
            return Err(PipelineError::Halted);
        }

        let delivery = match PayloadParser::parse_delivery(body) {
            Ok(delivery) => delivery,
            Err(e) => return Ok(self.reject_malformed(e)),
        };
        self.enter(Stage::Parsed);
        if delivery.is_reorg() {
            info!("Received reorg delivery for stream '{}'", self.stream);
        }

        let mut dispatch = Vec::new();
        let mut committed = false;
        for payload in delivery.into_payloads() {
            self.metrics.payload_received(payload.kind().as_str());
            debug!(
                "Processing {} payload {}..={} ({} events)",
                payload.kind(),
                payload.first_height(),
                payload.last_height(),
                payload.event_count()
            );

            match self.process(payload, &mut dispatch).await? {
                Outcome::Committed => committed = true,
                Outcome::Duplicate => {}
                Outcome::Rejected(reason) => {
                    return Ok(self.ack(AckStatus::RejectedInvalidTip, dispatch, Some(reason)));
                }
            }
        }

        let status = if !committed {
            AckStatus::DuplicateIgnored
        } else if dispatch.iter().any(DispatchResult::has_failures) {
            AckStatus::AcceptedWithHandlerErrors
        } else {
            AckStatus::Accepted
        };
        Ok(self.ack(status, dispatch, None))
    }

    async fn process(
        &self,
        payload: ChainPayload,
        dispatched: &mut Vec<DispatchResult>,
    ) -> Result<Outcome> {
        let missing = {
            let mut writer = self.writer.lock().await;
            match self.run_validated(&mut writer, &payload, dispatched).await? {
                Step::Done(outcome) => return Ok(outcome),
                Step::Gap(missing) => missing,
            }
        };
        self.close_gap(payload, missing, dispatched).await
    }

    /// Fetch the missing range, apply it, and re-validate `payload`.
    ///
    /// The payload is parked whenever it cannot be processed.
    async fn close_gap(
        &self,
        payload: ChainPayload,
        mut missing: RangeInclusive<u64>,
        dispatched: &mut Vec<DispatchResult>,
    ) -> Result<Outcome> {
        let query = match (&self.chain_query, self.policy.backfill_enabled) {
            (Some(query), true) => query.clone(),
            _ => {
                return Err(self
                    .backfill_exhausted(payload, missing, 0, BackfillError::NotConfigured.to_string())
                    .await)
            }
        };

        let mut backoff = self.policy.backfill_backoff();
        let max_attempts = self.policy.backfill_max_attempts.max(1);
        let mut attempts = 0;
        let mut filled = false;
        let mut last_error = String::new();

        while attempts < max_attempts {
            attempts += 1;
            info!(
                "Backfilling blocks {}..={} for stream '{}' (attempt {}/{})",
                missing.start(),
                missing.end(),
                self.stream,
                attempts,
                max_attempts
            );

            let fetched = self.fetch_missing(query.as_ref(), missing.clone()).await;

            let mut writer = self.writer.lock().await;
            let failure = match fetched {
                FetchOutcome::Superseded => {
                    debug!(
                        "Tip moved past blocks {}..={}, backfill cancelled",
                        missing.start(),
                        missing.end()
                    );
                    None
                }
                FetchOutcome::Failed(err) => Some(err.to_string()),
                FetchOutcome::Fetched(blocks) => {
                    match self.apply_backfill(&mut writer, blocks, dispatched).await {
                        Ok(Ok(committed)) => {
                            filled |= committed;
                            None
                        }
                        Ok(Err(reason)) => Some(reason),
                        Err(e) => {
                            self.park(&mut writer, payload);
                            return Err(e);
                        }
                    }
                }
            };

            match &failure {
                Some(reason) => {
                    self.metrics.backfill_attempt("failure");
                    warn!(
                        "Backfill of blocks {}..={} failed (attempt {}/{}): {}",
                        missing.start(),
                        missing.end(),
                        attempts,
                        max_attempts,
                        reason
                    );
                    last_error = reason.clone();
                }
                None => self.metrics.backfill_attempt("success"),
            }

            match self.run_validated(&mut writer, &payload, dispatched).await {
                Ok(Step::Done(outcome)) => {
                    self.consecutive_exhausted.store(0, Ordering::SeqCst);
                    return Ok(match outcome {
                        Outcome::Duplicate if filled => Outcome::Committed,
                        outcome => outcome,
                    });
                }
                Ok(Step::Gap(remaining)) => missing = remaining,
                Err(e) => {
                    warn!(
                        "Parking payload {}..={} after its gap closed: {}",
                        payload.first_height(),
                        payload.last_height(),
                        e
                    );
                    self.park(&mut writer, payload);
                    return Err(e);
                }
            }
            drop(writer);

            if failure.is_some() && attempts < max_attempts {
                let delay = backoff
                    .next_backoff()
                    .unwrap_or(self.policy.backfill_max_backoff);
                tokio::time::sleep(delay).await;
            }
        }

        Err(self
            .backfill_exhausted(payload, missing, attempts, last_error)
            .await)
    }

    /// Fetch with a timeout, giving up early once the tip covers the gap
    async fn fetch_missing(
        &self,
        query: &dyn ChainQuery,
        missing: RangeInclusive<u64>,
    ) -> FetchOutcome {
        let target = *missing.end();
        let covers_gap = move |tip: &ChainTipState| tip.is_anchored() && tip.height >= target;

        let mut tip_rx = self.tip_tx.subscribe();
        if covers_gap(&tip_rx.borrow()) {
            return FetchOutcome::Superseded;
        }

        let superseded = async {
            if tip_rx.wait_for(covers_gap).await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            result = tokio::time::timeout(self.policy.fetch_timeout, query.fetch_blocks(missing)) => {
                match result {
                    Ok(Ok(blocks)) => FetchOutcome::Fetched(blocks),
                    Ok(Err(err)) => FetchOutcome::Failed(err),
                    Err(_) => FetchOutcome::Failed(BackfillError::Timeout(self.policy.fetch_timeout)),
                }
            }
            _ = superseded => FetchOutcome::Superseded,
        }
    }

    /// Run fetched blocks through the pipeline.
    ///
    /// The inner result is whether the blocks were committed, or why the
    /// attempt failed; the outer error is one the service cannot retry.
    async fn apply_backfill(
        &self,
        writer: &mut WriterState,
        blocks: Vec<Block>,
        dispatched: &mut Vec<DispatchResult>,
    ) -> Result<std::result::Result<bool, String>> {
        let fill = match ChainPayload::new(PayloadKind::Apply, blocks, None) {
            Ok(fill) => fill,
            Err(e) => return Ok(Err(e.to_string())),
        };
        info!(
            "Applying backfilled blocks {}..={}",
            fill.first_height(),
            fill.last_height()
        );

        match self.run_validated(writer, &fill, dispatched).await {
            Ok(Step::Done(Outcome::Committed)) => Ok(Ok(true)),
            Ok(Step::Done(Outcome::Duplicate)) => Ok(Ok(false)),
            Ok(Step::Done(Outcome::Rejected(reason))) => {
                Ok(Err(format!("backfilled blocks rejected: {reason}")))
            }
            Ok(Step::Gap(gap)) => Ok(Err(format!(
                "backfilled blocks leave blocks {}..={} missing",
                gap.start(),
                gap.end()
            ))),
            Err(e) if is_retryable(&e) => Ok(Err(e.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Validate against the current tip and act on the decision. Gaps are
    /// returned to the caller; commits drain parked payloads that now connect.
    async fn run_validated(
        &self,
        writer: &mut WriterState,
        payload: &ChainPayload,
        dispatched: &mut Vec<DispatchResult>,
    ) -> Result<Step> {
        let decision = writer.tracker.check(payload);
        self.metrics
            .decision(payload.kind().as_str(), decision.label());
        self.enter(Stage::TipValidated);

        if let Decision::Gap { missing } = decision {
            info!(
                "Gap detected before block {}: blocks {}..={} are missing",
                payload.first_height(),
                missing.start(),
                missing.end()
            );
            return Ok(Step::Gap(missing));
        }

        let outcome = self
            .apply_decision(writer, payload, decision, dispatched)
            .await?;
        if matches!(outcome, Outcome::Committed) {
            self.drain_parked(writer, dispatched).await?;
        }
        Ok(Step::Done(outcome))
    }

    async fn apply_decision(
        &self,
        writer: &mut WriterState,
        payload: &ChainPayload,
        decision: Decision,
        dispatched: &mut Vec<DispatchResult>,
    ) -> Result<Outcome> {
        match decision {
            Decision::Invalid { reason } => Ok(self.reject(payload, reason)),
            Decision::Gap { missing } => Ok(Outcome::Rejected(format!(
                "blocks {}..={} are missing",
                missing.start(),
                missing.end()
            ))),
            Decision::Duplicate => {
                info!(
                    "Ignoring duplicate {} payload {}..={}",
                    payload.kind(),
                    payload.first_height(),
                    payload.last_height()
                );
                if self.policy.replay_duplicates && payload.kind() == PayloadKind::Apply {
                    self.enter(Stage::Dispatching);
                    dispatched.push(self.dispatcher.dispatch(payload).await);
                }
                Ok(Outcome::Duplicate)
            }
            Decision::Accept | Decision::ForkRollback { .. } => {
                if let Decision::ForkRollback { fork_height } = decision {
                    warn!(
                        "Fork detected at height {}: compensating blocks {}..={}",
                        fork_height,
                        payload.first_height(),
                        payload.last_height()
                    );
                }

                let tip = writer.tracker.current_tip();

                // blocks between the rollback and the tip are undone first
                let above = if payload.kind() == PayloadKind::Rollback
                    && payload.last_height() < tip.height
                {
                    match writer.retained_rollback(payload.last_height() + 1, tip.height) {
                        Ok(above) => Some(above),
                        Err(reason) => return Ok(self.reject(payload, reason)),
                    }
                } else {
                    None
                };

                let overlaps = payload.kind() == PayloadKind::Apply
                    && tip.is_anchored()
                    && payload.first_height() <= tip.height;
                let trimmed = if overlaps {
                    match payload.trim_through(tip.height) {
                        Some(trimmed) => Some(trimmed),
                        None => return Ok(Outcome::Duplicate),
                    }
                } else {
                    None
                };
                let effective = trimmed.as_ref().unwrap_or(payload);
                if overlaps {
                    debug!(
                        "Trimmed overlapping payload to blocks {}..={}",
                        effective.first_height(),
                        effective.last_height()
                    );
                }

                self.enter(Stage::Dispatching);
                let mut results = Vec::with_capacity(2);
                if let Some(above) = &above {
                    info!(
                        "Compensating blocks {}..={} above the rolled back range",
                        above.first_height(),
                        above.last_height()
                    );
                    results.push(self.dispatcher.dispatch(above).await);
                }
                results.push(self.dispatcher.dispatch(effective).await);

                let policy = self.dispatcher.policy();
                if results.iter().any(|r| r.is_fatal(policy)) {
                    self.enter(Stage::Rejected);
                    let exhausted: usize = results.iter().map(DispatchResult::exhausted_transients).sum();
                    let reason = format!("{exhausted} handler failures exhausted their retries");
                    let from_height = effective.first_height();
                    let to_height = above
                        .as_ref()
                        .map_or(effective.last_height(), ChainPayload::last_height);
                    error!(
                        "Not moving tip for blocks {}..={}: {}",
                        from_height, to_height, reason
                    );
                    return Err(PipelineError::DispatchFatal {
                        from_height,
                        to_height,
                        reason,
                    });
                }

                self.commit(writer, effective).await?;
                dispatched.extend(results);
                Ok(Outcome::Committed)
            }
        }
    }

    /// Persist then install the next tip
    async fn commit(&self, writer: &mut WriterState, payload: &ChainPayload) -> Result<()> {
        let next = match writer.tracker.prepare_commit(payload) {
            Ok(Some(next)) => next,
            Ok(None) => return Ok(()),
            Err(inconsistency) => {
                let version = writer.tracker.current_tip().version;
                return Err(self.halt(version, inconsistency.to_string()));
            }
        };

        match self.store.save_tip(&next).await {
            Ok(()) => {}
            Err(StoreError::Conflict { expected, found }) => {
                return Err(self.halt(
                    next.version,
                    format!("stored tip version {found:?} does not match expected {expected}"),
                ));
            }
            Err(e) => {
                error!("Failed to persist tip #{}: {}", next.height, e);
                return Err(PipelineError::Store(e));
            }
        }

        writer.tracker.install(next.clone());
        writer.record_commit(payload);
        self.metrics.tip_height(next.height);
        self.enter(Stage::Committed);
        info!(
            "Committed tip #{} ({}) at version {} for stream '{}'",
            next.height,
            next.hash.map(|h| h.to_string()).unwrap_or_else(|| "unanchored".to_string()),
            next.version,
            self.stream
        );
        self.tip_tx.send_replace(next);
        Ok(())
    }

    /// Apply parked payloads that connect to the new tip
    async fn drain_parked(
        &self,
        writer: &mut WriterState,
        dispatched: &mut Vec<DispatchResult>,
    ) -> Result<()> {
        loop {
            let tip = writer.tracker.current_tip();
            let next = writer
                .parked
                .iter()
                .find_map(|(key, parked)| match TipTracker::validate(parked, &tip) {
                    Decision::Gap { .. } => None,
                    decision => Some((*key, decision)),
                });
            let Some((key, decision)) = next else {
                break;
            };
            let Some(parked) = writer.parked.remove(&key) else {
                break;
            };

            match decision {
                Decision::Duplicate => debug!(
                    "Dropping parked payload {}..={}: now a duplicate",
                    parked.first_height(),
                    parked.last_height()
                ),
                Decision::Invalid { reason } => warn!(
                    "Dropping parked payload {}..={}: {}",
                    parked.first_height(),
                    parked.last_height(),
                    reason
                ),
                decision => {
                    info!(
                        "Applying parked payload {}..={}",
                        parked.first_height(),
                        parked.last_height()
                    );
                    match self.apply_decision(writer, &parked, decision, dispatched).await {
                        Ok(Outcome::Rejected(reason)) => warn!(
                            "Parked payload {}..={} rejected: {}",
                            parked.first_height(),
                            parked.last_height(),
                            reason
                        ),
                        Ok(_) => {}
                        Err(PipelineError::DispatchFatal { reason, .. }) => {
                            warn!("Parked payload kept after fatal dispatch: {}", reason);
                            writer.parked.insert(key, parked);
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        self.metrics.parked_payloads(writer.parked.len());
        Ok(())
    }

    async fn backfill_exhausted(
        &self,
        payload: ChainPayload,
        missing: RangeInclusive<u64>,
        attempts: u32,
        last_error: String,
    ) -> PipelineError {
        {
            let mut writer = self.writer.lock().await;
            self.park(&mut writer, payload);
        }

        self.metrics.backfill_attempt("exhausted");
        let consecutive = self.consecutive_exhausted.fetch_add(1, Ordering::SeqCst) + 1;
        let err = PipelineError::BackfillExhausted {
            missing,
            attempts,
            last_error,
        };
        if consecutive >= self.policy.alert_after_exhausted {
            self.alert(
                "backfill_exhausted",
                &format!("{consecutive} consecutive backfills exhausted; latest: {err}"),
            );
        } else {
            warn!("{}", err);
        }
        err
    }

    /// Keep a payload until its gap closes. When full, the payload furthest
    /// ahead of the tip is evicted.
    fn park(&self, writer: &mut WriterState, payload: ChainPayload) {
        let key = payload.first_height();
        if self.policy.max_parked == 0 {
            warn!("Parking disabled, dropping payload {}..={}", key, payload.last_height());
            return;
        }

        if writer.parked.len() >= self.policy.max_parked && !writer.parked.contains_key(&key) {
            let furthest = writer.parked.keys().next_back().copied().unwrap_or(key);
            if furthest <= key {
                warn!(
                    "Parked payload limit reached, dropping payload {}..={}",
                    key,
                    payload.last_height()
                );
                return;
            }
            if let Some(evicted) = writer.parked.remove(&furthest) {
                warn!(
                    "Parked payload limit reached, evicting payload {}..={}",
                    evicted.first_height(),
                    evicted.last_height()
                );
            }
        }

        info!("Parking payload {}..={} until it can be applied", key, payload.last_height());
        writer.parked.insert(key, payload);
        self.metrics.parked_payloads(writer.parked.len());
    }

    fn reject(&self, payload: &ChainPayload, reason: String) -> Outcome {
        self.enter(Stage::Rejected);
        warn!(
            "Rejected {} payload {}..={}: {}",
            payload.kind(),
            payload.first_height(),
            payload.last_height(),
            reason
        );
        Outcome::Rejected(reason)
    }

    fn halt(&self, version: u64, reason: String) -> PipelineError {
        self.halted.store(true, Ordering::SeqCst);
        self.alert(
            "commit_conflict",
            &format!("Commit conflict at tip version {version}, halting stream '{}': {reason}", self.stream),
        );
        PipelineError::CommitConflict { version, reason }
    }

    fn alert(&self, kind: &str, message: &str) {
        error!(alert = true, alert_kind = kind, stream = %self.stream, "{}", message);
        self.metrics.alert(kind);
    }

    fn enter(&self, stage: Stage) {
        debug!("Stream '{}' stage: {}", self.stream, stage.as_str());
        self.metrics.stage(stage.as_str());
    }

    fn reject_malformed(&self, err: MalformedPayload) -> WebhookAck {
        self.enter(Stage::RejectedMalformed);
        warn!("Rejected malformed payload: {}", err);
        self.ack(AckStatus::RejectedMalformed, Vec::new(), Some(err.to_string()))
    }

    fn ack(
        &self,
        status: AckStatus,
        dispatch: Vec<DispatchResult>,
        reason: Option<String>,
    ) -> WebhookAck {
        let tip = self.current_tip();
        self.metrics.acknowledgement(status.as_str());
        debug!(
            "Acknowledging with {} at tip #{} (version {})",
            status.as_str(),
            tip.height,
            tip.version
        );
        WebhookAck {
            status,
            tip_height: tip.height,
            tip_hash: tip.hash,
            tip_version: tip.version,
            dispatch,
            reason,
        }
    }
}
