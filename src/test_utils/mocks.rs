//! Mock implementations for testing

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::builders::blocks;
use crate::chainhook::backfill::ChainQuery;
use crate::chainhook::dispatcher::{ChainEventHandler, DispatchMode, TxContext};
use crate::chainhook::error::{BackfillError, HandlerError, StoreError};
use crate::chainhook::models::{Block, EventKind, Hash32, ReceiptEvent};
use crate::chainhook::store::{InMemoryTipStore, TipStore};
use crate::chainhook::tracker::ChainTipState;

/// Configuration for controlling mock handler failures
#[derive(Debug, Clone, Default)]
pub struct HandlerFailureConfig {
    pub fail_permanently: bool,
    pub fail_transiently: bool,
    /// Fail this many calls transiently, then succeed
    pub transient_failures: usize,
    /// Fail permanently for events of this block height
    pub fail_on_height: Option<u64>,
    pub delay: Option<Duration>,
}

impl HandlerFailureConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn permanent() -> Self {
        Self {
            fail_permanently: true,
            ..Default::default()
        }
    }

    pub fn transient() -> Self {
        Self {
            fail_transiently: true,
            ..Default::default()
        }
    }

    pub fn flaky(failures: usize) -> Self {
        Self {
            transient_failures: failures,
            ..Default::default()
        }
    }

    pub fn at_height(height: u64) -> Self {
        Self {
            fail_on_height: Some(height),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }
}

/// One successful handler call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub handler: String,
    pub mode: DispatchMode,
    pub block_height: u64,
    pub tx_id: Hash32,
    pub event_index: u32,
    pub event_kind: EventKind,
}

/// Call log shared between handlers to observe global ordering
pub type CallLog = Arc<Mutex<Vec<RecordedCall>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Handler recording every successful call
#[derive(Debug)]
pub struct MockHandler {
    name: String,
    failure_config: HandlerFailureConfig,
    log: CallLog,
    call_count: AtomicUsize,
}

impl MockHandler {
    pub fn new(name: &str) -> Self {
        Self::with_failures(name, HandlerFailureConfig::default())
    }

    pub fn with_failures(name: &str, failure_config: HandlerFailureConfig) -> Self {
        Self {
            name: name.to_string(),
            failure_config,
            log: call_log(),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Successful calls made to this handler
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.handler == self.name)
            .cloned()
            .collect()
    }

    /// Every attempt, failed ones included
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    async fn record(&self, event: &ReceiptEvent, ctx: &TxContext) -> Result<(), HandlerError> {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.failure_config.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failure_config.fail_permanently {
            return Err(HandlerError::permanent("Mock permanent failure"));
        }
        if self.failure_config.fail_transiently || count <= self.failure_config.transient_failures {
            return Err(HandlerError::transient("Mock transient failure"));
        }
        if self.failure_config.fail_on_height == Some(ctx.block.index) {
            return Err(HandlerError::permanent(format!(
                "Mock failure at height {}",
                ctx.block.index
            )));
        }

        self.log.lock().unwrap().push(RecordedCall {
            handler: self.name.clone(),
            mode: ctx.mode,
            block_height: ctx.block.index,
            tx_id: ctx.tx_id,
            event_index: event.index,
            event_kind: event.kind.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl ChainEventHandler for MockHandler {
    async fn apply(&self, event: &ReceiptEvent, ctx: &TxContext) -> Result<(), HandlerError> {
        self.record(event, ctx).await
    }

    async fn compensate(&self, event: &ReceiptEvent, ctx: &TxContext) -> Result<(), HandlerError> {
        self.record(event, ctx).await
    }
}

/// Chain query serving generated blocks of one fork
pub struct ScriptedChainQuery {
    fork: u8,
    failures: Mutex<Vec<BackfillError>>,
    delay: Option<Duration>,
    requests: Mutex<Vec<RangeInclusive<u64>>>,
}

impl ScriptedChainQuery {
    pub fn new(fork: u8) -> Self {
        Self {
            fork,
            failures: Mutex::new(Vec::new()),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Fail the first `count` requests with `error`
    pub fn with_failures(self, count: usize, error: BackfillError) -> Self {
        *self.failures.lock().unwrap() = vec![error; count];
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Ranges requested so far
    pub fn requests(&self) -> Vec<RangeInclusive<u64>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainQuery for ScriptedChainQuery {
    async fn fetch_blocks(&self, range: RangeInclusive<u64>) -> Result<Vec<Block>, BackfillError> {
        self.requests.lock().unwrap().push(range.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.lock().unwrap().pop() {
            return Err(err);
        }
        Ok(blocks(*range.start(), *range.end(), self.fork))
    }
}

/// Configuration for controlling tip store failures
#[derive(Debug, Clone, Default)]
pub struct StoreFailureConfig {
    pub fail_on_load: bool,
    pub fail_on_save: bool,
    pub conflict_on_save: bool,
    /// Fail this many saves with a backend error, then succeed
    pub failed_saves: usize,
}

/// Tip store wrapping the in-memory store with injectable failures
pub struct MockTipStore {
    inner: InMemoryTipStore,
    failure_config: StoreFailureConfig,
    saves: AtomicUsize,
}

impl MockTipStore {
    pub fn new() -> Self {
        Self::with_failures(StoreFailureConfig::default())
    }

    pub fn with_failures(failure_config: StoreFailureConfig) -> Self {
        Self {
            inner: InMemoryTipStore::new(),
            failure_config,
            saves: AtomicUsize::new(0),
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Option<ChainTipState> {
        self.inner.snapshot().await
    }
}

#[async_trait]
impl TipStore for MockTipStore {
    async fn load_tip(&self) -> Result<Option<ChainTipState>, StoreError> {
        if self.failure_config.fail_on_load {
            return Err(StoreError::Backend(anyhow::anyhow!("Mock load failure")));
        }
        self.inner.load_tip().await
    }

    async fn save_tip(&self, tip: &ChainTipState) -> Result<(), StoreError> {
        let count = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failure_config.conflict_on_save {
            return Err(StoreError::Conflict {
                expected: tip.version.saturating_sub(1),
                found: Some(tip.version),
            });
        }
        if self.failure_config.fail_on_save || count <= self.failure_config.failed_saves {
            return Err(StoreError::Backend(anyhow::anyhow!("Mock save failure")));
        }
        self.inner.save_tip(tip).await
    }
}
