use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::metrics_config::MetricsConfig;
use crate::constants;

/// The main configuration structure for the ingestion service
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct IngestConfig {
    /// Stream name, used as the tip store key
    #[validate(length(min = 1))]
    pub stream: String,

    /// Initial anchor used when no tip has been stored yet
    #[serde(default)]
    pub bootstrap: Option<BootstrapConfig>,

    #[serde(default)]
    #[validate]
    pub tracker: TrackerConfig,

    #[serde(default)]
    #[validate]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    #[validate]
    pub backfill: BackfillConfig,

    /// Indexer API used to backfill gaps
    #[serde(default)]
    #[validate]
    pub chain_query: Option<ChainQueryConfig>,

    #[serde(default)]
    #[validate]
    pub database: DatabaseConfig,

    #[serde(default)]
    #[validate]
    pub handlers: Vec<HandlerConfig>,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Anchor block for a fresh stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub index: u64,
    /// 0x-prefixed 32-byte block hash
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TrackerConfig {
    /// Recent canonical hashes kept for duplicate and fork detection
    #[serde(default = "default_history_depth")]
    #[validate(range(min = 1))]
    pub history_depth: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            history_depth: default_history_depth(),
        }
    }
}

/// Handler dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DispatchConfig {
    #[serde(default = "default_handler_timeout_ms")]
    #[validate(range(min = 1))]
    pub handler_timeout_ms: u64,

    /// Attempts per (handler, event), including the first
    #[serde(default = "default_dispatch_max_attempts")]
    #[validate(range(min = 1))]
    pub max_attempts: u32,

    #[serde(default = "default_dispatch_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_dispatch_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Run handlers concurrently, each over the ordered event stream
    #[serde(default)]
    pub concurrent_handlers: bool,

    /// Re-dispatch duplicate apply payloads
    #[serde(default)]
    pub replay_duplicates: bool,

    /// Keep the tip in place when transient failures exhaust their retries
    #[serde(default)]
    pub halt_on_exhausted_transient: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: default_handler_timeout_ms(),
            max_attempts: default_dispatch_max_attempts(),
            initial_backoff_ms: default_dispatch_initial_backoff_ms(),
            max_backoff_ms: default_dispatch_max_backoff_ms(),
            concurrent_handlers: false,
            replay_duplicates: false,
            halt_on_exhausted_transient: false,
        }
    }
}

/// Gap backfill configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BackfillConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_backfill_max_attempts")]
    #[validate(range(min = 1))]
    pub max_attempts: u32,

    #[serde(default = "default_fetch_timeout_ms")]
    #[validate(range(min = 1))]
    pub fetch_timeout_ms: u64,

    #[serde(default = "default_backfill_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_backfill_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_max_parked_payloads")]
    pub max_parked_payloads: usize,

    /// Consecutive exhausted backfills before raising an alert
    #[serde(default = "default_alert_after_exhausted")]
    #[validate(range(min = 1))]
    pub alert_after_exhausted: u32,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_backfill_max_attempts(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            initial_backoff_ms: default_backfill_initial_backoff_ms(),
            max_backoff_ms: default_backfill_max_backoff_ms(),
            max_parked_payloads: default_max_parked_payloads(),
            alert_after_exhausted: default_alert_after_exhausted(),
        }
    }
}

/// Indexer API configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ChainQueryConfig {
    #[validate(url)]
    pub base_url: String,

    /// Sent as `x-api-key` (can use ${CHAIN_API_KEY} for env var)
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_timeout_seconds")]
    #[validate(range(min = 1))]
    pub timeout_seconds: u64,
}

/// Database configuration. The URL is read from `DATABASE_URL`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_max_connections")]
    #[validate(range(min = 1))]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_connections: default_max_connections(),
        }
    }
}

/// Built-in handler implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerType {
    LogOnly,
    StoreDb,
}

/// Configuration for a registered handler
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HandlerConfig {
    #[validate(length(min = 1))]
    pub name: String,

    #[serde(rename = "type")]
    pub handler_type: HandlerType,

    /// Lower runs first
    #[serde(default)]
    pub priority: i32,

    /// Event kinds to receive (empty: all)
    #[serde(default)]
    #[validate(custom = "validate_event_kinds")]
    pub events: Vec<String>,

    /// Transaction kinds to receive (empty: all)
    #[serde(default)]
    #[validate(custom = "validate_transaction_kinds")]
    pub transactions: Vec<String>,

    /// Deliver events of failed transactions
    #[serde(default)]
    pub include_failed: bool,
}

fn default_true() -> bool {
    true
}

fn default_history_depth() -> usize {
    constants::tracker::HISTORY_DEPTH
}

fn default_handler_timeout_ms() -> u64 {
    constants::dispatch::HANDLER_TIMEOUT_MS
}

fn default_dispatch_max_attempts() -> u32 {
    constants::dispatch::MAX_ATTEMPTS
}

fn default_dispatch_initial_backoff_ms() -> u64 {
    constants::dispatch::INITIAL_BACKOFF_MS
}

fn default_dispatch_max_backoff_ms() -> u64 {
    constants::dispatch::MAX_BACKOFF_MS
}

fn default_backfill_max_attempts() -> u32 {
    constants::backfill::MAX_ATTEMPTS
}

fn default_fetch_timeout_ms() -> u64 {
    constants::backfill::FETCH_TIMEOUT_MS
}

fn default_backfill_initial_backoff_ms() -> u64 {
    constants::backfill::INITIAL_BACKOFF_MS
}

fn default_backfill_max_backoff_ms() -> u64 {
    constants::backfill::MAX_BACKOFF_MS
}

fn default_max_parked_payloads() -> usize {
    constants::backfill::MAX_PARKED_PAYLOADS
}

fn default_alert_after_exhausted() -> u32 {
    constants::backfill::ALERT_AFTER_EXHAUSTED
}

fn default_timeout_seconds() -> u64 {
    constants::network::HTTP_REQUEST_TIMEOUT_SECS
}

fn default_max_connections() -> u32 {
    constants::database::MAX_CONNECTIONS
}

fn validate_event_kinds(kinds: &[String]) -> Result<(), ValidationError> {
    for kind in kinds {
        if kind.parse::<crate::chainhook::EventKind>().is_err() {
            return Err(ValidationError::new("unknown event kind"));
        }
    }
    Ok(())
}

fn validate_transaction_kinds(kinds: &[String]) -> Result<(), ValidationError> {
    for kind in kinds {
        if kind.parse::<crate::chainhook::TransactionKind>().is_err() {
            return Err(ValidationError::new("unknown transaction kind"));
        }
    }
    Ok(())
}
