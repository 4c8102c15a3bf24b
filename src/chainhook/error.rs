//! Error types for the chainhook ingestion pipeline

use std::ops::RangeInclusive;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Structural violation found while parsing a webhook body.
///
/// `path` points at the first offending value, e.g.
/// `apply[1].transactions[0].metadata.receipt.events[2].data.amount`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed payload at '{path}': {reason}")]
pub struct MalformedPayload {
    pub path: String,
    pub reason: String,
}

impl MalformedPayload {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Inconsistencies between a payload and the recorded chain tip
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TipInconsistency {
    /// Intermediate blocks are missing between the tip and the payload
    #[error("Gap detected: blocks {} to {} are missing", .missing.start(), .missing.end())]
    Gap { missing: RangeInclusive<u64> },

    /// Rollback references a hash that diverges from the recorded chain
    #[error("Fork detected at height {fork_height}")]
    ForkRollback { fork_height: u64 },

    /// Any other mismatch between payload and tip
    #[error("Payload is inconsistent with the recorded tip: {reason}")]
    Invalid { reason: String },

    /// A commit no longer connects to the tip it was validated against
    #[error("Commit out of order: {reason}")]
    CommitOutOfOrder { reason: String },
}

/// Error returned by a handler's `apply` or `compensate`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Eligible for a bounded retry (e.g. downstream store temporarily unavailable)
    #[error("Transient handler failure: {0}")]
    Transient(String),

    /// Retrying will not help; logged and surfaced in the dispatch result
    #[error("Permanent handler failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Classification of a recorded handler failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient failure that exhausted its retries
    Transient,
    Permanent,
}

/// A handler failure scoped to one (handler, event) pair
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error(
    "Handler '{handler}' failed on event {event_index} of tx {tx_id} at height {block_height} \
     ({kind:?} after {attempts} attempts): {reason}"
)]
pub struct HandlerFailure {
    pub handler: String,
    pub block_height: u64,
    pub tx_id: String,
    pub event_index: u32,
    pub kind: FailureKind,
    pub reason: String,
    pub attempts: u32,
}

/// Errors raised while registering handlers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Handler '{0}' is already registered")]
    DuplicateHandler(String),

    #[error("Invalid interest for handler '{handler}': {reason}")]
    InvalidInterest { handler: String, reason: String },
}

/// Errors from the tip persistence collaborator
#[derive(Error, Debug)]
pub enum StoreError {
    /// The stored tip is not at the version this commit replaces
    #[error("Tip version conflict: expected stored version {expected}, found {found:?}")]
    Conflict { expected: u64, found: Option<u64> },

    #[error("Tip store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Errors from the chain-query collaborator used for gap backfill
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackfillError {
    #[error("Backfill is not configured")]
    NotConfigured,

    #[error("Invalid chain query URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Chain query HTTP error with status code: {0}")]
    Http(u16),

    #[error("Chain query network error: {0}")]
    Network(String),

    #[error("Chain query JSON parsing error: {0}")]
    Json(String),

    #[error("Chain query returned malformed blocks: {0}")]
    Malformed(#[from] MalformedPayload),

    #[error("Chain query returned blocks {received:?} for requested range {requested:?}")]
    IncompleteRange {
        requested: (u64, u64),
        received: Option<(u64, u64)>,
    },

    #[error("Chain query timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors surfaced by the webhook service entry point
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Malformed(#[from] MalformedPayload),

    #[error(transparent)]
    TipInconsistency(#[from] TipInconsistency),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Gap could not be closed within the bounded number of attempts
    #[error(
        "Backfill exhausted for blocks {} to {} after {attempts} attempts: {last_error}",
        .missing.start(),
        .missing.end()
    )]
    BackfillExhausted {
        missing: RangeInclusive<u64>,
        attempts: u32,
        last_error: String,
    },

    /// Integrity failure: a commit raced the single writer
    #[error("Commit conflict at tip version {version}: {reason}")]
    CommitConflict { version: u64, reason: String },

    #[error("Tip store error: {0}")]
    Store(#[source] StoreError),

    /// Dispatch ended with failures the configured policy treats as fatal
    #[error("Dispatch failed fatally for blocks {from_height} to {to_height}: {reason}")]
    DispatchFatal {
        from_height: u64,
        to_height: u64,
        reason: String,
    },

    #[error("Pipeline halted after a commit conflict; operator intervention required")]
    Halted,
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
