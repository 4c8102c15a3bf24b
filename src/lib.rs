//! Chainhook webhook ingestion: payload parsing, chain-tip tracking and
//! ordered handler dispatch with reorg compensation.

pub mod chainhook;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod metrics;

#[cfg(test)]
pub mod test_utils;

pub use chainhook::{AckStatus, WebhookAck, WebhookService, WebhookServiceBuilder};
pub use error::IngestError;
