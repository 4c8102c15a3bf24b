//! Chainhook ingestion pipeline
//!
//! Webhook bodies are parsed into typed payloads, validated against the
//! committed chain tip, dispatched to registered handlers and committed.

pub mod backfill;
pub mod builder;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod parser;
pub mod service;
pub mod store;
pub mod tracker;

pub use backfill::*;
pub use builder::WebhookServiceBuilder;
pub use dispatcher::*;
pub use error::*;
pub use handlers::*;
pub use metrics::{PipelineMetrics, PipelineMetricsContext};
pub use models::*;
pub use parser::*;
pub use service::*;
pub use store::*;
pub use tracker::*;
