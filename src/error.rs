use thiserror::Error;

use crate::chainhook::{BackfillError, PipelineError};

/// Top-level errors surfaced by the service binary
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::parser::ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Chain query error: {0}")]
    ChainQuery(#[from] BackfillError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
