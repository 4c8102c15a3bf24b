//! Test utilities for the ingestion pipeline
//!
//! Builders for blocks, payloads and chainhook JSON bodies, plus mock
//! handlers, chain queries and tip stores with injectable failures.

pub mod builders;
pub mod mocks;

pub use builders::*;
pub use mocks::*;
