//! Chain-query collaborator used to backfill gaps

use std::ops::RangeInclusive;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, error};
use url::Url;

use super::error::{BackfillError, MalformedPayload};
use super::models::{Block, PayloadKind};
use super::parser::PayloadParser;
use crate::config::models::ChainQueryConfig;

/// Source of canonical blocks for a height range
#[async_trait]
pub trait ChainQuery: Send + Sync {
    /// Fetch exactly the blocks in `range`, ascending
    async fn fetch_blocks(&self, range: RangeInclusive<u64>) -> Result<Vec<Block>, BackfillError>;
}

/// Chain query over the indexer's HTTP API.
///
/// `GET {base_url}/blocks?from=A&to=B` returns a chainhook-shaped
/// `{ "apply": [...] }` body, parsed with the webhook parser.
pub struct HttpChainQuery {
    client: Client,
    base_url: Url,
    api_key: Option<SecretString>,
}

impl HttpChainQuery {
    pub fn new(config: &ChainQueryConfig) -> Result<Self, BackfillError> {
        let mut base_url =
            Url::parse(&config.base_url).map_err(|e| BackfillError::InvalidUrl {
                url: config.base_url.clone(),
                reason: e.to_string(),
            })?;
        // join() replaces the last segment unless the path ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(format!("chainhook-ingest/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackfillError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key.clone().map(SecretString::from),
        })
    }

    fn blocks_url(&self, range: &RangeInclusive<u64>) -> Result<Url, BackfillError> {
        let mut url = self
            .base_url
            .join("blocks")
            .map_err(|e| BackfillError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: e.to_string(),
            })?;
        url.query_pairs_mut()
            .append_pair("from", &range.start().to_string())
            .append_pair("to", &range.end().to_string());
        Ok(url)
    }
}

#[async_trait]
impl ChainQuery for HttpChainQuery {
    async fn fetch_blocks(&self, range: RangeInclusive<u64>) -> Result<Vec<Block>, BackfillError> {
        let url = self.blocks_url(&range)?;
        debug!("Fetching blocks {}..={} from {}", range.start(), range.end(), url);

        let mut request = self
            .client
            .get(url.clone())
            .header("Accept", "application/json");
        if let Some(api_key) = &self.api_key {
            request = request.header("x-api-key", api_key.expose_secret());
        }

        let response = match request.send().await {
            Ok(resp) => resp,
            Err(e) => {
                error!("Network error fetching blocks from {}: {}", url, e);
                return Err(BackfillError::Network(e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            error!(
                "HTTP error {} fetching blocks: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            );
            return Err(BackfillError::Http(status.as_u16()));
        }

        let body: Value = match response.json().await {
            Ok(json) => json,
            Err(e) => {
                error!("JSON parsing error in chain query response: {}", e);
                return Err(BackfillError::Json(e.to_string()));
            }
        };

        let payload = PayloadParser::parse(&body)?;
        if payload.kind() != PayloadKind::Apply {
            return Err(MalformedPayload::new(
                "rollback",
                "chain query returned a rollback payload",
            )
            .into());
        }

        let received = (payload.first_height(), payload.last_height());
        if received != (*range.start(), *range.end()) {
            return Err(BackfillError::IncompleteRange {
                requested: (*range.start(), *range.end()),
                received: Some(received),
            });
        }

        debug!("Fetched {} blocks", payload.blocks().len());
        Ok(payload.into_blocks())
    }
}
