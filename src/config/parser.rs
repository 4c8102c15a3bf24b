use std::collections::HashSet;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use url::Url;
use validator::Validate;

use super::models::{HandlerType, IngestConfig};
use crate::chainhook::Hash32;

/// Errors that can occur during configuration parsing
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to open config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Configuration validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Configuration error: {0}")]
    Other(String),
}

/// Provides default configuration file path
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chainhook-ingest")
        .join("config.yaml")
}

/// Loads and validates the service configuration
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<IngestConfig, ConfigError> {
    let mut file = File::open(&config_path).map_err(ConfigError::FileError)?;

    let mut content = String::new();
    file.read_to_string(&mut content)
        .map_err(ConfigError::FileError)?;

    parse_config(&content)
}

/// Parses and validates configuration from YAML text
pub fn parse_config(content: &str) -> Result<IngestConfig, ConfigError> {
    let content = substitute_env_vars(content);
    let config: IngestConfig = serde_yaml::from_str(&content).map_err(ConfigError::ParseError)?;

    config.validate().map_err(ConfigError::ValidationError)?;
    check_consistency(&config)?;

    Ok(config)
}

/// Cross-field checks the derive cannot express
fn check_consistency(config: &IngestConfig) -> Result<(), ConfigError> {
    let mut seen_names = HashSet::new();
    for handler in &config.handlers {
        if !seen_names.insert(handler.name.as_str()) {
            return Err(ConfigError::Other(format!(
                "Handler '{}' is defined more than once",
                handler.name
            )));
        }
        if handler.handler_type == HandlerType::StoreDb && !config.database.enabled {
            return Err(ConfigError::Other(format!(
                "Handler '{}' stores events but the database is not enabled",
                handler.name
            )));
        }
    }

    if config.dispatch.initial_backoff_ms > config.dispatch.max_backoff_ms {
        return Err(ConfigError::Other(format!(
            "dispatch.initial_backoff_ms ({}) exceeds dispatch.max_backoff_ms ({})",
            config.dispatch.initial_backoff_ms, config.dispatch.max_backoff_ms
        )));
    }
    if config.backfill.initial_backoff_ms > config.backfill.max_backoff_ms {
        return Err(ConfigError::Other(format!(
            "backfill.initial_backoff_ms ({}) exceeds backfill.max_backoff_ms ({})",
            config.backfill.initial_backoff_ms, config.backfill.max_backoff_ms
        )));
    }

    if let Some(bootstrap) = &config.bootstrap {
        bootstrap.hash.parse::<Hash32>().map_err(|e| {
            ConfigError::Other(format!("Invalid bootstrap hash '{}': {}", bootstrap.hash, e))
        })?;
    }

    if config.backfill.enabled {
        match &config.chain_query {
            Some(chain_query) => {
                let url = Url::parse(&chain_query.base_url).map_err(|e| {
                    ConfigError::Other(format!(
                        "Invalid chain_query.base_url '{}': {}",
                        chain_query.base_url, e
                    ))
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(ConfigError::Other(format!(
                        "chain_query.base_url must use http or https, got '{}'",
                        url.scheme()
                    )));
                }
            }
            None => warn!("Backfill is enabled but no chain_query is configured; gaps will not be filled"),
        }
    }

    Ok(())
}

/// Substitute environment variables in a string.
/// Format: ${VAR_NAME} will be replaced with the value of VAR_NAME
pub fn substitute_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        result.push_str(&rest[..start]);
        let var_name = &rest[start + 2..start + end];
        match env::var(var_name) {
            Ok(value) => result.push_str(&value),
            Err(_) => {
                debug!(
                    "Environment variable {} not found, keeping placeholder",
                    var_name
                );
                result.push_str(&rest[start..=start + end]);
            }
        }
        rest = &rest[start + end + 1..];
    }

    result.push_str(rest);
    result
}
