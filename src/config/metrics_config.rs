use serde::{Deserialize, Serialize};

use crate::constants;

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus endpoint
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Metrics server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_port(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_port() -> u16 {
    constants::metrics::METRICS_SERVER_PORT
}
