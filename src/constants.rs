//! Application-wide constants
//!
//! Default values used when the configuration file leaves a setting out.

/// Handler dispatch constants
pub mod dispatch {
    /// Upper bound for a single handler call (in milliseconds)
    pub const HANDLER_TIMEOUT_MS: u64 = 5_000;

    /// Attempts per (handler, event), including the first
    pub const MAX_ATTEMPTS: u32 = 3;

    /// First retry delay after a transient handler failure (in milliseconds)
    pub const INITIAL_BACKOFF_MS: u64 = 200;

    /// Retry delay cap (in milliseconds)
    pub const MAX_BACKOFF_MS: u64 = 5_000;
}

/// Gap backfill constants
pub mod backfill {
    /// Fetch attempts before a gap is reported as exhausted
    pub const MAX_ATTEMPTS: u32 = 5;

    /// Upper bound for a single chain query (in milliseconds)
    pub const FETCH_TIMEOUT_MS: u64 = 10_000;

    pub const INITIAL_BACKOFF_MS: u64 = 500;

    pub const MAX_BACKOFF_MS: u64 = 10_000;

    /// Payloads kept while their gap is unresolved
    pub const MAX_PARKED_PAYLOADS: usize = 64;

    /// Consecutive exhausted backfills before an operational alert
    pub const ALERT_AFTER_EXHAUSTED: u32 = 3;
}

/// Chain-tip tracking constants
pub mod tracker {
    /// Recent canonical hashes retained for duplicate and fork detection
    pub const HISTORY_DEPTH: usize = 256;
}

/// Network-related constants
pub mod network {
    /// Default HTTP request timeout for chain queries (in seconds)
    pub const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;
}

/// Metrics-related constants
pub mod metrics {
    /// Port for Prometheus metrics server
    pub const METRICS_SERVER_PORT: u16 = 9090;
}

/// Database-related constants
pub mod database {
    /// Connection pool maximum size
    pub const MAX_CONNECTIONS: u32 = 10;
}
