//! Configuration structs.
//!
//! Clusters are declared once at process start and are read-only afterwards.
//! `QueryConfig` carries the freshness, concurrency, and timeout knobs the
//! query engine honors on every call. All defaults are documented on the
//! `Default` impls; the embedding layer decides where overrides come from
//! (file, env, flags).

use std::time::Duration;

use serde::Deserialize;

fn default_connect_timeout_ms() -> u64 {
    3_000
}

/// A cluster the engine can query, identified by its alias.
///
/// `generation` is a free-form tag from configuration ("legacy" or "modern");
/// an unrecognized value is rejected with `UnsupportedProtocol` when the
/// cluster registry is built, not silently defaulted.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Alias the cluster is addressed by in queries
    pub alias: String,

    /// Protocol generation tag: "legacy" (coordination-service discovery)
    /// or "modern" (broker-native admin protocol)
    pub generation: String,

    /// Bootstrap endpoints, "host:port". For legacy clusters these are the
    /// coordination service endpoints; for modern clusters, brokers.
    pub bootstrap: Vec<String>,

    /// Connect timeout per endpoint, milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl ClusterConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Retry knobs for transient transport failures during a scan.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum retry attempts after the initial try
    pub max_retries: usize,
    /// Initial backoff, milliseconds
    pub initial_backoff_ms: u64,
    /// Backoff cap, milliseconds
    pub max_backoff_ms: u64,
    /// Exponential growth factor
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Engine-wide execution limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Serve a cached metadata snapshot if younger than this, milliseconds
    pub metadata_ttl_ms: u64,

    /// Maximum partition scans in flight per query
    pub max_concurrent_scans: usize,

    /// Shared deadline for a whole query, milliseconds
    pub query_timeout_ms: u64,

    /// Records requested per fetch round-trip
    pub fetch_batch_size: usize,

    /// Upper bound on a single request/response round trip, milliseconds.
    /// Guards against brokers that accept a connection and then go silent.
    pub request_timeout_ms: u64,

    /// Hard cap on rows a single query may return, applied after the
    /// query's own LIMIT
    pub max_rows: usize,

    /// Open connections allowed per broker
    pub max_connections_per_broker: usize,

    /// Close pooled connections idle for longer than this, milliseconds
    pub pool_idle_timeout_ms: u64,

    /// Transient-failure retry policy for scans
    pub retry: RetryConfig,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            metadata_ttl_ms: 30_000,
            max_concurrent_scans: 8,
            query_timeout_ms: 30_000,
            fetch_batch_size: 500,
            request_timeout_ms: 10_000,
            max_rows: 10_000,
            max_connections_per_broker: 5,
            pool_idle_timeout_ms: 60_000,
            retry: RetryConfig::default(),
        }
    }
}

impl QueryConfig {
    pub fn metadata_ttl(&self) -> Duration {
        Duration::from_millis(self.metadata_ttl_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_idle_timeout_ms)
    }
}
