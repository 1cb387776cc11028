//! Reactor configuration knobs (spec.md §6).

use std::time::Duration;

/// Configuration for a [`crate::processor::Processor`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ReactorConfig {
    /// Cap on in-flight execution units.
    pub max_connections: u32,

    /// Seconds before the pool evicts an idle per-origin client.
    pub idle_connection_timeout: Duration,

    /// Per-call timeout used when the Request does not override it.
    pub default_request_timeout: Duration,

    /// Seconds to wait for drain before re-enqueueing remaining in-flight
    /// tasks on `stop(timeout)`.
    pub shutdown_timeout: Duration,

    /// Interval between heartbeat-refresh rounds.
    pub heartbeat_interval: Duration,

    /// Age past which an Inflight Registry entry is considered orphaned.
    pub orphan_threshold: Duration,

    /// Default max-redirects cap used when a Request does not override it.
    /// `0` disables redirect following entirely.
    pub max_redirects: u32,

    /// Bytes; enforced by the Response Reader.
    pub max_response_size: u64,

    /// Default user-agent header, applied when the request has none.
    pub user_agent: Option<String>,

    /// Seconds a resolved DNS entry is cached for.
    pub dns_cache_ttl: Duration,

    /// When true, 4xx/5xx responses are routed to the error path instead of
    /// completion (spec.md §7).
    pub raise_error_responses: bool,
}

impl ReactorConfig {
    /// Default `max_connections` (spec.md §6).
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 256;

    /// Default `idle_connection_timeout`.
    pub const DEFAULT_IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

    /// Default `default_request_timeout`.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

    /// Default `shutdown_timeout`: framework shutdown budget minus two
    /// seconds, with the budget assumed to be the common 30s worker default.
    pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(28);

    /// Default `heartbeat_interval`.
    pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

    /// Default `orphan_threshold`.
    pub const DEFAULT_ORPHAN_THRESHOLD: Duration = Duration::from_secs(300);

    /// Default `max_redirects`.
    pub const DEFAULT_MAX_REDIRECTS: u32 = 5;

    /// Default `max_response_size`: 20 MiB.
    pub const DEFAULT_MAX_RESPONSE_SIZE: u64 = 20 * 1024 * 1024;

    /// Default `dns_cache_ttl`.
    pub const DEFAULT_DNS_CACHE_TTL: Duration = Duration::from_secs(300);

    /// GC lock lease duration in the external KV store (spec.md §6).
    pub const GC_LOCK_TTL: Duration = Duration::from_secs(60);

    /// Build a config from defaults only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate cross-field invariants not expressible in the type alone.
    pub fn validate(&self) -> Result<(), crate::error::ReactorError> {
        if self.max_connections == 0 {
            return Err(crate::error::ReactorError::InvalidRequest(
                "max_connections must be > 0".to_string(),
            ));
        }
        if self.heartbeat_interval >= self.orphan_threshold {
            return Err(crate::error::ReactorError::InvalidRequest(
                "heartbeat_interval must be strictly less than orphan_threshold".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            idle_connection_timeout: Self::DEFAULT_IDLE_CONNECTION_TIMEOUT,
            default_request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            shutdown_timeout: Self::DEFAULT_SHUTDOWN_TIMEOUT,
            heartbeat_interval: Self::DEFAULT_HEARTBEAT_INTERVAL,
            orphan_threshold: Self::DEFAULT_ORPHAN_THRESHOLD,
            max_redirects: Self::DEFAULT_MAX_REDIRECTS,
            max_response_size: Self::DEFAULT_MAX_RESPONSE_SIZE,
            user_agent: None,
            dns_cache_ttl: Self::DEFAULT_DNS_CACHE_TTL,
            raise_error_responses: false,
        }
    }
}
