//! Per-origin connection pool (spec.md §4.2).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::Url;

use crate::error::ReactorError;

/// The triple `(scheme, host, port)` identifying a connection target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct OriginKey {
    scheme: String,
    host: String,
    port: u16,
}

impl OriginKey {
    fn from_url(url: &Url) -> Result<Self, ReactorError> {
        let host = url
            .host_str()
            .ok_or_else(|| ReactorError::InvalidRequest("URL has no host".to_string()))?
            .to_string();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ReactorError::InvalidRequest("URL has no known port".to_string()))?;
        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
            port,
        })
    }
}

struct PooledClient {
    client: reqwest::Client,
    last_used: Instant,
}

/// Caches per-origin [`reqwest::Client`]s with keep-alive, evicting idle
/// entries on a schedule driven by the Processor.
///
/// All mutations are serialized by a single lock (spec.md §4.2); the pool
/// never blocks on network I/O while holding it — client construction is
/// synchronous (no handshake occurs until first use).
///
/// `dns_cache_ttl` is carried as a config value but not currently plumbed
/// into `reqwest`'s resolver, which does not expose a public cache-TTL knob;
/// it is retained on [`ConnectionPool`] so a future resolver swap (e.g. a
/// custom `Resolve` impl) has somewhere to read it from.
pub struct ConnectionPool {
    clients: Mutex<HashMap<OriginKey, PooledClient>>,
    idle_timeout: Duration,
    #[allow(dead_code)]
    dns_cache_ttl: Duration,
    user_agent: Option<String>,
}

impl ConnectionPool {
    /// Build an empty pool.
    pub fn new(idle_timeout: Duration, dns_cache_ttl: Duration, user_agent: Option<String>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            idle_timeout,
            dns_cache_ttl,
            user_agent,
        }
    }

    /// Return the client for `url`'s origin, constructing one on first use.
    pub fn client_for(&self, url: &Url) -> Result<reqwest::Client, ReactorError> {
        let key = OriginKey::from_url(url)?;
        let mut guard = self.clients.lock().unwrap();
        if let Some(entry) = guard.get_mut(&key) {
            entry.last_used = Instant::now();
            return Ok(entry.client.clone());
        }
        let mut builder = reqwest::Client::builder()
            .pool_idle_timeout(self.idle_timeout)
            .redirect(reqwest::redirect::Policy::none());
        if let Some(ua) = &self.user_agent {
            builder = builder.user_agent(ua.clone());
        }
        let client = builder
            .build()
            .map_err(|e| ReactorError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;
        guard.insert(
            key,
            PooledClient {
                client: client.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(client)
    }

    /// Build a fresh, uncached client honoring a per-request connect-timeout
    /// override. Bypasses the pool since the cached per-origin client is
    /// shared across every request to that origin and can't carry a
    /// one-off connect deadline; used only when a `Request` sets one.
    pub fn one_off_client(&self, connect_timeout: Duration) -> Result<reqwest::Client, ReactorError> {
        let mut builder = reqwest::Client::builder()
            .pool_idle_timeout(self.idle_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(connect_timeout);
        if let Some(ua) = &self.user_agent {
            builder = builder.user_agent(ua.clone());
        }
        builder
            .build()
            .map_err(|e| ReactorError::InvalidRequest(format!("failed to build HTTP client: {e}")))
    }

    /// Close clients whose `last_used` predates `now - idle_timeout`,
    /// returning the count closed.
    pub fn close_idle(&self, now: Instant) -> usize {
        let mut guard = self.clients.lock().unwrap();
        let before = guard.len();
        guard.retain(|_, entry| now.duration_since(entry.last_used) < self.idle_timeout);
        before - guard.len()
    }

    /// Tear down every pooled client.
    pub fn close_all(&self) {
        self.clients.lock().unwrap().clear();
    }

    /// Number of distinct origins currently pooled, for telemetry.
    pub fn len(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// True if no origins are pooled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
