//! The Inflight Registry: heartbeat tracking and orphan recovery backed by
//! an external KV store (spec.md §4.4).
//!
//! The atomicity contract is carried entirely by server-side Lua scripts so
//! that the sorted index and the payload hash are always mutated in
//! lockstep, never observed half-updated by a concurrent cleanup pass.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use reactor_core::JobQueue;
use serde_json::Value;

const INDEX_KEY: &str = "reactor:inflight:index";
const PAYLOAD_KEY: &str = "reactor:inflight:payloads";
const GC_LOCK_KEY: &str = "reactor:inflight:gc_lock";

fn member_id(process_id: &str, task_id: &str) -> String {
    format!("{process_id}/{task_id}")
}

/// Result of a [`InflightRegistry::cleanup_orphans`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Entries successfully re-enqueued and removed.
    pub reenqueued: usize,
    /// Entries whose score was bumped during the scan and were skipped.
    pub skipped: usize,
}

/// The registry operations spec.md §4.4 defines.
#[async_trait]
pub trait InflightRegistry: Send + Sync {
    /// Atomically set the index score to now and write the job payload,
    /// refreshing the expiration on both structures.
    async fn register(
        &self,
        process_id: &str,
        task_id: &str,
        payload: &Value,
    ) -> anyhow::Result<()>;

    /// Atomically remove both entries for `task_id`. Idempotent.
    async fn unregister(&self, process_id: &str, task_id: &str) -> anyhow::Result<()>;

    /// Bump the index score for each id in `task_ids` to now, in one
    /// round-trip.
    async fn update_heartbeats(&self, process_id: &str, task_ids: &[String]) -> anyhow::Result<()>;

    /// Acquire the mutual-exclusion GC lease, returning the owner token on
    /// success or `None` if another process holds it.
    async fn acquire_gc_lock(&self, ttl: std::time::Duration) -> anyhow::Result<Option<String>>;

    /// Release the GC lease, only if `owner_token` still holds it.
    async fn release_gc_lock(&self, owner_token: &str) -> anyhow::Result<()>;

    /// Re-enqueue and remove every entry whose score is older than
    /// `now - threshold`, skipping any entry whose score changed between
    /// the scan and the atomic check (spec.md §4.4, §8 property 5).
    async fn cleanup_orphans(
        &self,
        threshold: std::time::Duration,
        job_queue: &dyn JobQueue,
    ) -> anyhow::Result<CleanupReport>;

    /// Total entries across all processes, for telemetry.
    async fn inflight_count(&self) -> anyhow::Result<u64>;

    /// Entries grouped by owning process id, for telemetry.
    async fn counts_by_process(&self) -> anyhow::Result<HashMap<String, u64>>;
}

/// A Redis-backed [`InflightRegistry`].
pub struct RedisInflightRegistry {
    client: redis::Client,
}

impl RedisInflightRegistry {
    /// Build a registry against `redis_url` (e.g. `redis://127.0.0.1/`).
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }

    async fn conn(&self) -> anyhow::Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

const REGISTER_SCRIPT: &str = r#"
redis.call('ZADD', KEYS[1], ARGV[1], ARGV[3])
redis.call('HSET', KEYS[2], ARGV[3], ARGV[2])
redis.call('PEXPIRE', KEYS[1], ARGV[4])
redis.call('PEXPIRE', KEYS[2], ARGV[4])
return 1
"#;

const UNREGISTER_SCRIPT: &str = r#"
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
return 1
"#;

const CLEANUP_ONE_SCRIPT: &str = r#"
local score = redis.call('ZSCORE', KEYS[1], ARGV[1])
if not score then
  return false
end
if tonumber(score) > tonumber(ARGV[2]) then
  return false
end
local payload = redis.call('HGET', KEYS[2], ARGV[1])
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('HDEL', KEYS[2], ARGV[1])
return payload
"#;

const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
else
  return 0
end
"#;

#[async_trait]
impl InflightRegistry for RedisInflightRegistry {
    async fn register(
        &self,
        process_id: &str,
        task_id: &str,
        payload: &Value,
    ) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let member = member_id(process_id, task_id);
        let payload_json = serde_json::to_string(payload)?;
        let ttl_ms = (crate::config::ReactorConfig::DEFAULT_ORPHAN_THRESHOLD.as_millis() as u64) * 3;
        redis::Script::new(REGISTER_SCRIPT)
            .key(INDEX_KEY)
            .key(PAYLOAD_KEY)
            .arg(crate::task::now_ms())
            .arg(payload_json)
            .arg(member)
            .arg(ttl_ms)
            .invoke_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn unregister(&self, process_id: &str, task_id: &str) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        let member = member_id(process_id, task_id);
        redis::Script::new(UNREGISTER_SCRIPT)
            .key(INDEX_KEY)
            .key(PAYLOAD_KEY)
            .arg(member)
            .invoke_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn update_heartbeats(&self, process_id: &str, task_ids: &[String]) -> anyhow::Result<()> {
        if task_ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let now = crate::task::now_ms();
        let mut pipe = redis::pipe();
        for task_id in task_ids {
            pipe.zadd(INDEX_KEY, member_id(process_id, task_id), now)
                .ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn acquire_gc_lock(&self, ttl: std::time::Duration) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn().await?;
        let token = uuid::Uuid::new_v4().to_string();
        let acquired: bool = conn
            .set_options(
                GC_LOCK_KEY,
                token.clone(),
                redis::SetOptions::default()
                    .with_expiration(redis::SetExpiry::PX(ttl.as_millis() as u64))
                    .conditional_set(redis::ExistenceCheck::NX),
            )
            .await?;
        Ok(acquired.then_some(token))
    }

    async fn release_gc_lock(&self, owner_token: &str) -> anyhow::Result<()> {
        let mut conn = self.conn().await?;
        redis::Script::new(RELEASE_LOCK_SCRIPT)
            .key(GC_LOCK_KEY)
            .arg(owner_token)
            .invoke_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn cleanup_orphans(
        &self,
        threshold: std::time::Duration,
        job_queue: &dyn JobQueue,
    ) -> anyhow::Result<CleanupReport> {
        let mut conn = self.conn().await?;
        let cutoff = crate::task::now_ms() - threshold.as_millis() as i64;
        let candidates: Vec<String> = conn
            .zrangebyscore(INDEX_KEY, "-inf", cutoff)
            .await?;

        let mut report = CleanupReport::default();
        for member in candidates {
            let result: Option<String> = redis::Script::new(CLEANUP_ONE_SCRIPT)
                .key(INDEX_KEY)
                .key(PAYLOAD_KEY)
                .arg(&member)
                .arg(cutoff)
                .invoke_async(&mut conn)
                .await?;
            let Some(payload_json) = result else {
                report.skipped += 1;
                continue;
            };
            match serde_json::from_str::<Value>(&payload_json) {
                Ok(payload) => match job_queue.enqueue(payload).await {
                    Ok(()) => report.reenqueued += 1,
                    Err(err) => {
                        tracing::warn!(member = %member, error = %err, "orphan re-enqueue failed");
                    }
                },
                Err(err) => {
                    tracing::warn!(member = %member, error = %err, "orphan payload was not valid json");
                }
            }
        }
        Ok(report)
    }

    async fn inflight_count(&self) -> anyhow::Result<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.zcard(INDEX_KEY).await?)
    }

    async fn counts_by_process(&self) -> anyhow::Result<HashMap<String, u64>> {
        let mut conn = self.conn().await?;
        let members: Vec<String> = conn.zrange(INDEX_KEY, 0, -1).await?;
        let mut counts = HashMap::new();
        for member in members {
            if let Some((process_id, _)) = member.split_once('/') {
                *counts.entry(process_id.to_string()).or_insert(0u64) += 1;
            }
        }
        Ok(counts)
    }
}

/// An in-memory [`InflightRegistry`] used by tests (spec.md's external KV
/// store is a fixed external collaborator; this fake stands in for it
/// without requiring a live Redis instance).
#[derive(Default)]
pub struct InMemoryInflightRegistry {
    inner: std::sync::Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    index: HashMap<String, i64>,
    payloads: HashMap<String, Value>,
    gc_lock: Option<String>,
}

impl InMemoryInflightRegistry {
    /// A fresh, empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InflightRegistry for InMemoryInflightRegistry {
    async fn register(
        &self,
        process_id: &str,
        task_id: &str,
        payload: &Value,
    ) -> anyhow::Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let member = member_id(process_id, task_id);
        guard.index.insert(member.clone(), crate::task::now_ms());
        guard.payloads.insert(member, payload.clone());
        Ok(())
    }

    async fn unregister(&self, process_id: &str, task_id: &str) -> anyhow::Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let member = member_id(process_id, task_id);
        guard.index.remove(&member);
        guard.payloads.remove(&member);
        Ok(())
    }

    async fn update_heartbeats(&self, process_id: &str, task_ids: &[String]) -> anyhow::Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let now = crate::task::now_ms();
        for task_id in task_ids {
            guard.index.insert(member_id(process_id, task_id), now);
        }
        Ok(())
    }

    async fn acquire_gc_lock(&self, _ttl: std::time::Duration) -> anyhow::Result<Option<String>> {
        let mut guard = self.inner.lock().unwrap();
        if guard.gc_lock.is_some() {
            return Ok(None);
        }
        let token = uuid::Uuid::new_v4().to_string();
        guard.gc_lock = Some(token.clone());
        Ok(Some(token))
    }

    async fn release_gc_lock(&self, owner_token: &str) -> anyhow::Result<()> {
        let mut guard = self.inner.lock().unwrap();
        if guard.gc_lock.as_deref() == Some(owner_token) {
            guard.gc_lock = None;
        }
        Ok(())
    }

    async fn cleanup_orphans(
        &self,
        threshold: std::time::Duration,
        job_queue: &dyn JobQueue,
    ) -> anyhow::Result<CleanupReport> {
        let cutoff = crate::task::now_ms() - threshold.as_millis() as i64;
        let candidates: Vec<String> = {
            let guard = self.inner.lock().unwrap();
            guard
                .index
                .iter()
                .filter(|(_, score)| **score <= cutoff)
                .map(|(member, _)| member.clone())
                .collect()
        };

        let mut report = CleanupReport::default();
        for member in candidates {
            let taken = {
                let mut guard = self.inner.lock().unwrap();
                match guard.index.get(&member).copied() {
                    Some(score) if score <= cutoff => {
                        guard.index.remove(&member);
                        guard.payloads.remove(&member)
                    }
                    _ => None,
                }
            };
            let Some(payload) = taken else {
                report.skipped += 1;
                continue;
            };
            match job_queue.enqueue(payload).await {
                Ok(()) => report.reenqueued += 1,
                Err(err) => {
                    tracing::warn!(member = %member, error = %err, "orphan re-enqueue failed");
                }
            }
        }
        Ok(report)
    }

    async fn inflight_count(&self) -> anyhow::Result<u64> {
        Ok(self.inner.lock().unwrap().index.len() as u64)
    }

    async fn counts_by_process(&self) -> anyhow::Result<HashMap<String, u64>> {
        let guard = self.inner.lock().unwrap();
        let mut counts = HashMap::new();
        for member in guard.index.keys() {
            if let Some((process_id, _)) = member.split_once('/') {
                *counts.entry(process_id.to_string()).or_insert(0u64) += 1;
            }
        }
        Ok(counts)
    }
}

/// Shared handle type used by the Processor.
pub type SharedInflightRegistry = Arc<dyn InflightRegistry>;
