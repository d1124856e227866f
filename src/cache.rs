//! Verify/settle deduplication cache.
//!
//! Payments are identified by a 32-byte fingerprint over the canonical JSON of
//! `{paymentPayload, paymentRequirements}`. [`Cache::get_or_compute`] memoizes the
//! result of a verify or settle call per fingerprint so that retries (by a client,
//! or by a resource-server middleware that calls `/verify` then `/settle` against
//! the same payload) observe the same outcome instead of re-running on-chain work.
//!
//! Two [`CacheStore`] implementations are provided: [`InMemoryCacheStore`] (always
//! available, `dashmap`-backed) and [`RedisCacheStore`] (cross-process, used when
//! `REDIS_URL` is configured). Redis failures fail open: a store that is
//! unreachable causes the caller to compute without caching rather than error
//! out. The per-fingerprint lock is not part of that fail-open posture — it is
//! always awaited for the full duration of an in-flight computation, so that
//! settle stays at-most-once per fingerprint within the cache TTL.

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// What kind of operation a cache entry memoizes. Verify and settle results for the
/// same payload are cached independently, since settle has a much longer TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Verify,
    Settle,
}

impl CacheKind {
    fn ttl(self, success: bool) -> Duration {
        match (self, success) {
            (CacheKind::Verify, true) => Duration::from_secs(30),
            (CacheKind::Verify, false) => Duration::from_secs(5),
            (CacheKind::Settle, true) => Duration::from_secs(600),
            (CacheKind::Settle, false) => Duration::from_secs(5),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            CacheKind::Verify => "verify",
            CacheKind::Settle => "settle",
        }
    }
}

/// A 32-byte fingerprint over the canonical (sorted-keys, whitespace-stripped) JSON
/// of a payment payload and its requirements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(value: &serde_json::Value) -> Self {
        let canonical = canonicalize(value);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Fingerprint(hasher.finalize().into())
    }

    fn as_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Serializes a JSON value with object keys sorted, producing a stable byte string
/// suitable for hashing regardless of the original field order.
fn canonicalize(value: &serde_json::Value) -> String {
    fn sort(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut sorted: std::collections::BTreeMap<String, serde_json::Value> =
                    std::collections::BTreeMap::new();
                for (k, v) in map {
                    sorted.insert(k.clone(), sort(v));
                }
                serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(sort).collect())
            }
            other => other.clone(),
        }
    }
    serde_json::to_string(&sort(value)).unwrap_or_default()
}

#[derive(Debug, Clone)]
struct Entry {
    value: serde_json::Value,
    expires_at: std::time::Instant,
}

/// A store for cached verify/settle outcomes, used by [`Cache`].
///
/// Implementations need not themselves enforce TTLs precisely; [`Cache`] stores
/// the expiry alongside the value and treats an expired read as a miss.
#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<(serde_json::Value, std::time::Instant)>;
    async fn set(&self, key: &str, value: serde_json::Value, expires_at: std::time::Instant);
}

/// In-process cache store, backed by a `dashmap::DashMap`. Always available and
/// used as the fallback when Redis is not configured or is unreachable.
#[derive(Debug, Default)]
pub struct InMemoryCacheStore(DashMap<String, Entry>);

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self(DashMap::new())
    }
}

#[async_trait::async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Option<(serde_json::Value, std::time::Instant)> {
        self.0.get(key).map(|e| (e.value.clone(), e.expires_at))
    }

    async fn set(&self, key: &str, value: serde_json::Value, expires_at: std::time::Instant) {
        self.0.insert(key.to_string(), Entry { value, expires_at });
    }
}

/// Redis-backed cache store for cross-process deduplication.
///
/// Entries are stored as `cache:<fingerprint>:<kind>` keys with a Redis `PX` expiry
/// matching the kind's TTL. If the Redis connection is unavailable, reads and writes
/// silently no-op (the caller falls back to computing fresh) rather than propagating
/// an error, consistent with the cache's fail-open posture.
pub struct RedisCacheStore {
    client: redis::Client,
}

impl RedisCacheStore {
    pub fn new(redis_url: &str) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }
}

#[async_trait::async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Option<(serde_json::Value, std::time::Instant)> {
        let mut conn = self.client.get_multiplexed_async_connection().await.ok()?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .ok()?;
        let raw = raw?;
        let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
        // Redis enforces the TTL itself; report an expiry far enough in the future
        // that Cache's own expiry check never short-circuits a hit Redis still has.
        Some((value, std::time::Instant::now() + Duration::from_secs(3600)))
    }

    async fn set(&self, key: &str, value: serde_json::Value, expires_at: std::time::Instant) {
        let Ok(mut conn) = self.client.get_multiplexed_async_connection().await else {
            tracing::warn!("cache: redis unavailable, skipping write for {}", key);
            return;
        };
        let ttl_ms = expires_at
            .saturating_duration_since(std::time::Instant::now())
            .as_millis()
            .max(1) as u64;
        let Ok(raw) = serde_json::to_string(&value) else {
            return;
        };
        let result: redis::RedisResult<()> = redis::cmd("SET")
            .arg(key)
            .arg(raw)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await;
        if let Err(e) = result {
            tracing::warn!("cache: redis write failed for {}: {}", key, e);
        }
    }
}

/// Per-fingerprint deduplication cache for verify/settle results.
///
/// Wraps a [`CacheStore`] (in-memory, or Redis when configured) with per-fingerprint
/// locking so that concurrent callers for the same payload serialize through a
/// single computation rather than racing duplicate on-chain calls.
pub struct Cache {
    store: Arc<dyn CacheStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryCacheStore::new()))
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Returns the cached result for `fingerprint`/`kind` if present, otherwise runs
    /// `compute` and caches its result (success or failure, with the kind's TTL).
    ///
    /// A cached failure is replayed as a failure on a later hit, not silently
    /// upgraded to success: the outcome (`ok`/`err`) is stored alongside the
    /// payload so [`CacheStore`] never needs to know about `Result` itself.
    ///
    /// Concurrent calls for the same fingerprint serialize on an in-process mutex:
    /// the first caller computes, later callers wait for it to finish and then
    /// observe the now-populated cache rather than computing themselves. The lock
    /// is held for the entire `compute` call, however long it takes (settle can
    /// run up to the scheme's broadcast/confirmation timeout) — a second caller
    /// must not be able to kick off a second on-chain call for the same
    /// fingerprint just because the first is still in flight.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        fingerprint: Fingerprint,
        kind: CacheKind,
        compute: F,
    ) -> Result<serde_json::Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<serde_json::Value, E>>,
        E: serde::Serialize + serde::de::DeserializeOwned,
    {
        let key = format!("cache:{}:{}", fingerprint.as_hex(), kind.as_str());

        if let Some(outcome) = self.read_cached(&key).await {
            return outcome;
        }

        let lock = self.lock_for(&key);
        let _guard = lock.lock().await;

        if let Some(outcome) = self.read_cached(&key).await {
            return outcome;
        }

        let result = compute().await;
        let (envelope, success) = match &result {
            Ok(value) => (serde_json::json!({"outcome": "ok", "payload": value}), true),
            Err(error) => (
                serde_json::json!({
                    "outcome": "err",
                    "payload": serde_json::to_value(error).unwrap_or(serde_json::Value::Null),
                }),
                false,
            ),
        };
        let expires_at = std::time::Instant::now() + kind.ttl(success);
        self.store.set(&key, envelope, expires_at).await;
        result
    }

    async fn read_cached<E>(&self, key: &str) -> Option<Result<serde_json::Value, E>>
    where
        E: serde::de::DeserializeOwned,
    {
        let (envelope, expires_at) = self.store.get(key).await?;
        if expires_at <= std::time::Instant::now() {
            return None;
        }
        let outcome = envelope.get("outcome")?.as_str()?;
        let payload = envelope.get("payload")?.clone();
        match outcome {
            "ok" => Some(Ok(payload)),
            "err" => Some(Err(serde_json::from_value(payload).ok()?)),
            _ => None,
        }
    }
}
