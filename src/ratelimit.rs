//! Fixed-window rate limiting.
//!
//! Limits are keyed by the authenticated API-key id, or the client IP when
//! unauthenticated. The counter lives in Redis when configured (so multiple
//! facilitator processes share a limit) and falls back to an in-process
//! `dashmap` otherwise. A store failure fails **open**: the request is allowed
//! and a warning is logged, since availability is preferred to strict
//! enforcement here.

use axum::http::{HeaderValue, Request};
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tower::{Layer, Service};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp (seconds) at which the current window resets.
    pub reset: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub info: RateLimitInfo,
}

/// A counter store for the fixed-window algorithm: `increment` must atomically
/// bump the counter for `key` within `window` and report the new count together
/// with the window's remaining lifetime.
#[async_trait::async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn increment(&self, key: &str, window: Duration) -> Result<(u64, Duration), String>;
}

/// In-process fixed-window store. Each key maps to a `(count, window_start)` pair;
/// a read past the window's end resets the counter.
#[derive(Default)]
pub struct InMemoryRateLimitStore(DashMap<String, (u64, std::time::Instant)>);

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<(u64, Duration), String> {
        let now = std::time::Instant::now();
        let mut entry = self.0.entry(key.to_string()).or_insert((0, now));
        if now.duration_since(entry.1) >= window {
            *entry = (0, now);
        }
        entry.0 += 1;
        let remaining_window = window.saturating_sub(now.duration_since(entry.1));
        Ok((entry.0, remaining_window))
    }
}

/// Redis-backed fixed-window store, shared across facilitator processes.
///
/// Uses `INCR` plus a best-effort `EXPIRE NX` (set the TTL only on the request
/// that created the key) so the window boundary is stable across increments.
pub struct RedisRateLimitStore {
    client: redis::Client,
}

impl RedisRateLimitStore {
    pub fn new(redis_url: &str) -> Result<Self, redis::RedisError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }
}

#[async_trait::async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<(u64, Duration), String> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| e.to_string())?;
        let count: u64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| e.to_string())?;
        if count == 1 {
            let _: redis::RedisResult<()> = redis::cmd("EXPIRE")
                .arg(key)
                .arg(window.as_secs().max(1))
                .query_async(&mut conn)
                .await;
        }
        let ttl_secs: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .unwrap_or(window.as_secs() as i64);
        let remaining = Duration::from_secs(ttl_secs.max(0) as u64);
        Ok((count, remaining))
    }
}

/// Rate limiter: fixed window, fail-open on store error.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, limit: u32, window_secs: u64) -> Self {
        Self {
            store,
            limit,
            window: Duration::from_secs(window_secs.max(1)),
        }
    }

    pub fn in_memory(limit: u32, window_secs: u64) -> Self {
        Self::new(Arc::new(InMemoryRateLimitStore::new()), limit, window_secs)
    }

    pub async fn check(&self, key: &str) -> RateLimitDecision {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        match self.store.increment(key, self.window).await {
            Ok((count, remaining_window)) => {
                let remaining = self.limit.saturating_sub(count as u32);
                let reset = now + remaining_window.as_secs();
                RateLimitDecision {
                    allowed: count <= self.limit as u64,
                    info: RateLimitInfo {
                        limit: self.limit,
                        remaining,
                        reset,
                    },
                }
            }
            Err(error) => {
                tracing::warn!("rate limiter store unavailable, failing open: {}", error);
                RateLimitDecision {
                    allowed: true,
                    info: RateLimitInfo {
                        limit: self.limit,
                        remaining: self.limit,
                        reset: now + self.window.as_secs(),
                    },
                }
            }
        }
    }
}

/// Tower layer applying [`RateLimiter`] to every request that reaches it.
///
/// Health, readiness, and metrics endpoints should not be wrapped by this layer
/// (see the route composition in `handlers`), since the spec exempts them from
/// rate limiting entirely.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

fn client_key<B>(req: &Request<B>) -> String {
    if let Some(api_key) = req.extensions().get::<crate::auth::AuthenticatedKey>() {
        return format!("key:{}", api_key.id);
    }
    req.extensions()
        .get::<std::net::SocketAddr>()
        .map(|addr| format!("ip:{}", addr.ip()))
        .unwrap_or_else(|| "ip:unknown".to_string())
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RateLimitService<S>
where
    S: Service<Request<ReqBody>, Response = axum::response::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Default + Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let limiter = self.limiter.clone();
        let key = client_key(&req);
        let mut inner = self.inner.clone();
        Box::pin(async move {
            let decision = limiter.check(&key).await;
            if !decision.allowed {
                let retry_after = decision
                    .info
                    .reset
                    .saturating_sub(
                        SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_secs(),
                    )
                    .max(1);
                let mut response = axum::response::Response::new(ResBody::default());
                *response.status_mut() = axum::http::StatusCode::TOO_MANY_REQUESTS;
                set_rate_limit_headers(response.headers_mut(), &decision.info, Some(retry_after));
                return Ok(response);
            }
            let mut response = inner.call(req).await?;
            set_rate_limit_headers(response.headers_mut(), &decision.info, None);
            Ok(response)
        })
    }
}

fn set_rate_limit_headers(
    headers: &mut axum::http::HeaderMap,
    info: &RateLimitInfo,
    retry_after: Option<u64>,
) {
    if let Ok(v) = HeaderValue::from_str(&info.limit.to_string()) {
        headers.insert("x-ratelimit-limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&info.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&info.reset.to_string()) {
        headers.insert("x-ratelimit-reset", v);
    }
    if let Some(retry_after) = retry_after {
        if let Ok(v) = HeaderValue::from_str(&retry_after.to_string()) {
            headers.insert("retry-after", v);
        }
    }
}
