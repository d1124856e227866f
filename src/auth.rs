//! API-key authentication and authorization.
//!
//! Keys are resolved from two sources, in order: an in-memory map seeded from the
//! `API_KEYS` environment variable (`"key1:name1,key2:name2,..."`), then a shared
//! Redis-backed store for admin-created keys. Only `SHA-256(rawKey)` is ever stored
//! or compared; comparison uses [`subtle::ConstantTimeEq`] to avoid leaking key
//! material through timing. If no keys are configured and `API_KEY_REQUIRED` is
//! false, auth is skipped entirely (development mode).

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// An authenticated caller, attached to request extensions by [`AuthLayer`] and
/// read by [`ratelimit`](crate::ratelimit) to key the rate limiter per-key rather
/// than per-IP.
#[derive(Debug, Clone)]
pub struct AuthenticatedKey {
    pub id: String,
    pub name: String,
    pub permissions: Vec<Permission>,
    pub custom_rate_limit: Option<u32>,
}

impl AuthenticatedKey {
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Verify,
    Settle,
    Supported,
    Read,
}

impl Permission {
    /// Maps a request path to the permission required to access it.
    pub fn for_path(path: &str) -> Self {
        match path {
            "/verify" => Permission::Verify,
            "/settle" => Permission::Settle,
            "/supported" => Permission::Supported,
            _ => Permission::Read,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing API key")]
    Missing,
    #[error("invalid API key")]
    Invalid,
    #[error("API key revoked")]
    Revoked,
    #[error("API key expired")]
    Expired,
    #[error("missing permission: {0:?}")]
    Forbidden(Permission),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::UNAUTHORIZED,
        };
        (status, self.to_string()).into_response()
    }
}

fn sha256_hex(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// A durable API-key record, as stored in Redis under `apikey:<sha256hex>`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ApiKeyRecord {
    pub id: String,
    pub name: String,
    pub key_hash: String,
    pub permissions: Vec<String>,
    pub custom_rate_limit: Option<u32>,
    pub revoked: bool,
    pub last_used_at: Option<u64>,
    pub usage_count: u64,
}

/// Resolves raw API keys to [`AuthenticatedKey`]s.
///
/// Seeds an in-memory map from `API_KEYS` at construction, then falls back to
/// Redis for keys not found there (admin-created keys never in the environment).
pub struct AuthStore {
    seeded: HashMap<String, AuthenticatedKey>,
    redis: Option<redis::Client>,
    required: bool,
}

impl AuthStore {
    /// Builds an auth store from the `API_KEYS` env value and an optional Redis URL.
    ///
    /// `api_keys` is the parsed `"key1:name1,key2:name2"` list (see
    /// [`crate::config::AppConfig::from_env`]); keys are hashed immediately so the
    /// raw values never linger in memory longer than necessary.
    pub fn new(api_keys: &[String], redis_url: Option<&str>, required: bool) -> Self {
        let mut seeded = HashMap::new();
        for entry in api_keys {
            let (raw_key, name) = match entry.split_once(':') {
                Some((k, n)) => (k, n),
                None => (entry.as_str(), entry.as_str()),
            };
            let hash = sha256_hex(raw_key);
            seeded.insert(
                hash.clone(),
                AuthenticatedKey {
                    id: hash,
                    name: name.to_string(),
                    permissions: vec![
                        Permission::Verify,
                        Permission::Settle,
                        Permission::Supported,
                        Permission::Read,
                    ],
                    custom_rate_limit: None,
                },
            );
        }
        let redis = redis_url.and_then(|url| redis::Client::open(url).ok());
        Self {
            seeded,
            redis,
            required,
        }
    }

    /// Whether auth should be enforced at all. Development mode (no keys and not
    /// required) skips validation entirely.
    pub fn enabled(&self) -> bool {
        self.required || !self.seeded.is_empty()
    }

    pub async fn validate(&self, raw_key: &str) -> Result<AuthenticatedKey, AuthError> {
        let hash = sha256_hex(raw_key);
        if let Some(key) = self.seeded.get(&hash) {
            if constant_time_eq(&key.id, &hash) {
                return Ok(key.clone());
            }
        }
        if let Some(client) = &self.redis {
            if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
                let raw: Option<String> = redis::cmd("GET")
                    .arg(format!("apikey:{}", hash))
                    .query_async(&mut conn)
                    .await
                    .ok()
                    .flatten();
                if let Some(raw) = raw {
                    if let Ok(record) = serde_json::from_str::<ApiKeyRecord>(&raw) {
                        if record.revoked {
                            return Err(AuthError::Revoked);
                        }
                        if constant_time_eq(&record.key_hash, &hash) {
                            let key = AuthenticatedKey {
                                id: record.id.clone(),
                                name: record.name.clone(),
                                permissions: record
                                    .permissions
                                    .iter()
                                    .filter_map(|p| match p.as_str() {
                                        "verify" => Some(Permission::Verify),
                                        "settle" => Some(Permission::Settle),
                                        "supported" => Some(Permission::Supported),
                                        "read" => Some(Permission::Read),
                                        _ => None,
                                    })
                                    .collect(),
                                custom_rate_limit: record.custom_rate_limit,
                            };
                            self.touch(&hash).await;
                            return Ok(key);
                        }
                    }
                }
            }
        }
        Err(AuthError::Invalid)
    }

    /// Updates `lastUsedAt`/`usageCount` after a successful validation. Failure is
    /// logged but never propagated — bookkeeping must not block the request.
    async fn touch(&self, hash: &str) {
        let Some(client) = &self.redis else { return };
        let Ok(mut conn) = client.get_multiplexed_async_connection().await else {
            return;
        };
        let key = format!("apikey:{}", hash);
        let raw: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .ok()
            .flatten();
        let Some(raw) = raw else { return };
        let Ok(mut record) = serde_json::from_str::<ApiKeyRecord>(&raw) else {
            return;
        };
        record.usage_count += 1;
        record.last_used_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .ok()
            .map(|d| d.as_secs());
        if let Ok(updated) = serde_json::to_string(&record) {
            let result: redis::RedisResult<()> = redis::cmd("SET")
                .arg(&key)
                .arg(updated)
                .query_async(&mut conn)
                .await;
            if let Err(e) = result {
                tracing::warn!("auth: failed to record key usage for {}: {}", hash, e);
            }
        }
    }
}

fn extract_raw_key(parts: &Parts) -> Option<String> {
    if let Some(header) = parts.headers.get("x-api-key") {
        return header.to_str().ok().map(str::to_string);
    }
    if let Some(auth) = parts.headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(value) = auth.to_str() {
            if let Some(token) = value.strip_prefix("Bearer ") {
                return Some(token.to_string());
            }
        }
    }
    parts
        .uri
        .query()
        .and_then(|q| url::form_urlencoded::parse(q.as_bytes()).find(|(k, _)| k == "api_key"))
        .map(|(_, v)| v.into_owned())
}

impl<S> FromRequestParts<S> for AuthenticatedKey
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedKey>()
            .cloned()
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Axum middleware enforcing the auth contract described in the module docs.
///
/// Intended to be installed with `axum::middleware::from_fn_with_state(store, ...)`
/// ahead of the routes it protects. `/health`, `/ready`, and `/metrics` are not
/// routed through this middleware (see `handlers::routes`).
pub async fn auth_middleware(
    axum::extract::State(store): axum::extract::State<Arc<AuthStore>>,
    mut req: Request,
    next: Next,
) -> Response {
    if !store.enabled() {
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();
    let raw_key = extract_raw_key(&parts);
    let key = match raw_key {
        Some(raw_key) => match store.validate(&raw_key).await {
            Ok(key) => key,
            Err(error) => return error.into_response(),
        },
        None => return AuthError::Missing.into_response(),
    };

    let required_permission = Permission::for_path(&path);
    if !key.has_permission(required_permission) {
        return AuthError::Forbidden(required_permission).into_response();
    }

    parts.extensions.insert(key);
    req = Request::from_parts(parts, body);
    next.run(req).await
}

/// Best-effort response header set on every authenticated response, echoing the
/// resolved key's id for observability.
pub fn key_id_header(key: &AuthenticatedKey) -> Option<HeaderValue> {
    HeaderValue::from_str(&key.id).ok()
}
