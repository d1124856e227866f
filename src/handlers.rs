//! HTTP endpoints exposed by the t402 facilitator.
//!
//! Covers the protocol-critical endpoints (`/verify`, `/settle`, `/supported`) plus
//! the operational surface (`/health`, `/ready`, `/metrics`). Status codes on the
//! protocol endpoints follow a payment-vs-infrastructure distinction: a payment that
//! fails verification is not a server error, so `/verify` always answers `200` with
//! `isValid: false`, and `/settle` answers `422` with `success: false` for a
//! payment-level settlement failure. `500` is reserved for the facilitator's own
//! faults (store/RPC unavailable), not for a counterparty's bad payment.
//!
//! A request that never reached a scheme handler at all — unknown `t402Version`,
//! scheme, or network, i.e. a dispatch miss (`UnsupportedKind`) — is not a payment
//! outcome either way, and answers `400` from both endpoints instead of the
//! `200`/`422` above.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use crate::auth::AuthStore;
use crate::cache::{Cache, CacheKind, Fingerprint};
use crate::facilitator::Facilitator;
use crate::facilitator_local::{FacilitatorLocal, FacilitatorLocalError};
use crate::metrics::METRICS;
use crate::proto;
use crate::proto::AsPaymentProblem;
use crate::ratelimit::RateLimiter;

/// Shared state threaded through every route.
#[derive(Clone)]
pub struct AppState {
    pub facilitator: Arc<FacilitatorLocal>,
    pub cache: Arc<Cache>,
    pub auth: Arc<AuthStore>,
    pub rate_limiter: Arc<RateLimiter>,
}

/// Routes that go through rate limiting and authentication: everything that
/// touches payment verification, settlement, or chain/signer discovery.
pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_root))
        .route("/verify", get(get_verify_info))
        .route("/verify", post(post_verify))
        .route("/settle", get(get_settle_info))
        .route("/settle", post(post_settle))
        .route("/supported", get(get_supported))
}

/// Routes exempt from rate limiting and authentication: liveness, readiness,
/// and the metrics scrape endpoint.
pub fn operational_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(get_health))
        .route("/ready", get(get_ready))
        .route("/metrics", get(get_metrics))
}

/// `GET /`: greeting, mirrors the teacher's root handler.
#[instrument(skip_all)]
pub async fn get_root() -> impl IntoResponse {
    let pkg_name = env!("CARGO_PKG_NAME");
    (StatusCode::OK, format!("Hello from {pkg_name}!"))
}

/// `GET /verify`: machine-readable description of the `/verify` endpoint.
#[instrument(skip_all)]
pub async fn get_verify_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/verify",
        "description": "POST to verify a t402 payment payload against its requirements",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /settle`: machine-readable description of the `/settle` endpoint.
#[instrument(skip_all)]
pub async fn get_settle_info() -> impl IntoResponse {
    Json(json!({
        "endpoint": "/settle",
        "description": "POST to settle a previously verified t402 payment on-chain",
        "body": {
            "paymentPayload": "PaymentPayload",
            "paymentRequirements": "PaymentRequirements",
        }
    }))
}

/// `GET /supported`: payment kinds and signer addresses this facilitator supports.
#[instrument(skip_all)]
pub async fn get_supported(State(state): State<AppState>) -> impl IntoResponse {
    match state.facilitator.supported().await {
        Ok(supported) => (StatusCode::OK, Json(json!(supported))).into_response(),
        Err(error) => {
            tracing::error!(error = ?error, "supported() failed unexpectedly");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET /health`: liveness probe. Never touches chains or Redis — only confirms the
/// process is up and able to handle requests.
#[instrument(skip_all)]
pub async fn get_health() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// `GET /ready`: readiness probe. Exercises the scheme registry, which in turn
/// confirms every configured chain provider was constructed successfully.
#[instrument(skip_all)]
pub async fn get_ready(State(state): State<AppState>) -> impl IntoResponse {
    match state.facilitator.supported().await {
        Ok(_) => (StatusCode::OK, Json(json!({"status": "ready"}))).into_response(),
        Err(error) => {
            tracing::warn!(error = ?error, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "not_ready"})),
            )
                .into_response()
        }
    }
}

/// `GET /metrics`: Prometheus text-format exposition.
#[instrument(skip_all)]
pub async fn get_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        METRICS.render(),
    )
}

/// A cached failure outcome: the HTTP status and body to replay verbatim on a
/// cache hit, computed once and reused for the kind's TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedFailure {
    status: u16,
    body: serde_json::Value,
}

fn payment_fingerprint(value: &serde_json::Value) -> Fingerprint {
    let scoped = json!({
        "paymentPayload": value.get("paymentPayload").cloned().unwrap_or(serde_json::Value::Null),
        "paymentRequirements": value.get("paymentRequirements").cloned().unwrap_or(serde_json::Value::Null),
    });
    Fingerprint::of(&scoped)
}

fn scheme_chain_labels(request: &proto::VerifyRequest) -> (String, String) {
    match request.scheme_handler_slug() {
        Some(slug) => (slug.name.clone(), slug.chain_id.to_string()),
        None => ("unknown".to_string(), "unknown".to_string()),
    }
}

fn inner_scheme_error(error: &FacilitatorLocalError) -> &crate::scheme::T402SchemeFacilitatorError {
    match error {
        FacilitatorLocalError::UnsupportedKind(e) => e,
        FacilitatorLocalError::Verification(e) => e,
        FacilitatorLocalError::Settlement(e) => e,
    }
}

/// `POST /verify`: always answers `200`. A payment that fails verification is
/// reported as `{"isValid": false, ...}`, not as an HTTP error — only a
/// facilitator-side fault (never currently produced by [`Facilitator::verify`])
/// would escape this as a `5xx`.
#[instrument(skip_all)]
pub async fn post_verify(
    State(state): State<AppState>,
    Json(body): Json<proto::VerifyRequest>,
) -> impl IntoResponse {
    let (scheme, chain) = scheme_chain_labels(&body);
    let fingerprint = payment_fingerprint(&body.clone().into_json());
    let facilitator = state.facilitator.clone();
    let request = body.clone();

    let result = state
        .cache
        .get_or_compute(fingerprint, CacheKind::Verify, || async move {
            match facilitator.verify(&request).await {
                Ok(response) => Ok(response.0),
                Err(FacilitatorLocalError::UnsupportedKind(e)) => {
                    let problem = e.as_payment_problem();
                    tracing::warn!(error = ?e, "dispatch failed: no scheme handler matched");
                    Err(CachedFailure {
                        status: StatusCode::BAD_REQUEST.as_u16(),
                        body: json!({
                            "errorReason": problem.reason(),
                            "errorReasonDetails": problem.details(),
                        }),
                    })
                }
                Err(error) => {
                    let problem = inner_scheme_error(&error).as_payment_problem();
                    tracing::warn!(error = ?error, "verification failed");
                    Err(CachedFailure {
                        status: StatusCode::OK.as_u16(),
                        body: json!({
                            "isValid": false,
                            "invalidReason": problem.reason(),
                            "invalidReasonDetails": problem.details(),
                        }),
                    })
                }
            }
        })
        .await;

    match result {
        Ok(value) => {
            METRICS.record_verify(&scheme, &chain, "valid");
            (StatusCode::OK, Json(value)).into_response()
        }
        Err(failure) => {
            METRICS.record_verify(&scheme, &chain, "invalid");
            let status = StatusCode::from_u16(failure.status).unwrap_or(StatusCode::OK);
            (status, Json(failure.body)).into_response()
        }
    }
}

/// `POST /settle`: answers `422` with `{"success": false, ...}` for a payment-level
/// settlement failure (simulation revert, on-chain revert, timeout). A facilitator
/// fault (RPC/store unavailable) would instead be a `5xx`, but the current scheme
/// error taxonomy does not yet distinguish the two at this layer — see `DESIGN.md`.
#[instrument(skip_all)]
pub async fn post_settle(
    State(state): State<AppState>,
    Json(body): Json<proto::SettleRequest>,
) -> impl IntoResponse {
    let (scheme, chain) = scheme_chain_labels(&body);
    let fingerprint = payment_fingerprint(&body.clone().into_json());
    let facilitator = state.facilitator.clone();
    let request = body.clone();

    let result = state
        .cache
        .get_or_compute(fingerprint, CacheKind::Settle, || async move {
            match facilitator.settle(&request).await {
                Ok(response) => Ok(response.0),
                Err(FacilitatorLocalError::UnsupportedKind(e)) => {
                    let problem = e.as_payment_problem();
                    tracing::warn!(error = ?e, "dispatch failed: no scheme handler matched");
                    Err(CachedFailure {
                        status: StatusCode::BAD_REQUEST.as_u16(),
                        body: json!({
                            "errorReason": problem.reason(),
                            "errorReasonDetails": problem.details(),
                        }),
                    })
                }
                Err(error) => {
                    let problem = inner_scheme_error(&error).as_payment_problem();
                    tracing::warn!(error = ?error, "settlement failed");
                    Err(CachedFailure {
                        status: StatusCode::UNPROCESSABLE_ENTITY.as_u16(),
                        body: json!({
                            "success": false,
                            "errorReason": problem.reason(),
                            "errorReasonDetails": problem.details(),
                        }),
                    })
                }
            }
        })
        .await;

    match result {
        Ok(value) => {
            METRICS.record_settle(&scheme, &chain, "success");
            (StatusCode::OK, Json(value)).into_response()
        }
        Err(failure) => {
            METRICS.record_settle(&scheme, &chain, "failure");
            let status =
                StatusCode::from_u16(failure.status).unwrap_or(StatusCode::UNPROCESSABLE_ENTITY);
            (status, Json(failure.body)).into_response()
        }
    }
}

/// Fallback conversion kept for completeness; the handlers above never route a
/// [`FacilitatorLocalError`] through `IntoResponse` directly since they render it
/// with the status correction described in the module docs. Exists so the error
/// type remains usable from `?`-propagating call sites outside HTTP handling.
impl IntoResponse for FacilitatorLocalError {
    fn into_response(self) -> Response {
        let problem = inner_scheme_error(&self).as_payment_problem();
        let status = match &self {
            FacilitatorLocalError::UnsupportedKind(_) => StatusCode::BAD_REQUEST,
            FacilitatorLocalError::Verification(_) => StatusCode::OK,
            FacilitatorLocalError::Settlement(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        (
            status,
            Json(json!({
                "errorReason": problem.reason(),
                "errorReasonDetails": problem.details(),
            })),
        )
            .into_response()
    }
}
