//! t402 Facilitator HTTP entrypoint.
//!
//! This binary launches an Axum-based HTTP server that exposes the t402 protocol interface
//! for payment verification and settlement across EVM, Solana, TON, and TRON.
//!
//! Endpoints:
//! - `GET /verify` - Supported verification schema
//! - `POST /verify` - Verify a payment payload against requirements
//! - `GET /settle` - Supported settlement schema
//! - `POST /settle` - Settle an accepted payment payload on-chain
//! - `GET /supported` - List supported payment kinds (version/scheme/network)
//! - `GET /health`, `/ready`, `/metrics` - operational surface
//!
//! This server includes:
//! - OpenTelemetry tracing via `TraceLayer`, plus a per-request `X-Request-ID`
//! - CORS support for cross-origin clients
//! - Redis-backed (fail-open) rate limiting and verify/settle caching
//! - API-key authentication
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control binding address
//! - `OTEL_*` variables enable tracing to systems like Honeycomb

mod auth;
mod cache;
mod chain;
mod config;
mod facilitator;
mod facilitator_local;
mod handlers;
mod metrics;
mod networks;
mod proto;
mod ratelimit;
mod scheme;
mod timestamp;
mod trace_id;
mod util;

use axum::Router;
use axum::http::Method;
use axum::middleware;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;

use crate::auth::AuthStore;
use crate::cache::{Cache, InMemoryCacheStore, RedisCacheStore};
use crate::chain::ChainRegistry;
use crate::config::Config;
use crate::facilitator_local::FacilitatorLocal;
use crate::ratelimit::{InMemoryRateLimitStore, RateLimitLayer, RateLimiter, RedisRateLimitStore};
use crate::scheme::{SchemeBlueprints, SchemeRegistry};
use crate::trace_id::TraceIdLayer;
use crate::util::{SigDown, Telemetry};

/// Initializes the t402 facilitator server.
///
/// - Loads `.env` variables.
/// - Initializes OpenTelemetry tracing.
/// - Connects to chain providers for supported networks.
/// - Starts an Axum HTTP server with the t402 protocol handlers.
///
/// Binds to the address specified by the `HOST` and `PORT` env vars.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env variables
    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    let config = Config::load()?;
    let app_config = config.app().clone();

    let chain_registry = ChainRegistry::from_config(config.chains()).await?;
    let scheme_blueprints = SchemeBlueprints::full();
    let scheme_registry =
        SchemeRegistry::build(chain_registry, scheme_blueprints, config.schemes());

    let facilitator = Arc::new(FacilitatorLocal::new(scheme_registry));

    let cache = match &app_config.redis_url {
        Some(url) => match RedisCacheStore::new(url) {
            Ok(store) => Cache::new(Arc::new(store)),
            Err(e) => {
                tracing::warn!("redis unavailable for cache ({}), using in-memory store", e);
                Cache::new(Arc::new(InMemoryCacheStore::new()))
            }
        },
        None => Cache::new(Arc::new(InMemoryCacheStore::new())),
    };

    let rate_limiter = match &app_config.redis_url {
        Some(url) => match RedisRateLimitStore::new(url) {
            Ok(store) => RateLimiter::new(
                Arc::new(store),
                app_config.rate_limit_requests,
                app_config.rate_limit_window,
            ),
            Err(e) => {
                tracing::warn!(
                    "redis unavailable for rate limiting ({}), using in-memory store",
                    e
                );
                RateLimiter::new(
                    Arc::new(InMemoryRateLimitStore::new()),
                    app_config.rate_limit_requests,
                    app_config.rate_limit_window,
                )
            }
        },
        None => RateLimiter::new(
            Arc::new(InMemoryRateLimitStore::new()),
            app_config.rate_limit_requests,
            app_config.rate_limit_window,
        ),
    };

    let auth_store = Arc::new(AuthStore::new(
        &app_config.api_keys,
        app_config.redis_url.as_deref(),
        app_config.api_key_required,
    ));

    let axum_state = handlers::AppState {
        facilitator,
        cache: Arc::new(cache),
        auth: auth_store.clone(),
        rate_limiter: Arc::new(rate_limiter),
    };

    let rate_limit_layer = RateLimitLayer::new(axum_state.rate_limiter.clone());

    let protected = handlers::protected_routes()
        .layer(rate_limit_layer)
        .layer(middleware::from_fn_with_state(
            auth_store,
            auth::auth_middleware,
        ));

    let http_endpoints = Router::new()
        .merge(protected)
        .merge(handlers::operational_routes())
        .with_state(axum_state)
        .layer(middleware::from_fn(metrics::track_http_metrics))
        .layer(TraceIdLayer)
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    let sig_down = SigDown::try_new()?;
    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    Ok(())
}
