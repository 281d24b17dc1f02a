//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │ Security headers │ ← CORS, no-store, nosniff...; OPTIONS → 204
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← X-Request-Id, envelope meta.requestId
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Metrics      │ ← request count and duration per route
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Authentication  │ ← 401 if invalid (only when API_KEY is set)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 + Retry-After (/api/* only)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Request timeout  │ ← X-Request-Timeout → extension (/api/* only)
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/health` - Liveness (never limited, never authenticated)
//! - `/api/scan`, `/api/simulate`, `/api/apply` - Local compute and launch
//! - `/api/bags/{*path}`, `/api/helius/rpc`, `/api/swap` - Upstream relays

use std::time::Instant;

use axum::Router;
use axum::extract::{DefaultBodyLimit, MatchedPath, Request};
use axum::middleware::{self as axum_middleware, Next};
use axum::response::Response;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span};

use crate::handlers;
use crate::metrics;
use crate::middleware::{
    ApiKeyAuth, CorsPolicy, RateLimitLayer, RequestIdLayer, SecurityHeadersLayer,
    extract_request_timeout,
};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// Middleware is configured from `state.config`:
///
/// - **Rate Limiting**: enabled if `RATE_LIMIT_MAX > 0`
/// - **Authentication**: enabled if `API_KEY` is set
/// - **CORS**: from `CORS_ALLOWED_ORIGINS`
/// - **HSTS**: production only
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;
    let trusted_proxies = state.trusted_proxies.as_ref().clone();

    // =========================================================================
    // API routes (rate limited, client deadline honored)
    // =========================================================================
    let mut api = Router::new()
        .route("/api/scan", post(handlers::scan_token))
        .route("/api/simulate", post(handlers::simulate_launch))
        .route("/api/apply", post(handlers::apply_launch))
        .route(
            "/api/bags/{*path}",
            get(handlers::bags_get).post(handlers::bags_post),
        )
        .route("/api/helius/rpc", post(handlers::helius_rpc))
        .route("/api/swap", post(handlers::swap))
        .layer(axum_middleware::from_fn(extract_request_timeout));

    if let Some(limiter) = &state.limiter {
        info!(
            max = config.rate_limit_max,
            window_ms = %config.rate_limit_window.as_millis(),
            trusted_proxies = config.trusted_proxies.len(),
            "Rate limiting enabled"
        );
        api = api.layer(RateLimitLayer::new(limiter.clone(), trusted_proxies.clone()));
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_MAX=0)");
    }

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .merge(api)
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::method_not_allowed);

    // =========================================================================
    // Apply Middleware Stack (each layer wraps everything added before it)
    // =========================================================================

    // 1. Body size cap for extractors; safe JSON applies the same limit
    router = router.layer(DefaultBodyLimit::max(config.max_json_size));

    // 2. Authentication (if enabled)
    let auth_layer = ApiKeyAuth::new(
        config.api_key.clone(),
        trusted_proxies,
        state.auth_failures.clone(),
    );
    if auth_layer.is_enabled() {
        info!("API key authentication enabled");
        router = router.layer(auth_layer);
    } else {
        info!("API key authentication disabled (no API_KEY set)");
    }

    // 3. Metrics
    router = router.layer(axum_middleware::from_fn(record_request_metrics));

    // 4. Request ID
    router = router.layer(RequestIdLayer::new());

    // 5. Tracing
    router = router.layer(
        TraceLayer::new_for_http().make_span_with(|req: &Request| {
            info_span!(
                "http",
                method = %req.method(),
                uri = %req.uri().path(),
                request_id = tracing::field::Empty,
            )
        }),
    );

    // 6. CORS and security headers (outermost, so rejections carry them)
    let cors = CorsPolicy::from_origins(&config.cors_allowed_origins);
    if config.is_production() && matches!(cors, CorsPolicy::AnyOrigin) {
        tracing::warn!("CORS_ALLOWED_ORIGINS is '*' in production");
    }
    router = router.layer(SecurityHeadersLayer::new(cors, config.is_production()));

    router.with_state(state)
}

/// Count requests and record their duration per matched route.
async fn record_request_metrics(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or("unmatched", MatchedPath::as_str)
        .to_string();
    let method = request.method().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    metrics::record_http_request(&route, &method, status);
    metrics::record_request_duration(&route, &method, status, started.elapsed().as_secs_f64());

    response
}
