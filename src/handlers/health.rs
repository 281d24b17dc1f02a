//! Health endpoint.
//!
//! `GET /health` is never rate limited or authenticated. It reports which
//! upstreams are configured and which features are on, without revealing
//! any credential.

use axum::extract::State;
use tracing::instrument;

use crate::envelope::ApiResponse;
use crate::models::{FeatureFlags, HealthResponse, RateLimitStatus, UpstreamStatus};
use crate::state::AppState;
use crate::upstream::Upstream;

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "success": true,
///   "response": {
///     "status": "healthy",
///     "version": "0.1.0",
///     "environment": "development",
///     "uptimeSeconds": 42,
///     "upstreams": { "bags": true, "helius": true, "jupiter": false },
///     "features": { "launchpad": false, "betaTrading": false },
///     "rateLimit": { "enabled": true, "max": 10, "windowMs": 60000, "entries": 3 }
///   },
///   "meta": { "requestId": "...", "timestamp": "..." }
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> ApiResponse<HealthResponse> {
    let config = &state.config;
    let upstream = &state.upstream;

    ApiResponse::ok(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        environment: config.app_env.clone(),
        uptime_seconds: state.uptime_seconds(),
        upstreams: UpstreamStatus {
            bags: upstream.is_configured(Upstream::Bags),
            helius: upstream.is_configured(Upstream::Helius),
            jupiter: upstream.is_configured(Upstream::Jupiter),
        },
        features: FeatureFlags {
            launchpad: config.launchpad_enabled,
            beta_trading: config.beta_trading_enabled,
        },
        rate_limit: RateLimitStatus {
            enabled: state.limiter.is_some(),
            max: config.rate_limit_max,
            window_ms: u64::try_from(config.rate_limit_window.as_millis()).unwrap_or(u64::MAX),
            entries: state.limiter.as_ref().map_or(0, |l| l.len()),
        },
    })
}
