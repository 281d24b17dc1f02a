//! Upstream proxy endpoints.
//!
//! # Endpoints
//!
//! - `GET /api/bags/{*path}` - Forward a read to the Bags API
//! - `POST /api/bags/{*path}` - Forward a JSON body to the Bags API,
//!   except `token-launch/*`, which only `POST /api/apply` may create
//! - `POST /api/helius/rpc` - Forward an allowlisted JSON-RPC call to Helius
//!
//! Paths are validated segment by segment (no `..`, no encoded slashes),
//! query parameters are sanitized, and credentials are injected by the
//! upstream client. Upstream replies are relayed as the envelope
//! `response`.

use axum::extract::rejection::PathRejection;
use axum::extract::{Path, RawQuery, State};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::envelope::ApiResponse;
use crate::error::{AppError, AppResult};
use crate::extract::{RequestContext, SafeJson, Valid};
use crate::models::HeliusRpcRequest;
use crate::state::AppState;
use crate::upstream::Upstream;
use crate::validation::{validate_proxy_path, validate_query_pairs};

/// Bags path prefix that creates tokens. Writes under it are served only
/// by `/api/apply` (idempotency key, strict schema, URL checks).
const LAUNCH_PREFIX: &str = "token-launch";

fn proxy_path(path: Result<Path<String>, PathRejection>) -> AppResult<String> {
    path.map(|Path(p)| p)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

/// Forward a `GET` to Bags.
#[instrument(skip_all)]
pub async fn bags_get(
    State(state): State<AppState>,
    ctx: RequestContext,
    path: Result<Path<String>, PathRejection>,
    RawQuery(query): RawQuery,
) -> AppResult<ApiResponse<Value>> {
    state.upstream.require(Upstream::Bags)?;
    let path = proxy_path(path)?;
    let segments = validate_proxy_path(&path)?;
    let query = validate_query_pairs(query.as_deref())?;
    debug!(path = %path, params = query.len(), "Proxying Bags GET");

    let reply = state
        .upstream
        .get_json(
            Upstream::Bags,
            &segments,
            &query,
            ctx.upstream_timeout(state.upstream_timeout()),
        )
        .await?;

    Ok(ApiResponse::ok(reply).with_upstream(Upstream::Bags.name()))
}

/// Forward a JSON `POST` to Bags.
///
/// # Errors
///
/// - `501` for `token-launch/*` paths while `LAUNCHPAD_ENABLED` is off
/// - `404` for `token-launch/*` paths otherwise; use `POST /api/apply`
/// - `400` when the body is not a JSON object
#[instrument(skip_all)]
pub async fn bags_post(
    State(state): State<AppState>,
    ctx: RequestContext,
    path: Result<Path<String>, PathRejection>,
    body: Result<SafeJson, AppError>,
) -> AppResult<ApiResponse<Value>> {
    state.upstream.require(Upstream::Bags)?;
    let path = proxy_path(path)?;
    let segments = validate_proxy_path(&path)?;

    if segments.first() == Some(&LAUNCH_PREFIX) {
        if !state.config.launchpad_enabled {
            return Err(AppError::NotImplemented(
                "Token launches are disabled (LAUNCHPAD_ENABLED is not set)".to_string(),
            ));
        }
        warn!(
            client_ip = %ctx.client_ip,
            path = %path,
            "Launch write through generic Bags proxy refused"
        );
        return Err(AppError::NotFound(
            "Token launches are created with POST /api/apply".to_string(),
        ));
    }

    let SafeJson(body) = body?;
    if !body.is_object() {
        return Err(AppError::BadRequest(
            "Request body must be a JSON object".to_string(),
        ));
    }
    debug!(path = %path, "Proxying Bags POST");

    let reply = state
        .upstream
        .post_json(
            Upstream::Bags,
            &segments,
            &body,
            ctx.upstream_timeout(state.upstream_timeout()),
        )
        .await?;

    Ok(ApiResponse::ok(reply).with_upstream(Upstream::Bags.name()))
}

/// Forward a JSON-RPC call to Helius.
///
/// # Request Body
///
/// ```json
/// { "jsonrpc": "2.0", "id": 1, "method": "getAsset", "params": { "id": "<mint>" } }
/// ```
///
/// Only read-only methods are accepted; see `HELIUS_RPC_METHODS`.
#[instrument(skip_all)]
pub async fn helius_rpc(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Valid<HeliusRpcRequest>, AppError>,
) -> AppResult<ApiResponse<Value>> {
    state.upstream.require(Upstream::Helius)?;
    let Valid(request) = body?;
    debug!(method = request.method, "Proxying Helius RPC");

    let reply = state
        .upstream
        .post_json(
            Upstream::Helius,
            &[],
            &request.to_upstream_body(),
            ctx.upstream_timeout(state.upstream_timeout()),
        )
        .await?;

    Ok(ApiResponse::ok(reply).with_upstream(Upstream::Helius.name()))
}
