//! Token launch endpoints.
//!
//! # Endpoints
//!
//! - `POST /api/simulate` - Validate a draft and estimate launch cost locally
//! - `POST /api/apply` - Submit the token info to Bags (idempotent)
//!
//! # Idempotency
//!
//! `/api/apply` requires an `Idempotency-Key` header. The key is claimed
//! only after the body validates, so a client can fix a rejected payload
//! and retry with the same key. Once claimed, the key stays claimed for
//! `IDEMPOTENCY_WINDOW_SECS` even if the upstream call fails; a replay gets
//! `409 IDEMPOTENCY_CONFLICT` with `Retry-After`.

use axum::extract::State;
use axum::http::HeaderMap;
use tracing::{info, instrument, warn};

use crate::envelope::ApiResponse;
use crate::error::{AppError, AppResult};
use crate::extract::{RequestContext, Valid};
use crate::metrics;
use crate::models::{ApplyRequest, ApplyResponse, LaunchCostSummary, TokenDraft};
use crate::state::AppState;
use crate::upstream::Upstream;
use crate::validation::validate_idempotency_key;

/// Header carrying the caller's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Route label for idempotency claims.
const APPLY_ROUTE: &str = "/api/apply";

/// Bags endpoint creating token metadata.
const CREATE_TOKEN_INFO: [&str; 2] = ["token-launch", "create-token-info"];

/// Estimate what launching `draft` costs. No upstream call.
///
/// # Request Body
///
/// ```json
/// {
///   "name": "Moon Cat",
///   "symbol": "MCAT",
///   "description": "optional",
///   "imageUrl": "https://...",
///   "website": "https://...",
///   "twitter": "handle",
///   "telegram": "handle",
///   "initialBuySol": "0.5"
/// }
/// ```
#[instrument(skip_all)]
pub async fn simulate_launch(
    Valid(draft): Valid<TokenDraft>,
) -> AppResult<ApiResponse<LaunchCostSummary>> {
    Ok(ApiResponse::ok(LaunchCostSummary::for_draft(draft)?))
}

/// Submit a token launch.
///
/// Same body as `/api/simulate` plus `creatorWallet`.
///
/// # Errors
///
/// - `501` when `LAUNCHPAD_ENABLED` is off or `BAGS_API_KEY` is not set
/// - `400` when `Idempotency-Key` is missing or malformed
/// - `409` when the key was already used
#[instrument(skip_all)]
pub async fn apply_launch(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
    body: Result<Valid<ApplyRequest>, AppError>,
) -> AppResult<ApiResponse<ApplyResponse>> {
    if !state.config.launchpad_enabled {
        return Err(AppError::NotImplemented(
            "Token launches are disabled (LAUNCHPAD_ENABLED is not set)".to_string(),
        ));
    }
    state.upstream.require(Upstream::Bags)?;

    let raw_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .ok_or_else(|| AppError::BadRequest("Idempotency-Key header is required".to_string()))?
        .to_str()
        .map_err(|_| AppError::BadRequest("Idempotency-Key must be ASCII".to_string()))?;
    let key = validate_idempotency_key(raw_key)?;

    let Valid(request) = body?;

    if let Err(conflict) = state.idempotency.claim(&key, APPLY_ROUTE) {
        warn!(client_ip = %ctx.client_ip, "Idempotency key replayed");
        metrics::record_idempotency_conflict();
        return Err(AppError::IdempotencyConflict {
            retry_after_secs: conflict.retry_after_secs(),
        });
    }

    let token_info = state
        .upstream
        .post_json(
            Upstream::Bags,
            &CREATE_TOKEN_INFO,
            &request.to_upstream_body(),
            ctx.upstream_timeout(state.upstream_timeout()),
        )
        .await?;

    info!(
        symbol = %request.draft.symbol,
        creator = %request.creator_wallet,
        "Token info submitted"
    );

    Ok(ApiResponse::created(ApplyResponse {
        idempotency_key: key,
        token_info,
    })
    .with_upstream(Upstream::Bags.name()))
}
