//! Swap endpoint.
//!
//! `POST /api/swap` asks Jupiter for a quote, then for a prepared swap
//! transaction for that quote, and relays both. Nothing is built or signed
//! server-side. Both calls share one deadline.

use std::time::Instant;

use axum::extract::State;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::envelope::ApiResponse;
use crate::error::{AppError, AppResult};
use crate::extract::{RequestContext, Valid};
use crate::models::{SwapRequest, SwapResponse};
use crate::state::AppState;
use crate::upstream::Upstream;

/// Request a prepared swap.
///
/// # Request Body
///
/// ```json
/// {
///   "inputMint": "So11111111111111111111111111111111111111112",
///   "outputMint": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
///   "amount": "1000000000",
///   "slippageBps": 50,
///   "userPublicKey": "<wallet>"
/// }
/// ```
///
/// # Errors
///
/// - `501` when `BETA_TRADING_ENABLED` is off or `JUPITER_API_KEY` is not set
/// - `502` when Jupiter fails or returns no transaction
#[instrument(skip_all)]
pub async fn swap(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Valid<SwapRequest>, AppError>,
) -> AppResult<ApiResponse<SwapResponse>> {
    if !state.config.beta_trading_enabled {
        return Err(AppError::NotImplemented(
            "Trading is in closed beta (BETA_TRADING_ENABLED is not set)".to_string(),
        ));
    }
    state.upstream.require(Upstream::Jupiter)?;
    let Valid(request) = body?;

    let timeout = ctx.upstream_timeout(state.upstream_timeout());
    let started = Instant::now();

    let quote = state
        .upstream
        .get_json(Upstream::Jupiter, &["quote"], &request.quote_query(), timeout)
        .await?;

    let remaining = timeout.saturating_sub(started.elapsed());
    if remaining.is_zero() {
        return Err(AppError::UpstreamTimeout {
            upstream: Upstream::Jupiter.name(),
        });
    }
    debug!(remaining_ms = %remaining.as_millis(), "Quote received, requesting swap");

    let reply = state
        .upstream
        .post_json(
            Upstream::Jupiter,
            &["swap"],
            &request.swap_body(&quote),
            remaining,
        )
        .await?;

    let swap_transaction = reply
        .get("swapTransaction")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Upstream {
            upstream: Upstream::Jupiter.name(),
            message: "Swap response missing swapTransaction".to_string(),
        })?
        .to_string();

    Ok(ApiResponse::ok(SwapResponse {
        quote,
        swap_transaction,
        last_valid_block_height: reply.get("lastValidBlockHeight").and_then(Value::as_u64),
    })
    .with_upstream(Upstream::Jupiter.name()))
}
