//! Token scan endpoint.
//!
//! `POST /api/scan` looks a mint up through Helius `getAsset` (DAS API) and
//! relays the asset. Risk scoring happens in the UI.

use axum::extract::State;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::envelope::ApiResponse;
use crate::error::{AppError, AppResult};
use crate::extract::{RequestContext, Valid};
use crate::models::{ScanRequest, ScanResponse};
use crate::state::AppState;
use crate::upstream::Upstream;

/// Scan a token mint.
///
/// # Request Body
///
/// ```json
/// { "mint": "So11111111111111111111111111111111111111112" }
/// ```
///
/// # Errors
///
/// - `501` when `HELIUS_API_KEY` is not set
/// - `404` when Helius does not know the asset
/// - `502` on upstream failure
#[instrument(skip_all)]
pub async fn scan_token(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Valid<ScanRequest>, AppError>,
) -> AppResult<ApiResponse<ScanResponse>> {
    state.upstream.require(Upstream::Helius)?;
    let Valid(request) = body?;
    debug!(mint = %request.mint, "Scanning token");

    let call = json!({
        "jsonrpc": "2.0",
        "id": ctx.request_id,
        "method": "getAsset",
        "params": { "id": request.mint },
    });
    let reply = state
        .upstream
        .post_json(
            Upstream::Helius,
            &[],
            &call,
            ctx.upstream_timeout(state.upstream_timeout()),
        )
        .await?;

    Ok(ApiResponse::ok(ScanResponse {
        asset: rpc_result(reply)?,
        mint: request.mint,
    })
    .with_upstream(Upstream::Helius.name()))
}

/// Unwrap a JSON-RPC reply into its `result`.
fn rpc_result(mut reply: Value) -> AppResult<Value> {
    if let Some(error) = reply.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        if message.to_ascii_lowercase().contains("not found") {
            return Err(AppError::NotFound("Asset not found".to_string()));
        }
        return Err(AppError::Upstream {
            upstream: Upstream::Helius.name(),
            message: format!("RPC error: {message}"),
        });
    }

    match reply.as_object_mut().and_then(|o| o.remove("result")) {
        Some(Value::Null) | None => Err(AppError::NotFound("Asset not found".to_string())),
        Some(result) => Ok(result),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_result_null_error_is_success() {
        let asset = rpc_result(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": null,
            "result": {"id": "abc"},
        }))
        .unwrap();
        assert_eq!(asset["id"], "abc");
    }

    #[test]
    fn test_rpc_result_success() {
        let asset = rpc_result(json!({"jsonrpc": "2.0", "id": 1, "result": {"id": "abc"}})).unwrap();
        assert_eq!(asset["id"], "abc");
    }

    #[test]
    fn test_rpc_result_not_found() {
        let err = rpc_result(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "Asset Not Found"}
        }))
        .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");

        let err = rpc_result(json!({"jsonrpc": "2.0", "id": 1, "result": null})).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn test_rpc_result_error() {
        let err = rpc_result(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32603, "message": "Internal error"}
        }))
        .unwrap_err();
        assert_eq!(err.code(), "UPSTREAM_ERROR");
    }
}
