use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use serde_json::Value;

use super::TokenDraft;
use crate::error::{AppError, AppResult};

/// Lamports in one SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Base fee per transaction signature, in lamports.
pub const SIGNATURE_FEE_LAMPORTS: u64 = 5_000;

/// Signatures in a launch (token creation + initial buy).
pub const LAUNCH_SIGNATURES: u64 = 2;

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub environment: String,
    pub uptime_seconds: u64,
    pub upstreams: UpstreamStatus,
    pub features: FeatureFlags,
    pub rate_limit: RateLimitStatus,
}

/// Which upstream credentials are configured.
#[derive(Debug, Serialize)]
pub struct UpstreamStatus {
    pub bags: bool,
    pub helius: bool,
    pub jupiter: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    pub launchpad: bool,
    pub beta_trading: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub enabled: bool,
    pub max: u32,
    pub window_ms: u64,
    /// Live limiter entries
    pub entries: usize,
}

/// Asset lookup result relayed from Helius.
#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub mint: String,
    pub asset: Value,
}

/// Local estimate of what a launch costs the creator.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchCostSummary {
    pub token: TokenDraft,
    pub network_fee_lamports: u64,
    pub initial_buy_lamports: u64,
    pub total_lamports: u64,
    pub total_sol: Decimal,
    /// Non-blocking hints for the wizard
    pub warnings: Vec<&'static str>,
}

impl LaunchCostSummary {
    /// Compute the summary for a validated draft.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the lamport amount does not fit in
    /// a `u64` (not reachable for drafts within the validated bounds).
    pub fn for_draft(token: TokenDraft) -> AppResult<Self> {
        let initial_buy_lamports = (token.initial_buy_sol * Decimal::from(LAMPORTS_PER_SOL))
            .trunc()
            .to_u64()
            .ok_or_else(|| AppError::Internal("Initial buy out of lamport range".to_string()))?;

        let network_fee_lamports = SIGNATURE_FEE_LAMPORTS * LAUNCH_SIGNATURES;
        let total_lamports = network_fee_lamports
            .checked_add(initial_buy_lamports)
            .ok_or_else(|| AppError::Internal("Launch cost overflow".to_string()))?;
        let total_sol = (Decimal::from(total_lamports) / Decimal::from(LAMPORTS_PER_SOL)).normalize();

        let mut warnings = Vec::new();
        if token.image_url.is_none() {
            warnings.push("No image provided; wallets will show a placeholder");
        }
        if token.description.is_none() {
            warnings.push("No description provided");
        }
        if !token.has_socials() {
            warnings.push("No website or social links provided");
        }
        if token.initial_buy_sol.is_zero() {
            warnings.push("No initial buy; the creator starts with zero supply");
        }

        Ok(Self {
            token,
            network_fee_lamports,
            initial_buy_lamports,
            total_lamports,
            total_sol,
            warnings,
        })
    }
}

/// Launch submission result.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyResponse {
    pub idempotency_key: String,
    /// Token info as returned by Bags
    pub token_info: Value,
}

/// Prepared swap relayed from Jupiter. The client signs `swap_transaction`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResponse {
    pub quote: Value,
    /// Base64-encoded versioned transaction
    pub swap_transaction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_valid_block_height: Option<u64>,
}
