mod requests;
mod responses;

pub use requests::{
    ApplyRequest, DEFAULT_SLIPPAGE_BPS, HELIUS_RPC_METHODS, HeliusRpcRequest, MAX_INITIAL_BUY_SOL,
    ScanRequest, SwapRequest, TokenDraft,
};
pub use responses::{
    ApplyResponse, FeatureFlags, HealthResponse, LAMPORTS_PER_SOL, LaunchCostSummary,
    RateLimitStatus, ScanResponse, SwapResponse, UpstreamStatus,
};
