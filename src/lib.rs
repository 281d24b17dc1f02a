//! # Tokenscan API
//!
//! Hardened request layer for a Solana token-risk scanner. Sits between the
//! browser and the Bags, Helius and Jupiter APIs, featuring:
//!
//! - **Safe input**: size and depth limited JSON, typed schema validation
//! - **Abuse control**: fixed-window rate limiting, idempotent launches
//! - **Upstream hygiene**: SSRF-checked bases, per-upstream quotas, deadlines
//! - **Observability**: request IDs, structured logging, Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Headers → Trace → Request ID → Auth → Limit)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Extractors (SafeJson, Valid<T>, RequestContext)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, scan, launch, proxy, swap)               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  UpstreamClient (quota, timeout, redaction)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Bags / Helius / Jupiter                                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tokenscan_api::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config)?;
//!     let app = build_router(state);
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Security Configuration
//!
//! Require an API key on every route except `/health`:
//! ```bash
//! API_KEY=your-secret-key cargo run
//! ```
//!
//! Tighten rate limiting:
//! ```bash
//! RATE_LIMIT_MAX=5 RATE_LIMIT_WINDOW_MS=60000 cargo run
//! ```

pub mod config;
pub mod envelope;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod net;
pub mod rate_limiter;
pub mod redact;
pub mod routes;
pub mod safe_json;
pub mod sanitize;
pub mod ssrf;
pub mod state;
pub mod upstream;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use state::AppState;
