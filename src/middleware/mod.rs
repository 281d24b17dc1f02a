//! HTTP middleware for request hardening and observability.
//!
//! - **Security headers / CORS**: fixed header set, origin allowlist, `204`
//!   preflight
//! - **Request ID**: generation, validation and propagation
//! - **API key authentication**: optional, constant-time comparison
//! - **Rate limiting**: fixed window per client IP per route
//! - **Request timeout**: client deadline for upstream calls
//!
//! # Architecture
//!
//! ```text
//! Request → Security headers → Trace → Request ID → Auth → Rate limit → Timeout → Handler
//!               ↓                            ↓         ↓         ↓
//!          204 preflight               X-Request-Id   401      429 + Retry-After
//! ```
//!
//! Rejections from inner layers are rendered as envelopes inside the
//! request-ID scope and still pass back through the security-header layer.

pub mod auth;
pub mod ip;
pub mod rate_limit;
pub mod request_id;
pub mod security_headers;
pub mod timeout;

pub use auth::{ApiKeyAuth, AuthFailureLimiter, auth_failure_limiter};
pub use ip::{ClientIp, TrustedProxyConfig, UNKNOWN_IP, client_ip, resolve_client_ip};
pub use rate_limit::RateLimitLayer;
pub use request_id::{REQUEST_ID_HEADER, RequestIdLayer};
pub use security_headers::{CorsPolicy, SecurityHeadersLayer};
pub use timeout::{
    MAX_REQUEST_TIMEOUT_MS, MIN_REQUEST_TIMEOUT_MS, REQUEST_TIMEOUT_HEADER, RequestTimeout,
    effective_timeout, extract_request_timeout,
};
