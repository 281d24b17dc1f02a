//! Per-IP, per-route rate limiting middleware.
//!
//! # Algorithm
//!
//! Fixed window via [`FixedWindowLimiter`], keyed `ip:<client ip>:<route>`
//! where `<route>` is the matched route template (`/api/bags/{*path}`),
//! not the raw path, so path parameters cannot be used to fan out keys.
//!
//! # Response Headers
//!
//! Allowed responses carry:
//! - `X-RateLimit-Limit`: configured requests per window
//! - `X-RateLimit-Remaining`: requests left in the current window
//!
//! On rate limit exceeded (429, `RATE_LIMIT_EXCEEDED` envelope):
//! - `Retry-After`: seconds until the window resets
//! - `X-RateLimit-Limit`, `X-RateLimit-Remaining: 0`

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::header::HeaderValue;
use axum::http::{HeaderName, Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::warn;

use super::ip::{ClientIp, TrustedProxyConfig, client_ip};
use crate::error::AppError;
use crate::metrics;
use crate::rate_limiter::{FixedWindowLimiter, RateLimitKey};

/// Limiter scope for per-IP request limits.
pub const IP_SCOPE: &str = "ip";

/// Route label for requests that did not match a route template.
const UNMATCHED_ROUTE: &str = "unmatched";

static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Rate limiting layer for Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = FixedWindowLimiter::new(10, Duration::from_secs(60))?;
/// let app = Router::new()
///     .route("/api/scan", post(scan))
///     .layer(RateLimitLayer::new(limiter, TrustedProxyConfig::default()));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: FixedWindowLimiter,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RateLimitLayer {
    pub fn new(limiter: FixedWindowLimiter, trusted_proxies: TrustedProxyConfig) -> Self {
        Self {
            limiter,
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: FixedWindowLimiter,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let ip = client_ip(&req, &self.trusted_proxies).into_owned();
        let route = req
            .extensions()
            .get::<MatchedPath>()
            .map_or(UNMATCHED_ROUTE, MatchedPath::as_str)
            .to_string();

        let key = RateLimitKey::new(IP_SCOPE, &ip, &route);
        let decision = self.limiter.check(&key);
        metrics::set_rate_limit_entries(self.limiter.len());

        if !decision.allowed {
            let retry_after_secs = decision.retry_after_secs();
            warn!(
                client_ip = %ip,
                route = %route,
                retry_after_secs,
                "Rate limit exceeded"
            );
            metrics::record_rate_limited(IP_SCOPE);

            let response = AppError::RateLimited {
                retry_after_secs,
                limit: Some(decision.limit),
            }
            .into_response();
            return Box::pin(async move { Ok(response) });
        }

        req.extensions_mut().insert(ClientIp(ip));
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;

            let headers = response.headers_mut();
            headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(decision.limit));
            headers.insert(
                X_RATELIMIT_REMAINING.clone(),
                HeaderValue::from(decision.remaining),
            );

            Ok(response)
        })
    }
}
