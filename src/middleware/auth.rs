//! Optional API key authentication for `/api/*`.
//!
//! # Security Features
//!
//! - **Constant-time comparison** of the `X-API-Key` header
//! - **Failure limiting**: each IP may fail a limited number of times per
//!   minute; further failures get `429` instead of `401`
//! - **Selective protection**: `/health` is always reachable
//!
//! Enabled by setting `API_KEY`. The key is only accepted as a header;
//! query strings end up in access logs.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use subtle::ConstantTimeEq;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::ip::{TrustedProxyConfig, client_ip};
use crate::error::AppError;
use crate::metrics;

/// Header name for API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Paths that bypass authentication (exact match).
pub const DEFAULT_BYPASS_PATHS: [&str; 1] = ["/health"];

/// Auth failures allowed per IP per minute.
const AUTH_FAILURE_LIMIT: NonZeroU32 = NonZeroU32::new(10).unwrap();

/// Burst capacity for auth failures.
const AUTH_FAILURE_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();

/// Per-IP auth failure limiter. Owned by `AppState`, whose sweep task
/// prunes idle keys.
pub type AuthFailureLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Failure limiter with the default quota.
pub fn auth_failure_limiter() -> AuthFailureLimiter {
    RateLimiter::keyed(Quota::per_minute(AUTH_FAILURE_LIMIT).allow_burst(AUTH_FAILURE_BURST))
}

/// API key authentication layer.
///
/// When the expected key is `None`, all requests are allowed.
#[derive(Clone)]
pub struct ApiKeyAuth {
    expected_key: Option<Arc<String>>,
    bypass_paths: Arc<Vec<String>>,
    failure_limiter: Arc<AuthFailureLimiter>,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl ApiKeyAuth {
    pub fn new(
        api_key: Option<String>,
        trusted_proxies: TrustedProxyConfig,
        failure_limiter: Arc<AuthFailureLimiter>,
    ) -> Self {
        Self {
            expected_key: api_key.map(Arc::new),
            bypass_paths: Arc::new(
                DEFAULT_BYPASS_PATHS
                    .iter()
                    .map(|s| (*s).to_string())
                    .collect(),
            ),
            failure_limiter,
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.expected_key.is_some()
    }
}

impl<S> Layer<S> for ApiKeyAuth {
    type Service = ApiKeyAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApiKeyAuthService {
            inner,
            auth: self.clone(),
        }
    }
}

/// API key authentication service wrapper.
#[derive(Clone)]
pub struct ApiKeyAuthService<S> {
    inner: S,
    auth: ApiKeyAuth,
}

impl<S> Service<Request<Body>> for ApiKeyAuthService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let auth = self.auth.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(expected) = auth.expected_key.as_deref() else {
                return inner.call(req).await;
            };

            let path = req.uri().path();
            if auth.bypass_paths.iter().any(|p| p == path) || !path.starts_with("/api/") {
                debug!(path, "Bypassing auth");
                return inner.call(req).await;
            }

            let failure = match req
                .headers()
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
            {
                Some(key) if constant_time_eq(key, expected) => None,
                Some(_) => Some("Invalid API key"),
                None => Some("API key required"),
            };
            let Some(message) = failure else {
                return inner.call(req).await;
            };

            let ip = client_ip(&req, &auth.trusted_proxies).into_owned();
            if let Err(not_until) = auth.failure_limiter.check_key(&ip) {
                let retry_after_secs = not_until
                    .wait_time_from(DefaultClock::default().now())
                    .as_secs()
                    .max(1);
                warn!(
                    client_ip = %ip,
                    retry_after_secs,
                    "IP blocked due to excessive auth failures"
                );
                metrics::record_rate_limited("auth");
                return Ok(AppError::RateLimited {
                    retry_after_secs,
                    limit: None,
                }
                .into_response());
            }

            warn!(path = %req.uri().path(), client_ip = %ip, "{message}");
            Ok(AppError::Unauthorized(message.to_string()).into_response())
        })
    }
}

/// Constant-time string comparison.
fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
