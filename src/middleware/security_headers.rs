//! CORS and security response headers.
//!
//! Applied outermost so every response carries them, including rejections
//! produced by inner middleware. `OPTIONS` requests are answered here with
//! `204 No Content` and the preflight headers; they never reach routing.
//!
//! # Headers on every response
//!
//! - `Cache-Control: no-store`
//! - `X-Content-Type-Options: nosniff`
//! - `X-Frame-Options: DENY`
//! - `Referrer-Policy: strict-origin-when-cross-origin`
//! - `Permissions-Policy` denying camera, microphone, geolocation and payment
//! - `Strict-Transport-Security` (production only)
//!
//! # CORS
//!
//! The request `Origin` is matched against `CORS_ALLOWED_ORIGINS`. With `*`
//! configured any origin is allowed and `Access-Control-Allow-Origin: *` is
//! sent; otherwise a matching origin is echoed back with `Vary: Origin`.
//! Non-matching origins get no CORS headers and the browser blocks them.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE, CACHE_CONTROL, ORIGIN,
    REFERRER_POLICY, STRICT_TRANSPORT_SECURITY, VARY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode};
use tower::{Layer, Service};

static PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");

const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";
const ALLOWED_HEADERS: &str =
    "Content-Type, Authorization, X-API-Key, X-Request-Id, X-Request-Timeout, Idempotency-Key";
const EXPOSED_HEADERS: &str =
    "X-Request-Id, Retry-After, X-RateLimit-Limit, X-RateLimit-Remaining";
const PREFLIGHT_MAX_AGE: &str = "600";
const HSTS_VALUE: &str = "max-age=63072000; includeSubDomains; preload";

/// Origin allowlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsPolicy {
    AnyOrigin,
    Origins(Vec<String>),
}

impl CorsPolicy {
    /// Build from configured origins. `*` anywhere in the list allows any
    /// origin.
    pub fn from_origins(origins: &[String]) -> Self {
        if origins.iter().any(|o| o == "*") {
            Self::AnyOrigin
        } else {
            Self::Origins(
                origins
                    .iter()
                    .map(|o| o.trim_end_matches('/').to_string())
                    .collect(),
            )
        }
    }

    /// `Access-Control-Allow-Origin` value for a request origin.
    fn allow_origin(&self, origin: Option<&HeaderValue>) -> Option<HeaderValue> {
        match self {
            Self::AnyOrigin => Some(HeaderValue::from_static("*")),
            Self::Origins(allowed) => {
                let origin = origin?;
                let text = origin.to_str().ok()?;
                allowed.iter().any(|a| a == text).then(|| origin.clone())
            }
        }
    }
}

/// Layer applying CORS and security headers.
#[derive(Debug, Clone)]
pub struct SecurityHeadersLayer {
    cors: Arc<CorsPolicy>,
    hsts: bool,
}

impl SecurityHeadersLayer {
    pub fn new(cors: CorsPolicy, hsts: bool) -> Self {
        Self {
            cors: Arc::new(cors),
            hsts,
        }
    }
}

impl<S> Layer<S> for SecurityHeadersLayer {
    type Service = SecurityHeadersService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SecurityHeadersService {
            inner,
            cors: self.cors.clone(),
            hsts: self.hsts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecurityHeadersService<S> {
    inner: S,
    cors: Arc<CorsPolicy>,
    hsts: bool,
}

impl<S> Service<Request<Body>> for SecurityHeadersService<S>
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
        let allow_origin = self.cors.allow_origin(req.headers().get(ORIGIN));
        let vary_origin = matches!(*self.cors, CorsPolicy::Origins(_));
        let hsts = self.hsts;

        if req.method() == Method::OPTIONS {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::NO_CONTENT;
            let headers = response.headers_mut();
            apply_security_headers(headers, hsts);
            apply_cors_headers(headers, allow_origin, vary_origin);
            headers.insert(
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(ALLOWED_METHODS),
            );
            headers.insert(
                ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static(ALLOWED_HEADERS),
            );
            headers.insert(
                ACCESS_CONTROL_MAX_AGE,
                HeaderValue::from_static(PREFLIGHT_MAX_AGE),
            );
            return Box::pin(async move { Ok(response) });
        }

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let mut response = inner.call(req).await?;
            let headers = response.headers_mut();
            apply_security_headers(headers, hsts);
            apply_cors_headers(headers, allow_origin, vary_origin);
            Ok(response)
        })
    }
}

fn apply_security_headers(headers: &mut HeaderMap, hsts: bool) {
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        PERMISSIONS_POLICY.clone(),
        HeaderValue::from_static("camera=(), microphone=(), geolocation=(), payment=()"),
    );
    if hsts {
        headers.insert(STRICT_TRANSPORT_SECURITY, HeaderValue::from_static(HSTS_VALUE));
    }
}

fn apply_cors_headers(headers: &mut HeaderMap, allow_origin: Option<HeaderValue>, vary: bool) {
    if vary {
        headers.append(VARY, HeaderValue::from_static("Origin"));
    }
    if let Some(origin) = allow_origin {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.insert(
            ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static(EXPOSED_HEADERS),
        );
    }
}
