//! Request extractors shared by the API handlers.
//!
//! - [`SafeJson`]: `Content-Type` check → bounded body → safe JSON parse
//! - [`Valid<T>`]: [`SafeJson`] followed by strict schema validation
//! - [`RequestContext`]: request ID, client IP, timestamp and client deadline
//!
//! All rejections are [`AppError`]s, so they render as envelopes.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, MatchedPath, Request};
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::envelope::current_request_id;
use crate::error::AppError;
use crate::metrics;
use crate::middleware::{ClientIp, RequestTimeout, effective_timeout, resolve_client_ip};
use crate::safe_json;
use crate::state::AppState;
use crate::validation::{Validate, ValidationContext, validate};

/// Whether the request declares a JSON body (`application/json`, any
/// parameters).
fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

/// JSON body parsed with the configured size and depth limits.
#[derive(Debug, Clone)]
pub struct SafeJson(pub Value);

impl FromRequest<AppState> for SafeJson {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        if !is_json_content_type(req.headers()) {
            let received = req
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("none")
                .to_string();
            return Err(AppError::UnsupportedMediaType(received));
        }

        let limits = state.config.json_limits();
        // DefaultBodyLimit on the router caps the read at the same size
        let bytes = Bytes::from_request(req, state).await.map_err(|rejection| {
            if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                AppError::PayloadTooLarge {
                    max: limits.max_size,
                }
            } else {
                AppError::BadRequest(rejection.body_text())
            }
        })?;

        Ok(Self(safe_json::parse_bytes(&bytes, &limits)?))
    }
}

/// Validated payload of type `T`.
///
/// Validation failures are counted per route and rendered as
/// `VALIDATION_ERROR` with the issue list in `error.details`.
#[derive(Debug, Clone)]
pub struct Valid<T>(pub T);

impl<T: Validate> FromRequest<AppState> for Valid<T> {
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let route = req
            .extensions()
            .get::<MatchedPath>()
            .map_or_else(|| req.uri().path().to_string(), |p| p.as_str().to_string());

        let SafeJson(value) = SafeJson::from_request(req, state).await?;
        let ctx = ValidationContext { ssrf: &state.ssrf };

        validate::<T>(&value, ctx).map(Valid).map_err(|issues| {
            debug!(route = %route, issues = issues.len(), "Payload failed validation");
            metrics::record_validation_failure(&route);
            AppError::Validation(issues)
        })
    }
}

/// Per-request context. Never persisted.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub client_ip: String,
    pub timestamp: DateTime<Utc>,
    /// Deadline requested through `X-Request-Timeout`.
    pub client_timeout: Option<RequestTimeout>,
}

impl RequestContext {
    /// Effective deadline for upstream calls, capped at `ceiling`.
    pub fn upstream_timeout(&self, ceiling: Duration) -> Duration {
        effective_timeout(self.client_timeout, ceiling)
    }
}

impl FromRequestParts<AppState> for RequestContext {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let client_ip = match parts.extensions.get::<ClientIp>() {
            Some(ClientIp(ip)) => ip.clone(),
            // Rate limiting disabled: resolve it here instead
            None => resolve_client_ip(&parts.headers, &parts.extensions, &state.trusted_proxies)
                .into_owned(),
        };

        Ok(Self {
            request_id: current_request_id(),
            client_ip,
            timestamp: Utc::now(),
            client_timeout: parts.extensions.get::<RequestTimeout>().copied(),
        })
    }
}
