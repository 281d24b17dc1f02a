//! Uniform JSON response envelope.
//!
//! Every body this service writes, success or failure, has the same shape:
//!
//! ```json
//! {
//!   "success": true,
//!   "response": { "...": "..." },
//!   "meta": { "requestId": "0b6d...", "timestamp": "2026-01-15T10:30:00Z" }
//! }
//! ```
//!
//! Failures replace `response` with `error: { code, message, details? }`.
//!
//! The request ID is carried in a task-local set by the request-ID
//! middleware, so envelopes built anywhere inside the request future
//! (handlers, extractors, rejections from inner middleware) agree with the
//! `X-Request-Id` response header.

use std::future::Future;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Run `fut` with `request_id` visible to [`current_request_id`].
pub async fn with_request_id<F>(request_id: String, fut: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(request_id, fut).await
}

/// Request ID of the request being served.
///
/// Outside a request scope (unit tests, background tasks) a fresh UUID is
/// returned so envelopes are still well-formed.
pub fn current_request_id() -> String {
    REQUEST_ID
        .try_with(Clone::clone)
        .unwrap_or_else(|_| Uuid::new_v4().to_string())
}

/// Envelope metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    /// Upstream service the response was relayed from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<&'static str>,
}

impl Meta {
    pub fn now() -> Self {
        Self {
            request_id: current_request_id(),
            timestamp: Utc::now(),
            upstream: None,
        }
    }
}

/// Error part of a failed envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Response body shape shared by every route.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub meta: Meta,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(response: T) -> Self {
        Self {
            success: true,
            response: Some(response),
            error: None,
            meta: Meta::now(),
        }
    }
}

impl Envelope<()> {
    pub fn failure(code: &'static str, message: impl Into<String>, details: Option<Value>) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
                details,
            }),
            meta: Meta::now(),
        }
    }
}

/// Successful handler output: status code plus enveloped payload.
#[derive(Debug)]
pub struct ApiResponse<T> {
    status: StatusCode,
    envelope: Envelope<T>,
}

impl<T: Serialize> ApiResponse<T> {
    /// `200 OK`.
    pub fn ok(response: T) -> Self {
        Self {
            status: StatusCode::OK,
            envelope: Envelope::success(response),
        }
    }

    /// `201 Created`.
    pub fn created(response: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            envelope: Envelope::success(response),
        }
    }

    /// Tag the envelope with the upstream that produced the payload.
    pub fn with_upstream(mut self, upstream: &'static str) -> Self {
        self.envelope.meta.upstream = Some(upstream);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn envelope(&self) -> &Envelope<T> {
        &self.envelope
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self.envelope)).into_response()
    }
}
