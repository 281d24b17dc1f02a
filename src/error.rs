use axum::http::header::{HeaderName, HeaderValue, RETRY_AFTER, WWW_AUTHENTICATE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::envelope::Envelope;
use crate::redact::redact_sensitive;
use crate::safe_json::JsonError;
use crate::validation::Issues;

/// Application-wide error types with appropriate HTTP status codes.
///
/// Every variant renders as a failed [`Envelope`] with a stable `code`.
/// Upstream and internal variants carry server-side detail that is logged
/// (redacted) but never sent to the client.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Json(#[from] JsonError),

    #[error("Validation failed: {0}")]
    Validation(Issues),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Idempotency key already used")]
    IdempotencyConflict { retry_after_secs: u64 },

    #[error("Request body exceeds {max} bytes")]
    PayloadTooLarge { max: usize },

    #[error("Unsupported media type: {0}")]
    UnsupportedMediaType(String),

    #[error("Rate limit exceeded")]
    RateLimited {
        retry_after_secs: u64,
        /// Per-window limit, surfaced as `X-RateLimit-Limit`.
        limit: Option<u32>,
    },

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Upstream {upstream} failed: {message}")]
    Upstream {
        upstream: &'static str,
        message: String,
    },

    #[error("Upstream {upstream} timed out")]
    UpstreamTimeout { upstream: &'static str },

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AppError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Json(JsonError::PayloadTooLarge { .. }) | AppError::PayloadTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::IdempotencyConflict { .. } => StatusCode::CONFLICT,
            AppError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::Upstream { .. } | AppError::UpstreamTimeout { .. } => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Json(e) => e.code(),
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            AppError::IdempotencyConflict { .. } => "IDEMPOTENCY_CONFLICT",
            AppError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            AppError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            AppError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::NotImplemented(_) => "NOT_IMPLEMENTED",
            AppError::Upstream { .. } => "UPSTREAM_ERROR",
            AppError::UpstreamTimeout { .. } => "UPSTREAM_TIMEOUT",
            AppError::Internal(_) | AppError::ConfigError(_) => "INTERNAL_ERROR",
        }
    }

    /// Client-facing message. Server-side detail stays in the logs.
    fn public_message(&self) -> String {
        match self {
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::NotFound(msg)
            | AppError::NotImplemented(msg) => msg.clone(),
            AppError::Json(e) => e.to_string(),
            AppError::Validation(_) => "Request validation failed".to_string(),
            AppError::MethodNotAllowed => "Method not allowed".to_string(),
            AppError::IdempotencyConflict { .. } => {
                "This Idempotency-Key has already been used. Use a new key for a new request."
                    .to_string()
            }
            AppError::PayloadTooLarge { max } => format!("Request body exceeds {max} bytes"),
            AppError::UnsupportedMediaType(_) => {
                "Content-Type must be application/json".to_string()
            }
            AppError::RateLimited { .. } => "Too many requests. Please retry later.".to_string(),
            AppError::Upstream { upstream, .. } => {
                format!("Upstream service '{upstream}' request failed")
            }
            AppError::UpstreamTimeout { upstream } => {
                format!("Upstream service '{upstream}' timed out")
            }
            AppError::Internal(_) | AppError::ConfigError(_) => {
                "An internal error occurred. Please contact support if the issue persists."
                    .to_string()
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        // Full detail server-side, redacted; client only sees the public message
        let detail = redact_sensitive(&self.to_string());
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), code, error = %detail, "Request failed");
        } else {
            tracing::warn!(status = status.as_u16(), code, error = %detail, "Request rejected");
        }

        let details = match &self {
            AppError::Validation(issues) => serde_json::to_value(issues).ok(),
            _ => None,
        };

        let envelope = Envelope::failure(code, self.public_message(), details);
        let mut response = (status, Json(envelope)).into_response();
        let headers = response.headers_mut();

        match &self {
            AppError::RateLimited {
                retry_after_secs,
                limit,
            } => {
                headers.insert(RETRY_AFTER, HeaderValue::from(*retry_after_secs));
                if let Some(limit) = limit {
                    headers.insert(
                        HeaderName::from_static("x-ratelimit-limit"),
                        HeaderValue::from(*limit),
                    );
                    headers.insert(
                        HeaderName::from_static("x-ratelimit-remaining"),
                        HeaderValue::from_static("0"),
                    );
                }
            }
            AppError::IdempotencyConflict { retry_after_secs } => {
                headers.insert(RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            }
            AppError::Unauthorized(_) => {
                headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static("API-Key"));
            }
            _ => {}
        }

        response
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
