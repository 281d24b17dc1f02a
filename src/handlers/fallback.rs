//! Envelope-shaped `404` and `405` responses.

use axum::http::{Method, Uri};

use crate::error::AppError;

/// Fallback for unmatched paths.
pub async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri.path()))
}

/// Fallback for matched paths with an unsupported method.
pub async fn method_not_allowed(method: Method) -> AppError {
    tracing::debug!(%method, "Method not allowed");
    AppError::MethodNotAllowed
}
