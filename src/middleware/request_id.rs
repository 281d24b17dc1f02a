//! Request ID middleware for distributed tracing.
//!
//! # Features
//!
//! - Propagates a well-formed incoming `X-Request-Id`
//! - Generates a UUIDv4 when the header is missing or malformed
//! - Adds `X-Request-Id` to all responses
//! - Records the ID on the current tracing span
//! - Scopes the ID so response envelopes report the same value in
//!   `meta.requestId`
//!
//! # Accepted IDs
//!
//! At most 128 characters of `A-Z a-z 0-9 - _ . :`. Anything else is
//! replaced rather than echoed back, so clients cannot inject arbitrary
//! text into logs or headers.

use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::HeaderValue;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::{Span, debug};
use uuid::Uuid;

use crate::envelope::with_request_id;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Maximum accepted length for a client-supplied request ID.
pub const MAX_REQUEST_ID_LENGTH: usize = 128;

/// Request ID layer for Tower middleware stack.
#[derive(Clone, Default)]
pub struct RequestIdLayer;

impl RequestIdLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService { inner }
    }
}

/// Request ID service wrapper.
#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for RequestIdService<S>
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
        let request_id = extract_or_generate_request_id(&req);
        // Only well-formed IDs reach here, so this cannot fail
        let header_value = HeaderValue::from_str(&request_id).ok();

        if let Some(value) = &header_value {
            req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
        }

        Span::current().record("request_id", request_id.as_str());
        debug!(request_id = %request_id, "Processing request");

        let mut inner = self.inner.clone();

        // Inner services are invoked inside the scope so their synchronous
        // rejections see the same ID
        Box::pin(with_request_id(request_id, async move {
            let mut response = inner.call(req).await?;

            if let Some(value) = header_value {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }

            Ok(response)
        }))
    }
}

/// Whether a client-supplied request ID is safe to propagate.
pub fn is_valid_request_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_REQUEST_ID_LENGTH
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'))
}

/// Extract request ID from headers or generate a new one.
fn extract_or_generate_request_id<B>(req: &Request<B>) -> String {
    if let Some(header_value) = req.headers().get(REQUEST_ID_HEADER)
        && let Ok(value) = header_value.to_str()
        && is_valid_request_id(value)
    {
        return value.to_string();
    }

    Uuid::new_v4().to_string()
}

/// Extension trait to extract request ID from requests.
pub trait RequestIdExt {
    fn request_id(&self) -> Option<String>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<String> {
        self.headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }
}
