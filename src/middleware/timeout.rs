//! Client deadline propagation for upstream calls.
//!
//! Clients may shorten how long the service waits on Bags, Helius or
//! Jupiter by sending:
//!
//! ```text
//! X-Request-Timeout: 5000   # milliseconds
//! ```
//!
//! The parsed value is stored as a [`RequestTimeout`] extension. The
//! effective upstream timeout is the smaller of the client value and the
//! configured `UPSTREAM_TIMEOUT_MS` ceiling; a client can never lengthen it.
//! Values outside `100..=300000` or that fail to parse are ignored.

use std::time::Duration;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

/// Minimum accepted client timeout (100ms).
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 100;

/// Maximum accepted client timeout (5 minutes).
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 300_000;

/// Header name for client-specified request timeout.
pub const REQUEST_TIMEOUT_HEADER: &str = "x-request-timeout";

/// Client-specified timeout, stored in request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeout {
    pub duration: Duration,
}

impl RequestTimeout {
    /// Returns `None` if `ms` is outside the accepted range.
    pub fn from_millis(ms: u64) -> Option<Self> {
        (MIN_REQUEST_TIMEOUT_MS..=MAX_REQUEST_TIMEOUT_MS)
            .contains(&ms)
            .then(|| Self {
                duration: Duration::from_millis(ms),
            })
    }

    /// Parse a raw header value.
    pub fn parse(value: &str) -> Option<Self> {
        value.trim().parse::<u64>().ok().and_then(Self::from_millis)
    }
}

/// Effective upstream timeout: the client value, capped at `ceiling`.
pub fn effective_timeout(client: Option<RequestTimeout>, ceiling: Duration) -> Duration {
    client.map_or(ceiling, |t| t.duration.min(ceiling))
}

/// Middleware that parses `X-Request-Timeout` into a [`RequestTimeout`]
/// extension.
pub async fn extract_request_timeout(mut request: Request, next: Next) -> Response {
    if let Some(raw) = request
        .headers()
        .get(REQUEST_TIMEOUT_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        match RequestTimeout::parse(raw) {
            Some(timeout) => {
                debug!(timeout_ms = %timeout.duration.as_millis(), "Client specified request timeout");
                request.extensions_mut().insert(timeout);
            }
            None => {
                debug!(
                    value = raw,
                    min = MIN_REQUEST_TIMEOUT_MS,
                    max = MAX_REQUEST_TIMEOUT_MS,
                    "Invalid X-Request-Timeout header value, ignoring"
                );
            }
        }
    }

    next.run(request).await
}
