//! Outbound client for the Bags, Helius and Jupiter APIs.
//!
//! # Features
//!
//! - **Credential injection**: `x-api-key` header for Bags and Jupiter,
//!   `api-key` query parameter for Helius. Keys never reach the client.
//! - **Deadlines**: every call runs under the effective timeout (client
//!   `X-Request-Timeout` capped by `UPSTREAM_TIMEOUT_MS`), covering connect,
//!   headers and body. Expiry maps to `UPSTREAM_TIMEOUT`.
//! - **Bounded bodies**: responses are read up to the JSON size limit and
//!   parsed with the same safe JSON parser used for client bodies.
//! - **Outbound quota**: one `governor` quota per upstream protects the
//!   shared key from being burned by a single busy client.
//! - **No redirects, no retries.**
//!
//! Upstream failures are reported as `502` with a generic message; the
//! redacted cause is only logged.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, RequestBuilder, redirect};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::redact::Redactor;
use crate::safe_json::{self, JsonLimits};

/// Header carrying the Bags and Jupiter API keys.
const API_KEY_HEADER: &str = "x-api-key";

/// Query parameter carrying the Helius API key.
const HELIUS_KEY_PARAM: &str = "api-key";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Third-party services this API relays to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Upstream {
    Bags,
    Helius,
    Jupiter,
}

impl Upstream {
    /// Label used in logs, metrics and envelope metadata.
    pub const fn name(self) -> &'static str {
        match self {
            Upstream::Bags => "bags",
            Upstream::Helius => "helius",
            Upstream::Jupiter => "jupiter",
        }
    }

    /// Environment variable holding the credential.
    pub const fn key_var(self) -> &'static str {
        match self {
            Upstream::Bags => "BAGS_API_KEY",
            Upstream::Helius => "HELIUS_API_KEY",
            Upstream::Jupiter => "JUPITER_API_KEY",
        }
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct Endpoint {
    base: Url,
    api_key: Option<String>,
    quota: Option<DefaultDirectRateLimiter>,
}

impl Endpoint {
    fn new(base: &str, api_key: Option<String>, max_rps: u32) -> AppResult<Self> {
        let base = Url::parse(base)
            .map_err(|e| AppError::ConfigError(format!("Invalid upstream URL '{base}': {e}")))?;

        Ok(Self {
            base,
            api_key,
            quota: NonZeroU32::new(max_rps).map(|rps| RateLimiter::direct(Quota::per_second(rps))),
        })
    }
}

/// Shared upstream client. Cheap to clone.
#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
    bags: Arc<Endpoint>,
    helius: Arc<Endpoint>,
    jupiter: Arc<Endpoint>,
    limits: JsonLimits,
    redactor: Arc<Redactor>,
}

impl fmt::Debug for UpstreamClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamClient")
            .field("bags", &self.bags.base.as_str())
            .field("helius", &self.helius.base.as_str())
            .field("jupiter", &self.jupiter.base.as_str())
            .finish_non_exhaustive()
    }
}

impl UpstreamClient {
    /// Build the client from configuration.
    ///
    /// Base URLs are expected to have passed [`Config::validate`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if a base URL does not parse or the
    /// HTTP client cannot be built.
    pub fn new(config: &Config, redactor: Arc<Redactor>) -> AppResult<Self> {
        let http = Client::builder()
            .redirect(redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        let rps = config.upstream_max_rps;
        Ok(Self {
            http,
            bags: Arc::new(Endpoint::new(
                &config.bags_api_url,
                config.bags_api_key.clone(),
                rps,
            )?),
            helius: Arc::new(Endpoint::new(
                &config.helius_rpc_url,
                config.helius_api_key.clone(),
                rps,
            )?),
            jupiter: Arc::new(Endpoint::new(
                &config.jupiter_api_url,
                config.jupiter_api_key.clone(),
                rps,
            )?),
            limits: config.json_limits(),
            redactor,
        })
    }

    fn endpoint(&self, upstream: Upstream) -> &Endpoint {
        match upstream {
            Upstream::Bags => &self.bags,
            Upstream::Helius => &self.helius,
            Upstream::Jupiter => &self.jupiter,
        }
    }

    pub fn is_configured(&self, upstream: Upstream) -> bool {
        self.endpoint(upstream).api_key.is_some()
    }

    /// Fail with `501` when the upstream has no credential.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotImplemented` naming the missing variable.
    pub fn require(&self, upstream: Upstream) -> AppResult<()> {
        if self.is_configured(upstream) {
            Ok(())
        } else {
            Err(AppError::NotImplemented(format!(
                "The {upstream} integration is not configured ({} is not set)",
                upstream.key_var()
            )))
        }
    }

    /// Build the target URL: base path + `segments` + `query`, plus the
    /// Helius key parameter.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotImplemented` if the upstream has no key.
    pub fn url(&self, upstream: Upstream, segments: &[&str], query: &[(String, String)]) -> AppResult<Url> {
        self.require(upstream)?;
        let endpoint = self.endpoint(upstream);
        let mut url = endpoint.base.clone();

        if !segments.is_empty() {
            url.path_segments_mut()
                .map_err(|()| AppError::Internal(format!("{upstream} base URL cannot have a path")))?
                .pop_if_empty()
                .extend(segments);
        }

        let helius_key = match (upstream, endpoint.api_key.as_deref()) {
            (Upstream::Helius, Some(key)) => Some(key),
            _ => None,
        };
        if !query.is_empty() || helius_key.is_some() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in query {
                pairs.append_pair(k, v);
            }
            if let Some(key) = helius_key {
                pairs.append_pair(HELIUS_KEY_PARAM, key);
            }
        }

        Ok(url)
    }

    /// `GET` a JSON resource.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn get_json(
        &self,
        upstream: Upstream,
        segments: &[&str],
        query: &[(String, String)],
        timeout: Duration,
    ) -> AppResult<Value> {
        let url = self.url(upstream, segments, query)?;
        self.send(upstream, self.http.get(url), timeout).await
    }

    /// `POST` a JSON body and parse the JSON reply.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn post_json(
        &self,
        upstream: Upstream,
        segments: &[&str],
        body: &Value,
        timeout: Duration,
    ) -> AppResult<Value> {
        let url = self.url(upstream, segments, &[])?;
        self.send(upstream, self.http.post(url).json(body), timeout)
            .await
    }

    /// Apply quota, credentials and deadline, then read and parse the reply.
    ///
    /// # Errors
    ///
    /// - `RateLimited` when the upstream quota is exhausted
    /// - `UpstreamTimeout` when `timeout` elapses
    /// - `Upstream` on transport errors, non-2xx status, oversized or
    ///   malformed bodies
    async fn send(&self, upstream: Upstream, request: RequestBuilder, timeout: Duration) -> AppResult<Value> {
        let endpoint = self.endpoint(upstream);
        let name = upstream.name();

        if let Some(quota) = &endpoint.quota
            && let Err(not_until) = quota.check()
        {
            let retry_after_secs = not_until
                .wait_time_from(DefaultClock::default().now())
                .as_secs()
                .max(1);
            warn!(upstream = name, retry_after_secs, "Upstream quota exhausted");
            metrics::record_rate_limited(name);
            metrics::record_upstream_request(name, "rate_limited");
            return Err(AppError::RateLimited {
                retry_after_secs,
                limit: None,
            });
        }

        let request = match (upstream, endpoint.api_key.as_deref()) {
            (Upstream::Bags | Upstream::Jupiter, Some(key)) => request.header(API_KEY_HEADER, key),
            _ => request,
        };

        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.execute(upstream, request)).await;
        metrics::record_upstream_duration(name, started.elapsed().as_secs_f64());

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(upstream = name, timeout_ms = %timeout.as_millis(), "Upstream request timed out");
                metrics::record_upstream_request(name, "timeout");
                return Err(AppError::UpstreamTimeout { upstream: name });
            }
        };

        match &outcome {
            Ok(_) => metrics::record_upstream_request(name, "success"),
            Err(AppError::UpstreamTimeout { .. }) => metrics::record_upstream_request(name, "timeout"),
            Err(_) => metrics::record_upstream_request(name, "error"),
        }
        outcome
    }

    async fn execute(&self, upstream: Upstream, request: RequestBuilder) -> AppResult<Value> {
        let name = upstream.name();
        let mut response = request.send().await.map_err(|e| self.transport_error(upstream, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.upstream_error(upstream, format!("HTTP {status}")));
        }

        let max = self.limits.max_size;
        if response.content_length().is_some_and(|len| len > max as u64) {
            return Err(self.upstream_error(upstream, format!("Response exceeds {max} bytes")));
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.transport_error(upstream, e))?
        {
            if body.len() + chunk.len() > max {
                return Err(self.upstream_error(upstream, format!("Response exceeds {max} bytes")));
            }
            body.extend_from_slice(&chunk);
        }

        debug!(upstream = name, status = status.as_u16(), bytes = body.len(), "Upstream response received");

        safe_json::parse_bytes(&body, &self.limits)
            .map_err(|e| self.upstream_error(upstream, format!("Malformed response: {e}")))
    }

    fn transport_error(&self, upstream: Upstream, err: reqwest::Error) -> AppError {
        if err.is_timeout() {
            return AppError::UpstreamTimeout {
                upstream: upstream.name(),
            };
        }
        // The URL may carry the Helius key
        self.upstream_error(upstream, err.without_url().to_string())
    }

    fn upstream_error(&self, upstream: Upstream, message: String) -> AppError {
        AppError::Upstream {
            upstream: upstream.name(),
            message: self.redactor.redact(&message),
        }
    }
}
