//! Shared application state for Axum handlers.
//!
//! Everything a request needs is constructed once at startup and shared by
//! reference: configuration, the fixed-window limiter, the idempotency
//! guard, the SSRF guard, the log redactor and the upstream client. There
//! is no ambient global state.
//!
//! # Structured Concurrency
//!
//! The periodic limiter sweep (fixed-window counters, idempotency keys and
//! the auth failure limiter) is managed with `tokio_util::task::TaskTracker`
//! and `CancellationToken`. Call `shutdown()` to stop it before exit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::middleware::{AuthFailureLimiter, TrustedProxyConfig, auth_failure_limiter};
use crate::rate_limiter::{FixedWindowLimiter, IdempotencyGuard};
use crate::redact::Redactor;
use crate::ssrf::SsrfGuard;
use crate::upstream::UpstreamClient;

/// Shared application state for Axum handlers.
///
/// Cloned for each request; all internal data is behind `Arc`.
///
/// # Lifecycle
///
/// The sweep task is spawned when the state is created. Call `shutdown()`
/// before dropping to ensure clean task termination:
///
/// ```rust,ignore
/// let state = AppState::new(config)?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Per-IP per-route limiter (`None` when `RATE_LIMIT_MAX=0`)
    pub limiter: Option<FixedWindowLimiter>,
    /// At-most-once guard for `Idempotency-Key`
    pub idempotency: IdempotencyGuard,
    /// URL policy for client-supplied URLs
    pub ssrf: Arc<SsrfGuard>,
    pub redactor: Arc<Redactor>,
    pub upstream: UpstreamClient,
    pub trusted_proxies: Arc<TrustedProxyConfig>,
    /// Per-IP API key failure quota
    pub auth_failures: Arc<AuthFailureLimiter>,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create application state from configuration.
    ///
    /// Must be called inside a Tokio runtime: it spawns the limiter sweep
    /// task, which runs every `rate_limit_sweep_interval`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the limiter or upstream client
    /// cannot be built from `config`.
    pub fn new(config: Config) -> AppResult<Self> {
        let limiter = if config.rate_limiting_enabled() {
            Some(
                FixedWindowLimiter::with_cleanup_probability(
                    config.rate_limit_max,
                    config.rate_limit_window,
                    config.rate_limit_cleanup_probability,
                )
                .map_err(|e| AppError::ConfigError(e.to_string()))?,
            )
        } else {
            None
        };

        let idempotency = IdempotencyGuard::new(config.idempotency_window)
            .map_err(|e| AppError::ConfigError(e.to_string()))?;

        let redactor = Arc::new(Redactor::new(config.secrets()));
        let upstream = UpstreamClient::new(&config, redactor.clone())?;
        let trusted_proxies = Arc::new(TrustedProxyConfig::new(&config.trusted_proxies));

        let state = Self {
            config: Arc::new(config),
            limiter,
            idempotency,
            ssrf: Arc::new(SsrfGuard::default()),
            redactor,
            upstream,
            trusted_proxies,
            auth_failures: Arc::new(auth_failure_limiter()),
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_sweep_task();

        Ok(state)
    }

    /// Spawn the periodic sweep of expired limiter and idempotency entries.
    ///
    /// Complements the probabilistic cleanup in `check`, which alone gives
    /// no bound when traffic stops.
    fn spawn_sweep_task(&self) {
        let limiter = self.limiter.clone();
        let idempotency = self.idempotency.clone();
        let auth_failures = self.auth_failures.clone();
        let every = self.config.rate_limit_sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(every);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased; // Check cancellation first

                    _ = cancel.cancelled() => {
                        debug!("Limiter sweep task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        sweep_expired(limiter.as_ref(), &idempotency, &auth_failures);
                    }
                }
            }

            debug!("Limiter sweep task shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Effective upstream ceiling from configuration.
    pub fn upstream_timeout(&self) -> Duration {
        self.config.upstream_timeout
    }
}

/// One sweep pass. Returns the number of entries removed.
fn sweep_expired(
    limiter: Option<&FixedWindowLimiter>,
    idempotency: &IdempotencyGuard,
    auth_failures: &AuthFailureLimiter,
) -> usize {
    let mut removed = idempotency.limiter().sweep();

    let before = auth_failures.len();
    auth_failures.retain_recent();
    auth_failures.shrink_to_fit();
    removed += before.saturating_sub(auth_failures.len());

    if let Some(limiter) = limiter {
        removed += limiter.sweep();
        metrics::set_rate_limit_entries(limiter.len());
    }
    trace!(removed, "Limiter sweep completed");
    removed
}
