//! In-memory fixed-window rate limiter.
//!
//! # Algorithm
//!
//! Each key (`scope:identifier:route`) owns a window `[start, reset_at)` and
//! a counter:
//!
//! - no entry, or `now >= reset_at`: open a new window with count 1, allow
//! - `count < max`: increment, allow
//! - otherwise: deny until `reset_at`
//!
//! State lives in a sharded [`DashMap`], so concurrent requests for
//! different keys do not contend on a single lock. The limiter is
//! process-local: several instances each keep independent counters, which
//! makes this best-effort abuse dampening rather than a hard global limit.
//!
//! # Memory
//!
//! Expired entries are removed in two ways: an opportunistic sweep on a
//! random fraction of `check` calls, and [`FixedWindowLimiter::sweep`],
//! which the application state calls on a fixed interval.
//!
//! # Idempotency
//!
//! [`IdempotencyGuard`] is the same limiter with `max = 1` and a long
//! window: the first claim of a key on a route succeeds, every repeat within
//! the window is a conflict.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, trace};

/// Default fraction of `check` calls that trigger an opportunistic sweep.
pub const DEFAULT_CLEANUP_PROBABILITY: f64 = 0.01;

/// Default idempotency window (1 hour).
pub const DEFAULT_IDEMPOTENCY_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Composite limiter key: `scope:identifier:route`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn new(scope: &str, identifier: &str, route: &str) -> Self {
        Self(format!("{scope}:{identifier}:{route}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single counting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_at: Instant,
}

/// Result of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests still allowed in the current window.
    pub remaining: u32,
    pub reset_at: Instant,
    /// Configured maximum per window.
    pub limit: u32,
}

impl RateLimitDecision {
    /// Time until the window resets, as of `now`.
    pub fn retry_after_from(&self, now: Instant) -> Duration {
        self.reset_at.saturating_duration_since(now)
    }

    /// Whole seconds for a `Retry-After` header (never below 1).
    pub fn retry_after_secs(&self) -> u64 {
        retry_after_secs(self.reset_at)
    }
}

/// Seconds until `reset_at`, rounded up, never below 1.
fn retry_after_secs(reset_at: Instant) -> u64 {
    let wait = reset_at.saturating_duration_since(Instant::now());
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// Error type for limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    #[error("rate limit max must be greater than 0; disable the limiter instead")]
    ZeroMax,
    #[error("rate limit window must be greater than 0")]
    ZeroWindow,
}

/// Shared fixed-window limiter. Clones share state.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    inner: Arc<LimiterInner>,
}

struct LimiterInner {
    max: u32,
    window: Duration,
    cleanup_probability: f64,
    entries: DashMap<RateLimitKey, RateLimitEntry>,
}

impl fmt::Debug for FixedWindowLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("max", &self.inner.max)
            .field("window", &self.inner.window)
            .field("entries", &self.inner.entries.len())
            .finish()
    }
}

impl FixedWindowLimiter {
    /// Create a limiter allowing `max` requests per `window` per key.
    ///
    /// # Errors
    ///
    /// Returns an error if `max` or `window` is zero.
    pub fn new(max: u32, window: Duration) -> Result<Self, RateLimitError> {
        Self::with_cleanup_probability(max, window, DEFAULT_CLEANUP_PROBABILITY)
    }

    /// Like [`new`](Self::new) with an explicit opportunistic-sweep fraction
    /// (clamped to `0.0..=1.0`; `0.0` disables it).
    pub fn with_cleanup_probability(
        max: u32,
        window: Duration,
        cleanup_probability: f64,
    ) -> Result<Self, RateLimitError> {
        if max == 0 {
            return Err(RateLimitError::ZeroMax);
        }
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }

        Ok(Self {
            inner: Arc::new(LimiterInner {
                max,
                window,
                cleanup_probability: if cleanup_probability.is_finite() {
                    cleanup_probability.clamp(0.0, 1.0)
                } else {
                    0.0
                },
                entries: DashMap::new(),
            }),
        })
    }

    pub fn max(&self) -> u32 {
        self.inner.max
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Number of tracked keys (including not-yet-swept expired ones).
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Count a request for `key` against the current window.
    pub fn check(&self, key: &RateLimitKey) -> RateLimitDecision {
        let now = Instant::now();
        let decision = self.check_at(key, now);

        if self.inner.cleanup_probability > 0.0 && rand::random_bool(self.inner.cleanup_probability)
        {
            let removed = self.sweep_at(now);
            if removed > 0 {
                debug!(removed, "Opportunistic rate limit sweep");
            }
        }

        decision
    }

    /// [`check`](Self::check) against an explicit clock reading, without
    /// the opportunistic sweep.
    pub fn check_at(&self, key: &RateLimitKey, now: Instant) -> RateLimitDecision {
        let max = self.inner.max;
        let window = self.inner.window;

        let mut entry = self
            .inner
            .entries
            .entry(key.clone())
            .or_insert(RateLimitEntry {
                count: 0,
                reset_at: now + window,
            });
        let state = entry.value_mut();

        if now >= state.reset_at {
            *state = RateLimitEntry {
                count: 0,
                reset_at: now + window,
            };
        }

        if state.count < max {
            state.count += 1;
            RateLimitDecision {
                allowed: true,
                remaining: max - state.count,
                reset_at: state.reset_at,
                limit: max,
            }
        } else {
            trace!(key = %key, "Fixed window exhausted");
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at: state.reset_at,
                limit: max,
            }
        }
    }

    /// Current entry for `key`, if any.
    pub fn entry(&self, key: &RateLimitKey) -> Option<RateLimitEntry> {
        self.inner.entries.get(key).map(|e| *e.value())
    }

    /// Remove every expired window. Returns the number of removed keys.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.inner.entries.len();
        self.inner.entries.retain(|_, entry| entry.reset_at > now);
        before.saturating_sub(self.inner.entries.len())
    }
}

/// Conflict returned when an idempotency key was already claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyConflict {
    /// When the key may be reused.
    pub reset_at: Instant,
}

impl IdempotencyConflict {
    pub fn retry_after_secs(&self) -> u64 {
        retry_after_secs(self.reset_at)
    }
}

/// At-most-once acceptance of caller-supplied idempotency keys.
///
/// The guarantee holds within a single process lifetime only.
#[derive(Debug, Clone)]
pub struct IdempotencyGuard {
    limiter: FixedWindowLimiter,
}

impl IdempotencyGuard {
    /// # Errors
    ///
    /// Returns an error if `window` is zero.
    pub fn new(window: Duration) -> Result<Self, RateLimitError> {
        Ok(Self {
            limiter: FixedWindowLimiter::new(1, window)?,
        })
    }

    /// Claim `key` for `route`. Only the first claim within the window wins.
    pub fn claim(&self, key: &str, route: &str) -> Result<(), IdempotencyConflict> {
        self.claim_at(key, route, Instant::now())
    }

    pub fn claim_at(&self, key: &str, route: &str, now: Instant) -> Result<(), IdempotencyConflict> {
        let decision = self
            .limiter
            .check_at(&RateLimitKey::new("idem", key, route), now);
        if decision.allowed {
            Ok(())
        } else {
            Err(IdempotencyConflict {
                reset_at: decision.reset_at,
            })
        }
    }

    pub fn limiter(&self) -> &FixedWindowLimiter {
        &self.limiter
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn key(ip: &str) -> RateLimitKey {
        RateLimitKey::new("ip", ip, "/api/scan")
    }

    #[test]
    fn test_key_format() {
        assert_eq!(key("1.2.3.4").as_str(), "ip:1.2.3.4:/api/scan");
        assert_eq!(key("1.2.3.4").to_string(), "ip:1.2.3.4:/api/scan");
    }

    #[test]
    fn test_zero_configuration_rejected() {
        assert_eq!(
            FixedWindowLimiter::new(0, Duration::from_secs(1)).unwrap_err(),
            RateLimitError::ZeroMax
        );
        assert_eq!(
            FixedWindowLimiter::new(1, Duration::ZERO).unwrap_err(),
            RateLimitError::ZeroWindow
        );
    }

    #[test]
    fn test_denies_after_max_then_resets() {
        let limiter = FixedWindowLimiter::new(3, Duration::from_secs(60)).unwrap();
        let start = Instant::now();
        let k = key("1.2.3.4");

        for expected_remaining in [2, 1, 0] {
            let d = limiter.check_at(&k, start);
            assert!(d.allowed);
            assert_eq!(d.remaining, expected_remaining);
        }

        let denied = limiter.check_at(&k, start + Duration::from_secs(59));
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.reset_at, start + Duration::from_secs(60));

        // Window boundary is exclusive: at reset_at a new window opens
        let reset = limiter.check_at(&k, start + Duration::from_secs(60));
        assert!(reset.allowed);
        assert_eq!(reset.remaining, 2);
        assert_eq!(reset.reset_at, start + Duration::from_secs(120));
    }

    #[test]
    fn test_count_never_exceeds_max() {
        let limiter = FixedWindowLimiter::new(5, Duration::from_secs(10)).unwrap();
        let now = Instant::now();
        let k = key("9.9.9.9");

        for _ in 0..50 {
            limiter.check_at(&k, now);
        }
        assert_eq!(limiter.entry(&k).unwrap().count, 5);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(60)).unwrap();
        let now = Instant::now();

        assert!(limiter.check_at(&key("1.1.1.1"), now).allowed);
        assert!(!limiter.check_at(&key("1.1.1.1"), now).allowed);
        assert!(limiter.check_at(&key("2.2.2.2"), now).allowed);

        let other_route = RateLimitKey::new("ip", "1.1.1.1", "/api/simulate");
        assert!(limiter.check_at(&other_route, now).allowed);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let limiter = FixedWindowLimiter::new(10, Duration::from_secs(5)).unwrap();
        let start = Instant::now();

        limiter.check_at(&key("old"), start);
        limiter.check_at(&key("new"), start + Duration::from_secs(4));
        assert_eq!(limiter.len(), 2);

        let removed = limiter.sweep_at(start + Duration::from_secs(6));
        assert_eq!(removed, 1);
        assert!(limiter.entry(&key("old")).is_none());
        assert!(limiter.entry(&key("new")).is_some());
    }

    #[test]
    fn test_cleanup_probability_one_sweeps_on_check() {
        let limiter =
            FixedWindowLimiter::with_cleanup_probability(10, Duration::from_millis(1), 1.0)
                .unwrap();
        limiter.check(&key("a"));
        std::thread::sleep(Duration::from_millis(5));
        limiter.check(&key("b"));
        // "a" expired and was swept; "b" is fresh
        assert!(limiter.entry(&key("a")).is_none());
        assert!(limiter.entry(&key("b")).is_some());
    }

    #[test]
    fn test_non_finite_probability_disables_sweep() {
        let limiter =
            FixedWindowLimiter::with_cleanup_probability(1, Duration::from_secs(1), f64::NAN)
                .unwrap();
        assert_eq!(limiter.inner.cleanup_probability, 0.0);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let now = Instant::now();
        let decision = RateLimitDecision {
            allowed: false,
            remaining: 0,
            reset_at: now + Duration::from_millis(1500),
            limit: 1,
        };
        assert!(decision.retry_after_secs() >= 1);
        assert!(decision.retry_after_secs() <= 2);
        assert_eq!(decision.retry_after_from(now + Duration::from_secs(10)), Duration::ZERO);
    }

    #[test]
    fn test_idempotency_first_claim_wins() {
        let guard = IdempotencyGuard::new(DEFAULT_IDEMPOTENCY_WINDOW).unwrap();
        let now = Instant::now();

        assert!(guard.claim_at("key-123", "/api/apply", now).is_ok());
        let conflict = guard.claim_at("key-123", "/api/apply", now).unwrap_err();
        assert_eq!(conflict.reset_at, now + DEFAULT_IDEMPOTENCY_WINDOW);

        // Same key on a different route is a different logical request
        assert!(guard.claim_at("key-123", "/api/other", now).is_ok());
    }

    #[test]
    fn test_idempotency_key_reusable_after_window() {
        let guard = IdempotencyGuard::new(Duration::from_secs(10)).unwrap();
        let now = Instant::now();

        assert!(guard.claim_at("k", "/api/apply", now).is_ok());
        assert!(guard.claim_at("k", "/api/apply", now + Duration::from_secs(9)).is_err());
        assert!(guard.claim_at("k", "/api/apply", now + Duration::from_secs(10)).is_ok());
    }

    #[test]
    fn test_concurrent_checks_respect_max() {
        let limiter = FixedWindowLimiter::new(100, Duration::from_secs(60)).unwrap();
        let k = key("shared");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let k = k.clone();
                std::thread::spawn(move || {
                    (0..50).filter(|_| limiter.check(&k).allowed).count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 100);
    }
}
