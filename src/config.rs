//! Application configuration loaded from environment variables.
//!
//! All configuration is loaded from environment variables (and an optional
//! `.env` file) with development defaults, then validated once at startup.
//!
//! # Security Configuration
//!
//! - `API_KEY`: when set, `/api/*` requires the `X-API-Key` header
//! - `CORS_ALLOWED_ORIGINS`: comma-separated origins (default: `*` for dev)
//! - `TRUSTED_PROXIES`: CIDR ranges whose forwarded headers are believed
//!
//! # Upstreams
//!
//! - `BAGS_API_URL` / `BAGS_API_KEY`
//! - `HELIUS_RPC_URL` / `HELIUS_API_KEY`
//! - `JUPITER_API_URL` / `JUPITER_API_KEY`
//!
//! A missing key leaves the corresponding routes answering `501`. Base URLs
//! must pass the SSRF guard.
//!
//! # Abuse Control
//!
//! - `RATE_LIMIT_MAX`: requests per window per IP per route (default: 10, 0 = off)
//! - `RATE_LIMIT_WINDOW_MS`: window length (default: 60000)
//! - `IDEMPOTENCY_WINDOW_SECS`: idempotency key lifetime (default: 3600)

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::rate_limiter::DEFAULT_CLEANUP_PROBABILITY;
use crate::redact::REDACTED;
use crate::safe_json::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_SIZE, JsonLimits};
use crate::ssrf::SsrfGuard;

/// Default Bags public API base.
pub const DEFAULT_BAGS_API_URL: &str = "https://public-api-v2.bags.fm/api/v1";

/// Default Helius mainnet RPC endpoint.
pub const DEFAULT_HELIUS_RPC_URL: &str = "https://mainnet.helius-rpc.com";

/// Default Jupiter swap API base.
pub const DEFAULT_JUPITER_API_URL: &str = "https://api.jup.ag/swap/v1";

/// Application configuration loaded from environment variables.
///
/// `Debug` output masks the upstream and client API keys.
#[derive(Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Deployment environment: "development", "test" or "production"
    pub app_env: String,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Requests per window per client IP per route (0 disables)
    pub rate_limit_max: u32,

    pub rate_limit_window: Duration,

    /// Fraction of limiter checks that sweep expired entries
    pub rate_limit_cleanup_probability: f64,

    /// Interval of the background sweep task
    pub rate_limit_sweep_interval: Duration,

    /// How long an idempotency key stays claimed
    pub idempotency_window: Duration,

    // =========================================================================
    // Request Body Limits
    // =========================================================================
    pub max_json_size: usize,

    pub max_json_depth: usize,

    // =========================================================================
    // Upstream Configuration
    // =========================================================================
    /// Ceiling for any upstream call; clients may only shorten it
    pub upstream_timeout: Duration,

    /// Outbound requests per second per upstream (0 disables)
    pub upstream_max_rps: u32,

    pub bags_api_url: String,
    pub bags_api_key: Option<String>,

    pub helius_rpc_url: String,
    pub helius_api_key: Option<String>,

    pub jupiter_api_url: String,
    pub jupiter_api_key: Option<String>,

    // =========================================================================
    // Feature Flags
    // =========================================================================
    /// Enables `/api/apply` (token creation through Bags)
    pub launchpad_enabled: bool,

    /// Enables `/api/swap`
    pub beta_trading_enabled: bool,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// API key for `/api/*` (optional)
    pub api_key: Option<String>,

    /// Allowed CORS origins; `*` allows any
    pub cors_allowed_origins: Vec<String>,

    /// Trusted proxy CIDR ranges.
    ///
    /// Default: empty (forwarded headers ignored, clients keyed by socket address)
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,

    /// Emit JSON log lines (`LOG_FORMAT=json`)
    pub log_json: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked = |secret: &Option<String>| secret.as_ref().map(|_| REDACTED);

        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("app_env", &self.app_env)
            .field("rate_limit_max", &self.rate_limit_max)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "rate_limit_cleanup_probability",
                &self.rate_limit_cleanup_probability,
            )
            .field("rate_limit_sweep_interval", &self.rate_limit_sweep_interval)
            .field("idempotency_window", &self.idempotency_window)
            .field("max_json_size", &self.max_json_size)
            .field("max_json_depth", &self.max_json_depth)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("upstream_max_rps", &self.upstream_max_rps)
            .field("bags_api_url", &self.bags_api_url)
            .field("bags_api_key", &masked(&self.bags_api_key))
            .field("helius_rpc_url", &self.helius_rpc_url)
            .field("helius_api_key", &masked(&self.helius_api_key))
            .field("jupiter_api_url", &self.jupiter_api_url)
            .field("jupiter_api_key", &masked(&self.jupiter_api_key))
            .field("launchpad_enabled", &self.launchpad_enabled)
            .field("beta_trading_enabled", &self.beta_trading_enabled)
            .field("api_key", &masked(&self.api_key))
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("trusted_proxies", &self.trusted_proxies)
            .field("metrics_port", &self.metrics_port)
            .field("log_json", &self.log_json)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or
    /// validate.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            app_env: env::var("APP_ENV")
                .map(|v| v.trim().to_ascii_lowercase())
                .unwrap_or_else(|_| "development".to_string()),

            rate_limit_max: Self::parse_env("RATE_LIMIT_MAX", 10)?,
            rate_limit_window: Duration::from_millis(Self::parse_env(
                "RATE_LIMIT_WINDOW_MS",
                60_000,
            )?),
            rate_limit_cleanup_probability: Self::parse_env(
                "RATE_LIMIT_CLEANUP_PROBABILITY",
                DEFAULT_CLEANUP_PROBABILITY,
            )?,
            rate_limit_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                60,
            )?),
            idempotency_window: Duration::from_secs(Self::parse_env(
                "IDEMPOTENCY_WINDOW_SECS",
                3600,
            )?),

            max_json_size: Self::parse_env("MAX_JSON_SIZE", DEFAULT_MAX_SIZE)?,
            max_json_depth: Self::parse_env("MAX_JSON_DEPTH", DEFAULT_MAX_DEPTH)?,

            upstream_timeout: Duration::from_millis(Self::parse_env(
                "UPSTREAM_TIMEOUT_MS",
                15_000,
            )?),
            upstream_max_rps: Self::parse_env("UPSTREAM_MAX_RPS", 20)?,
            bags_api_url: Self::env_or("BAGS_API_URL", DEFAULT_BAGS_API_URL),
            bags_api_key: Self::secret("BAGS_API_KEY"),
            helius_rpc_url: Self::env_or("HELIUS_RPC_URL", DEFAULT_HELIUS_RPC_URL),
            helius_api_key: Self::secret("HELIUS_API_KEY"),
            jupiter_api_url: Self::env_or("JUPITER_API_URL", DEFAULT_JUPITER_API_URL),
            jupiter_api_key: Self::secret("JUPITER_API_KEY"),

            launchpad_enabled: Self::parse_flag("LAUNCHPAD_ENABLED")?,
            beta_trading_enabled: Self::parse_flag("BETA_TRADING_ENABLED")?,

            api_key: Self::secret("API_KEY"),
            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS", "*"),
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES", ""),

            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
            log_json: env::var("LOG_FORMAT").is_ok_and(|v| v.trim().eq_ignore_ascii_case("json")),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if !matches!(self.app_env.as_str(), "development" | "test" | "production") {
            return Err(AppError::ConfigError(format!(
                "APP_ENV must be development, test or production (got '{}')",
                self.app_env
            )));
        }

        if self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_MS must be greater than 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.rate_limit_cleanup_probability) {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_CLEANUP_PROBABILITY must be between 0 and 1".to_string(),
            ));
        }

        if self.rate_limit_sweep_interval.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.idempotency_window.is_zero() {
            return Err(AppError::ConfigError(
                "IDEMPOTENCY_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        if self.max_json_size == 0 || self.max_json_depth == 0 {
            return Err(AppError::ConfigError(
                "MAX_JSON_SIZE and MAX_JSON_DEPTH must be greater than 0".to_string(),
            ));
        }

        if self.upstream_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "UPSTREAM_TIMEOUT_MS must be greater than 0".to_string(),
            ));
        }

        let guard = SsrfGuard::default();
        for (name, url) in [
            ("BAGS_API_URL", &self.bags_api_url),
            ("HELIUS_RPC_URL", &self.helius_rpc_url),
            ("JUPITER_API_URL", &self.jupiter_api_url),
        ] {
            guard
                .validate(url)
                .map_err(|reason| AppError::ConfigError(format!("{name} rejected: {reason}")))?;
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_max > 0
    }

    pub fn auth_enabled(&self) -> bool {
        self.api_key.is_some()
    }

    /// Get the metrics endpoint address, `None` when disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        (self.metrics_port > 0).then(|| SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    pub fn json_limits(&self) -> JsonLimits {
        JsonLimits {
            max_size: self.max_json_size,
            max_depth: self.max_json_depth,
        }
    }

    /// Every configured credential, for log redaction.
    pub fn secrets(&self) -> Vec<String> {
        [
            &self.bags_api_key,
            &self.helius_api_key,
            &self.jupiter_api_key,
            &self.api_key,
        ]
        .into_iter()
        .flatten()
        .cloned()
        .collect()
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a boolean flag (`true/false`, `1/0`, `yes/no`), default off.
    fn parse_flag(name: &str) -> AppResult<bool> {
        let Ok(raw) = env::var(name) else {
            return Ok(false);
        };
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" | "" => Ok(false),
            other => Err(AppError::ConfigError(format!(
                "Invalid {name}: expected a boolean, got '{other}'"
            ))),
        }
    }

    fn env_or(name: &str, default: &str) -> String {
        env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    /// Unset and empty are both "not configured".
    fn secret(name: &str) -> Option<String> {
        env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_list(name: &str, default: &str) -> Vec<String> {
        env::var(name)
            .unwrap_or_else(|_| default.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            app_env: "development".to_string(),
            rate_limit_max: 10,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_cleanup_probability: DEFAULT_CLEANUP_PROBABILITY,
            rate_limit_sweep_interval: Duration::from_secs(60),
            idempotency_window: Duration::from_secs(3600),
            max_json_size: DEFAULT_MAX_SIZE,
            max_json_depth: DEFAULT_MAX_DEPTH,
            upstream_timeout: Duration::from_secs(15),
            upstream_max_rps: 20,
            bags_api_url: DEFAULT_BAGS_API_URL.to_string(),
            bags_api_key: None,
            helius_rpc_url: DEFAULT_HELIUS_RPC_URL.to_string(),
            helius_api_key: None,
            jupiter_api_url: DEFAULT_JUPITER_API_URL.to_string(),
            jupiter_api_key: None,
            launchpad_enabled: false,
            beta_trading_enabled: false,
            api_key: None,
            cors_allowed_origins: vec!["*".to_string()],
            trusted_proxies: vec![],
            metrics_port: 9090,
            log_json: false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.port, 3000);
        assert_eq!(config.rate_limit_max, 10);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.idempotency_window, Duration::from_secs(3600));
        assert_eq!(config.max_json_size, 10 * 1024 * 1024);
        assert_eq!(config.max_json_depth, 32);
        assert!(!config.is_production());
        assert!(!config.launchpad_enabled);
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_rate_limiting_enabled() {
        assert!(Config::default().rate_limiting_enabled());
        let config = Config {
            rate_limit_max: 0,
            ..Config::default()
        };
        assert!(!config.rate_limiting_enabled());
    }

    #[test]
    fn test_metrics_addr() {
        assert!(Config::default().metrics_addr().is_some());
        let config = Config {
            metrics_port: 0,
            ..Config::default()
        };
        assert!(config.metrics_addr().is_none());
    }

    #[test]
    fn test_validate_rejects_private_upstream() {
        let config = Config {
            helius_rpc_url: "https://169.254.169.254/latest".to_string(),
            ..Config::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("HELIUS_RPC_URL"));
    }

    #[test]
    fn test_validate_rejects_plain_http_upstream() {
        let config = Config {
            bags_api_url: "http://public-api-v2.bags.fm/api/v1".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_probability_range() {
        let config = Config {
            rate_limit_cleanup_probability: 1.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_app_env() {
        let config = Config {
            app_env: "staging".to_string(),
            ..Config::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("APP_ENV"));
    }

    #[test]
    fn test_validate_zero_window() {
        let config = Config {
            rate_limit_window: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secrets_lists_configured_keys() {
        let config = Config {
            bags_api_key: Some("bags-key-123".to_string()),
            api_key: Some("client-key-456".to_string()),
            ..Config::default()
        };
        assert_eq!(config.secrets(), vec!["bags-key-123", "client-key-456"]);
    }

    #[test]
    fn test_json_limits() {
        let config = Config {
            max_json_depth: 8,
            ..Config::default()
        };
        assert_eq!(config.json_limits().max_depth, 8);
    }

    #[test]
    fn test_debug_masks_api_keys() {
        let config = Config {
            bags_api_key: Some("bags-key-123456".to_string()),
            helius_api_key: Some("helius-key-123456".to_string()),
            jupiter_api_key: Some("jupiter-key-123456".to_string()),
            api_key: Some("client-key-123456".to_string()),
            ..Config::default()
        };

        let printed = format!("{config:?}");
        for secret in config.secrets() {
            assert!(!printed.contains(&secret), "{secret} leaked");
        }
        assert!(printed.contains("bags_api_key: Some(\"[REDACTED]\")"));
        assert!(printed.contains("bags_api_url"));

        let unset = format!("{:?}", Config::default());
        assert!(unset.contains("api_key: None"));
    }
}
