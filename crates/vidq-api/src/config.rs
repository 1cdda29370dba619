//! API configuration.

use std::time::Duration;

use tracing::warn;

/// Time reserved after an abandoned inline attempt for enqueueing the job.
const INLINE_FALLBACK_MARGIN: Duration = Duration::from_secs(5);

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Per-IP requests per second on `/api`
    pub rate_limit_rps: u32,
    pub rate_limit_burst: u32,
    /// Request timeout
    pub request_timeout: Duration,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Serve Prometheus metrics at `/metrics`
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            request_timeout: Duration::from_secs(30),
            max_body_size: 64 * 1024,
            environment: "development".to_string(),
            metrics_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT").unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_parse("RATE_LIMIT_RPS").unwrap_or(defaults.rate_limit_rps),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST").unwrap_or(defaults.rate_limit_burst),
            request_timeout: env_parse("REQUEST_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            max_body_size: env_parse("MAX_BODY_SIZE").unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

/// How submissions choose between inline processing and the queue.
#[derive(Debug, Clone)]
pub struct SubmissionConfig {
    /// Allow inline processing at all
    pub inline_enabled: bool,
    /// Estimated processing seconds per second of content
    pub cost_factor: f64,
    /// Largest estimate that is processed inline
    pub inline_max_estimate: Duration,
    /// Hard limit on inline processing before falling back to the queue
    pub inline_timeout: Duration,
    /// TTL of cache entries written by inline completions
    pub cache_ttl: Duration,
    /// Priority of submissions that do not set one
    pub default_priority: i32,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            inline_enabled: true,
            cost_factor: 0.25,
            inline_max_estimate: Duration::from_secs(15),
            inline_timeout: Duration::from_secs(20),
            cache_ttl: Duration::from_secs(7 * 24 * 3600),
            default_priority: vidq_models::DEFAULT_PRIORITY,
        }
    }
}

impl SubmissionConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            inline_enabled: std::env::var("INLINE_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.inline_enabled),
            cost_factor: env_parse("INLINE_COST_FACTOR")
                .filter(|f: &f64| f.is_finite() && *f > 0.0)
                .unwrap_or(defaults.cost_factor),
            inline_max_estimate: env_parse("INLINE_MAX_ESTIMATE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.inline_max_estimate),
            inline_timeout: env_parse("INLINE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.inline_timeout),
            cache_ttl: env_parse("CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            default_priority: env_parse("DEFAULT_PRIORITY").unwrap_or(defaults.default_priority),
        }
    }

    /// Clamp the inline timeout so the queue fallback still runs before the
    /// request timeout drops the handler.
    pub fn fit_within(mut self, request_timeout: Duration) -> Self {
        let margin = INLINE_FALLBACK_MARGIN.min(request_timeout / 2);
        let limit = request_timeout.saturating_sub(margin);
        if self.inline_timeout > limit {
            warn!(
                inline_timeout = ?self.inline_timeout,
                request_timeout = ?request_timeout,
                clamped = ?limit,
                "Inline timeout exceeds request timeout, clamping"
            );
            self.inline_timeout = limit;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_submission_config_from_env() {
        std::env::set_var("INLINE_ENABLED", "false");
        std::env::set_var("INLINE_COST_FACTOR", "-1");
        std::env::set_var("INLINE_TIMEOUT_SECS", "5");

        let config = SubmissionConfig::from_env();
        assert!(!config.inline_enabled);
        assert_eq!(config.cost_factor, 0.25);
        assert_eq!(config.inline_timeout, Duration::from_secs(5));

        std::env::remove_var("INLINE_ENABLED");
        std::env::remove_var("INLINE_COST_FACTOR");
        std::env::remove_var("INLINE_TIMEOUT_SECS");
    }

    #[test]
    #[serial]
    fn test_inline_timeout_is_clamped_below_request_timeout() {
        std::env::set_var("INLINE_TIMEOUT_SECS", "60");
        std::env::remove_var("REQUEST_TIMEOUT");

        let api = ApiConfig::from_env();
        let config = SubmissionConfig::from_env().fit_within(api.request_timeout);
        assert_eq!(api.request_timeout, Duration::from_secs(30));
        assert_eq!(config.inline_timeout, Duration::from_secs(25));

        let short = SubmissionConfig::default().fit_within(Duration::from_secs(4));
        assert_eq!(short.inline_timeout, Duration::from_secs(2));

        let untouched = SubmissionConfig::default().fit_within(Duration::from_secs(30));
        assert_eq!(untouched.inline_timeout, Duration::from_secs(20));

        std::env::remove_var("INLINE_TIMEOUT_SECS");
    }

    #[test]
    #[serial]
    fn test_api_config_production_flag() {
        std::env::set_var("ENVIRONMENT", "Production");
        assert!(ApiConfig::from_env().is_production());
        std::env::remove_var("ENVIRONMENT");
        assert!(!ApiConfig::from_env().is_production());
    }
}
