//! Coordinator configuration.
//!
//! Bundles every coordinator tunable with its documented default, plus an
//! environment-variable overlay and validation, the way `thaumic-core`'s
//! `state::Config`/`StreamingConfig` do.

use std::env;
use std::time::Duration;

/// Configuration for the [`crate::coordinator::Coordinator`].
///
/// All fields have sensible defaults; construct via [`CoordinatorConfig::default`]
/// or [`CoordinatorConfig::from_env`], then call [`CoordinatorConfig::validate`].
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Maximum number of concurrent syntheses.
    pub max_connections: usize,
    /// Whether requests beyond `max_connections` are queued instead of rejected.
    pub pooling_enabled: bool,

    /// Timeout for establishing the WebSocket connection.
    pub conn_timeout: Duration,
    /// Timeout for the whole synthesis (connect through `turn.end`).
    pub total_timeout: Duration,
    /// How long to wait after sending a close frame before dropping the socket.
    pub graceful_close: Duration,

    /// Maximum retry attempts for transient errors.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_retry_delay: Duration,
    /// Ceiling for exponential backoff.
    pub max_retry_delay: Duration,

    /// Consecutive failures before the circuit breaker opens.
    pub breaker_failure_threshold: u32,
    /// How long the breaker stays open before allowing probe requests.
    pub breaker_recovery_timeout: Duration,
    /// Number of successful probes required to close the breaker again.
    pub breaker_test_request_limit: u32,

    /// Maximum total bytes a single streaming buffer may hold.
    pub max_buffer_bytes: usize,
    /// Fraction of `max_buffer_bytes` at which a warning is logged.
    pub warn_threshold: f64,
    /// Interval at which the sweeper reaps completed/stale buffers.
    pub cleanup_interval: Duration,

    /// Maximum input text length, in characters.
    pub max_text_chars: usize,
    /// Maximum assembled SSML document size, in bytes.
    pub max_ssml_bytes: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_connections: 1,
            pooling_enabled: false,

            conn_timeout: Duration::from_millis(10_000),
            total_timeout: Duration::from_millis(30_000),
            graceful_close: Duration::from_millis(1_000),

            max_retries: 3,
            base_retry_delay: Duration::from_millis(1_000),
            max_retry_delay: Duration::from_millis(10_000),

            breaker_failure_threshold: 5,
            breaker_recovery_timeout: Duration::from_millis(30_000),
            breaker_test_request_limit: 3,

            max_buffer_bytes: 16_777_216,
            warn_threshold: 0.80,
            cleanup_interval: Duration::from_millis(2_000),

            max_text_chars: 4_000,
            max_ssml_bytes: 65_536,
        }
    }
}

impl CoordinatorConfig {
    /// Test profile for end-to-end scenarios: fast retries, short recovery
    /// window, everything else left at the production default.
    pub fn test_profile() -> Self {
        Self {
            base_retry_delay: Duration::from_millis(50),
            max_retry_delay: Duration::from_millis(1_000),
            ..Self::default()
        }
    }

    /// Overlays environment variable overrides onto [`CoordinatorConfig::default`].
    ///
    /// Unset or unparsable variables fall back to the default value for that
    /// field; this mirrors the forgiving env-overlay style used throughout
    /// the pack rather than failing hard on a bad `.env` file.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_usize("MAX_CONNECTIONS") {
            cfg.max_connections = v;
        }
        if let Some(v) = env_bool("POOLING_ENABLED") {
            cfg.pooling_enabled = v;
        }
        if let Some(v) = env_millis("CONN_TIMEOUT_MS") {
            cfg.conn_timeout = v;
        }
        if let Some(v) = env_millis("TOTAL_TIMEOUT_MS") {
            cfg.total_timeout = v;
        }
        if let Some(v) = env_millis("GRACEFUL_CLOSE_MS") {
            cfg.graceful_close = v;
        }
        if let Some(v) = env_usize("MAX_RETRIES") {
            cfg.max_retries = v as u32;
        }
        if let Some(v) = env_millis("BASE_RETRY_MS") {
            cfg.base_retry_delay = v;
        }
        if let Some(v) = env_millis("MAX_RETRY_MS") {
            cfg.max_retry_delay = v;
        }
        if let Some(v) = env_usize("BREAKER_FAILURES") {
            cfg.breaker_failure_threshold = v as u32;
        }
        if let Some(v) = env_millis("BREAKER_RECOVERY_MS") {
            cfg.breaker_recovery_timeout = v;
        }
        if let Some(v) = env_usize("BREAKER_PROBES") {
            cfg.breaker_test_request_limit = v as u32;
        }
        if let Some(v) = env_usize("MAX_BUFFER_BYTES") {
            cfg.max_buffer_bytes = v;
        }
        if let Ok(v) = env::var("WARN_THRESHOLD") {
            if let Ok(v) = v.parse::<f64>() {
                cfg.warn_threshold = v;
            }
        }
        if let Some(v) = env_millis("CLEANUP_MS") {
            cfg.cleanup_interval = v;
        } else {
            cfg.cleanup_interval = (cfg.graceful_close * 2).max(Duration::from_millis(5_000));
        }
        if let Some(v) = env_usize("MAX_TEXT_CHARS") {
            cfg.max_text_chars = v;
        }
        if let Some(v) = env_usize("MAX_SSML_BYTES") {
            cfg.max_ssml_bytes = v;
        }

        cfg
    }

    /// Validates the configuration, rejecting zero-valued counters that
    /// would make the coordinator unable to admit anything or the breaker
    /// unable to ever recover.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be >= 1".to_string());
        }
        // Zero retries is a valid (if aggressive) policy, so it isn't rejected here.
        if self.breaker_failure_threshold == 0 {
            return Err("breaker_failure_threshold must be >= 1".to_string());
        }
        if self.breaker_test_request_limit == 0 {
            return Err("breaker_test_request_limit must be >= 1".to_string());
        }
        if self.max_buffer_bytes == 0 {
            return Err("max_buffer_bytes must be >= 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.warn_threshold) {
            return Err("warn_threshold must be in [0.0, 1.0]".to_string());
        }
        if self.max_text_chars == 0 {
            return Err("max_text_chars must be >= 1".to_string());
        }
        if self.max_ssml_bytes == 0 {
            return Err("max_ssml_bytes must be >= 1".to_string());
        }
        Ok(())
    }
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok()?.parse().ok()
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name).ok()?.parse().ok()
}

fn env_millis(name: &str) -> Option<Duration> {
    env_usize(name).map(|ms| Duration::from_millis(ms as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let cfg = CoordinatorConfig::default();
        assert_eq!(cfg.max_connections, 1);
        assert!(!cfg.pooling_enabled);
        assert_eq!(cfg.conn_timeout, Duration::from_millis(10_000));
        assert_eq!(cfg.total_timeout, Duration::from_millis(30_000));
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.breaker_failure_threshold, 5);
        assert_eq!(cfg.breaker_test_request_limit, 3);
        assert_eq!(cfg.max_buffer_bytes, 16_777_216);
        assert_eq!(cfg.max_text_chars, 4_000);
        assert_eq!(cfg.max_ssml_bytes, 65_536);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_profile_overrides_only_retry_timings() {
        let cfg = CoordinatorConfig::test_profile();
        assert_eq!(cfg.base_retry_delay, Duration::from_millis(50));
        assert_eq!(cfg.max_retry_delay, Duration::from_millis(1_000));
        assert_eq!(cfg.max_connections, 1);
    }

    #[test]
    fn validate_rejects_zero_max_connections() {
        let mut cfg = CoordinatorConfig::default();
        cfg.max_connections = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_warn_threshold() {
        let mut cfg = CoordinatorConfig::default();
        cfg.warn_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }
}
