//! Configuration management for toolroute
//!
//! Parses TOML configuration files and provides typed access to settings.

use crate::error::{AppError, AppResult};
use crate::router::RoutingStrategy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub registry: RegistryConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Default deadline applied to a request that does not carry its own
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_request_timeout() -> u64 {
    30
}

/// Where the backend registry document comes from
///
/// Exactly one of `path` and `url` must be set.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Interval between background refreshes; 0 disables the refresh task
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: u64,
}

fn default_refresh_interval() -> u64 {
    300
}

/// Connection pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
    #[serde(default = "default_pool_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Hard limit on concurrent leases per backend (unbounded when absent)
    #[serde(default)]
    pub max_in_flight_per_backend: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: default_idle_timeout(),
            sweep_interval_seconds: default_pool_sweep_interval(),
            max_in_flight_per_backend: None,
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_pool_sweep_interval() -> u64 {
    60
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    /// Interval of the active health probe; 0 disables probing
    #[serde(default = "default_probe_interval")]
    pub probe_interval_seconds: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            probe_interval_seconds: default_probe_interval(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

fn default_probe_interval() -> u64 {
    10
}

/// Routing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub strategy: RoutingStrategy,
    /// Smoothing factor for the response-time moving average, in (0, 1]
    #[serde(default = "default_ema_alpha")]
    pub latency_ema_alpha: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::default(),
            latency_ema_alpha: default_ema_alpha(),
        }
    }
}

fn default_ema_alpha() -> f64 {
    0.3
}

/// Result cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_primary_capacity")]
    pub primary_capacity: usize,
    #[serde(default = "default_ttl")]
    pub default_ttl_seconds: u64,
    #[serde(default)]
    pub secondary_enabled: bool,
    #[serde(default = "default_secondary_max_bytes")]
    pub secondary_max_bytes: usize,
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold_bytes: usize,
    #[serde(default = "default_cache_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            primary_capacity: default_primary_capacity(),
            default_ttl_seconds: default_ttl(),
            secondary_enabled: false,
            secondary_max_bytes: default_secondary_max_bytes(),
            compression_threshold_bytes: default_compression_threshold(),
            sweep_interval_seconds: default_cache_sweep_interval(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }
}

fn default_true() -> bool {
    true
}

fn default_primary_capacity() -> usize {
    100
}

fn default_ttl() -> u64 {
    300
}

fn default_secondary_max_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_compression_threshold() -> usize {
    4096
}

fn default_cache_sweep_interval() -> u64 {
    30
}

/// Retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Capacity of the bounded outcome channel feeding the state store
    #[serde(default = "default_outcome_channel_capacity")]
    pub outcome_channel_capacity: usize,
    /// Number of outcome records the state store keeps as history
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            outcome_channel_capacity: default_outcome_channel_capacity(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_outcome_channel_capacity() -> usize {
    1024
}

fn default_history_limit() -> usize {
    1000
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|source| AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            })?;

        let config: Self =
            toml::from_str(&content).map_err(|source| AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            })?;

        config
            .validate()
            .map_err(|e| AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Validate configuration after parsing
    ///
    /// Called by `from_file()` and `from_str()`; call it explicitly when a
    /// `Config` is assembled by other means.
    pub fn validate(&self) -> AppResult<()> {
        match (&self.registry.path, &self.registry.url) {
            (Some(_), Some(_)) => {
                return Err(AppError::Config(
                    "registry.path and registry.url are mutually exclusive".to_string(),
                ));
            }
            (None, None) => {
                return Err(AppError::Config(
                    "one of registry.path or registry.url must be set".to_string(),
                ));
            }
            (None, Some(url)) if !url.starts_with("http://") && !url.starts_with("https://") => {
                return Err(AppError::Config(format!(
                    "registry.url '{}' must start with 'http://' or 'https://'",
                    url
                )));
            }
            _ => {}
        }

        if self.server.request_timeout_seconds == 0 || self.server.request_timeout_seconds > 300 {
            return Err(AppError::Config(format!(
                "server.request_timeout_seconds must be in 1..=300, got {}",
                self.server.request_timeout_seconds
            )));
        }

        if self.pool.max_in_flight_per_backend == Some(0) {
            return Err(AppError::Config(
                "pool.max_in_flight_per_backend must be greater than 0 when set".to_string(),
            ));
        }
        if self.pool.idle_timeout_seconds == 0 {
            return Err(AppError::Config(
                "pool.idle_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.circuit_breaker.failure_threshold == 0 {
            return Err(AppError::Config(
                "circuit_breaker.failure_threshold must be greater than 0".to_string(),
            ));
        }

        let alpha = self.routing.latency_ema_alpha;
        if !alpha.is_finite() || alpha <= 0.0 || alpha > 1.0 {
            return Err(AppError::Config(format!(
                "routing.latency_ema_alpha must be in (0, 1], got {}",
                alpha
            )));
        }

        if self.cache.enabled && self.cache.primary_capacity == 0 {
            return Err(AppError::Config(
                "cache.primary_capacity must be greater than 0 when the cache is enabled"
                    .to_string(),
            ));
        }
        if self.cache.secondary_enabled && self.cache.secondary_max_bytes == 0 {
            return Err(AppError::Config(
                "cache.secondary_max_bytes must be greater than 0 when the secondary tier is enabled"
                    .to_string(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(AppError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(AppError::Config(format!(
                "retry.max_delay_ms ({}) cannot be smaller than retry.base_delay_ms ({})",
                self.retry.max_delay_ms, self.retry.base_delay_ms
            )));
        }

        if self.observability.outcome_channel_capacity == 0 {
            return Err(AppError::Config(
                "observability.outcome_channel_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config =
            toml::from_str(toml_str).map_err(|source| AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            })?;

        config.validate()?;
        Ok(config)
    }
}
