use std::net::SocketAddr;
use std::time::Duration;

use catalog_core::RetryPolicy;
use serde::{Deserialize, Serialize};

use crate::accessor::{CacheAsidePolicy, ContentionPolicy};
use crate::events::{DOMAIN_EVENTS_CHANNEL, INVALIDATION_CHANNEL};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,
    /// Cache-aside TTLs and stampede protection
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Event channels and handler retry budget
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        // Redis validations
        if self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if self.redis.timeout_ms == 0 || self.redis.command_timeout_ms == 0 {
            return Err("redis timeouts must be > 0".into());
        }
        // Cache validations
        if self.cache.ttl_secs == 0 || self.cache.list_ttl_secs == 0 {
            return Err("cache TTLs must be > 0".into());
        }
        if self.cache.refresh_threshold_secs >= self.cache.ttl_secs {
            return Err("cache.refresh_threshold_secs must be < cache.ttl_secs".into());
        }
        if !(0.0..1.0).contains(&self.cache.jitter_ratio) {
            return Err("cache.jitter_ratio must be in [0, 1)".into());
        }
        if self.cache.lock_ttl_ms == 0 {
            return Err("cache.lock_ttl_ms must be > 0".into());
        }
        // Rate limit validations
        if self.rate_limit.enabled && (self.rate_limit.limit == 0 || self.rate_limit.window_secs == 0) {
            return Err("rate_limit.limit and rate_limit.window_secs must be > 0".into());
        }
        // Events validation
        if self.events.channel.is_empty() || self.events.invalidation_channel.is_empty() {
            return Err("events channels must not be empty".into());
        }
        if self.events.base_delay_ms > self.events.max_delay_ms {
            return Err("events.base_delay_ms must be <= events.max_delay_ms".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

/// Admin HTTP endpoint of the worker (`/health`, `/metrics`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    9464
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| format!("invalid server address: {e}"))
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (falls back to the in-process store without it)
    #[serde(default)]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Pool wait/create timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Upper bound for a single cache command, kept well below request timeouts
    #[serde(default = "default_redis_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_redis_command_timeout_ms() -> u64 {
    250
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            command_timeout_ms: default_redis_command_timeout_ms(),
        }
    }
}

impl RedisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContentionMode {
    #[default]
    BackoffRetry,
    DirectLoad,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_list_ttl_secs")]
    pub list_ttl_secs: u64,
    #[serde(default = "default_refresh_threshold_secs")]
    pub refresh_threshold_secs: u64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,
    #[serde(default)]
    pub contention: ContentionMode,
    /// Backoff before the single lock retry (`backoff_retry` only)
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_ttl_secs() -> u64 {
    1800
}
fn default_list_ttl_secs() -> u64 {
    300
}
fn default_refresh_threshold_secs() -> u64 {
    300
}
fn default_jitter_ratio() -> f64 {
    0.15
}
fn default_lock_ttl_ms() -> u64 {
    10_000
}
fn default_backoff_ms() -> u64 {
    50
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            list_ttl_secs: default_list_ttl_secs(),
            refresh_threshold_secs: default_refresh_threshold_secs(),
            jitter_ratio: default_jitter_ratio(),
            lock_ttl_ms: default_lock_ttl_ms(),
            contention: ContentionMode::default(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl CacheConfig {
    pub fn policy(&self) -> CacheAsidePolicy {
        let contention = match self.contention {
            ContentionMode::BackoffRetry => ContentionPolicy::BackoffRetry {
                backoff: Duration::from_millis(self.backoff_ms),
            },
            ContentionMode::DirectLoad => ContentionPolicy::DirectLoad,
        };
        CacheAsidePolicy {
            ttl: Duration::from_secs(self.ttl_secs),
            list_ttl: Duration::from_secs(self.list_ttl_secs),
            refresh_threshold: Duration::from_secs(self.refresh_threshold_secs),
            jitter_ratio: self.jitter_ratio,
            lock_ttl: Duration::from_millis(self.lock_ttl_ms),
            contention,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_limit")]
    pub limit: u64,
    /// Separate windows per request path
    #[serde(default)]
    pub per_endpoint: bool,
}

fn default_true() -> bool {
    true
}
fn default_window_secs() -> u64 {
    60
}
fn default_limit() -> u64 {
    100
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: default_window_secs(),
            limit: default_limit(),
            per_endpoint: false,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_events_channel")]
    pub channel: String,
    #[serde(default = "default_invalidation_channel")]
    pub invalidation_channel: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

fn default_events_channel() -> String {
    DOMAIN_EVENTS_CHANNEL.into()
}
fn default_invalidation_channel() -> String {
    INVALIDATION_CHANNEL.into()
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    100
}
fn default_max_delay_ms() -> u64 {
    5000
}
fn default_attempt_timeout_ms() -> u64 {
    30_000
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: default_events_channel(),
            invalidation_channel: default_invalidation_channel(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

impl EventsConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of the human-readable format
    #[serde(default)]
    pub json: bool,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default config file looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "catalog-cache.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        } else if path.is_some() {
            return Err(format!("config file not found: {}", file.display()));
        }
        // Environment variable overrides, e.g., CATALOG_CACHE__REDIS__ENABLED=true
        builder = builder.add_source(
            Environment::with_prefix("CATALOG_CACHE")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
