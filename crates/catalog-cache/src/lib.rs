//! Consistency-aware caching and admission control for the catalog backend.
//!
//! - [`client`]: key-value store access (in-process or Redis), degrading to pass-through
//! - [`lock`]: token-checked distributed lock for cache repopulation
//! - [`consistency`]: hit/miss/staleness counters and refresh-ahead
//! - [`accessor`]: cache-aside reads, write-through mutations, stampede protection
//! - [`rate_limit`]: sliding-window limiter and its axum middleware
//! - [`events`]: domain event publisher, subscriber, and built-in handlers
//!
//! A single [`CacheClient`] is built at startup with [`create_cache_client`]
//! and passed to every component that needs it.

pub mod accessor;
pub mod client;
pub mod config;
pub mod consistency;
pub mod events;
pub mod lock;
pub mod metrics;
pub mod observability;
pub mod rate_limit;

pub use accessor::{CacheAside, CacheAsidePolicy, CacheOutcome, ContentionPolicy, jittered_ttl};
pub use client::{CacheClient, CacheError, RedisStore};
pub use config::{AppConfig, RedisConfig};
pub use consistency::{ConsistencyMetrics, ConsistencyTracker};
pub use events::{
    AuditLogHandler, CacheInvalidationHandler, EventError, EventPublisher, EventSubscriber,
};
pub use lock::{DistributedLock, LockGuard};
pub use rate_limit::{RateLimitDecision, RateLimitState, RateLimitSubject, RateLimiter};

/// Build a pooled Redis store from config without connecting.
pub fn build_redis_store(config: &RedisConfig) -> Result<RedisStore, CacheError> {
    let mut pool_config = deadpool_redis::PoolConfig::new(config.pool_size);
    pool_config.timeouts.wait = Some(config.timeout());
    pool_config.timeouts.create = Some(config.timeout());
    pool_config.timeouts.recycle = Some(config.timeout());

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    redis_config.pool = Some(pool_config);

    let pool = redis_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| CacheError::Pool(e.to_string()))?;
    Ok(RedisStore::new(
        pool,
        config.url.as_str(),
        config.command_timeout(),
    ))
}

/// Create the process-wide cache client.
///
/// Falls back to the in-process store when Redis is disabled, the pool
/// cannot be built, or the first round trip fails.
pub async fn create_cache_client(config: &RedisConfig) -> CacheClient {
    if !config.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return CacheClient::new_local();
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let store = match build_redis_store(config) {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to local cache."
            );
            return CacheClient::new_local();
        }
    };

    match store.ping().await {
        Ok(()) => {
            tracing::info!("Connected to Redis");
            CacheClient::new_redis(store)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to local cache."
            );
            CacheClient::new_local()
        }
    }
}
