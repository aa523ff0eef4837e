//! Key-value cache client.
//!
//! ## Cache Modes
//!
//! - **Local**: single-instance mode backed by an in-process [`LocalStore`]
//! - **Redis**: multi-instance mode backed by a shared Redis server
//!
//! ## Graceful Degradation
//!
//! Every operation can fail (network, pool exhaustion, timeout). Callers must
//! read a failure as "cache unavailable", never as "value absent". The plain
//! methods (`get`, `set`, `delete`, ...) already do that: reads return `None`,
//! writes become no-ops, and a warning is logged, so the cache degrades to
//! pass-through. The `try_*` methods surface the error for components that
//! need their own failure policy (lock, rate limiter).

pub mod local;
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::broadcast;

pub use self::local::LocalStore;
pub use self::redis::{MessageStream, RedisStore};

/// Errors from the key-value store.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis pool error: {0}")]
    Pool(String),

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("cache command timed out after {0:?}")]
    Timeout(Duration),

    #[error("key '{0}' holds a value of the wrong type")]
    WrongType(String),

    #[error("invalid key pattern: {0}")]
    Pattern(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result of one sliding-window step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Entries inside the window before this request.
    pub count: u64,
    /// Whether this request was recorded.
    pub admitted: bool,
    /// Score (unix millis) of the oldest entry still in the window.
    pub oldest_ms: Option<u64>,
}

/// A live subscription to one channel.
pub enum Subscription {
    Local(broadcast::Receiver<Vec<u8>>),
    Redis(MessageStream),
}

impl Subscription {
    /// Next payload, or `None` once the underlying connection is gone.
    pub async fn next_message(&mut self) -> Option<Vec<u8>> {
        match self {
            Subscription::Local(rx) => loop {
                match rx.recv().await {
                    Ok(payload) => return Some(payload),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "local subscriber lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
            Subscription::Redis(stream) => stream
                .next()
                .await
                .map(|msg| msg.get_payload_bytes().to_vec()),
        }
    }
}

/// Shared, cheaply clonable handle to the key-value store.
#[derive(Clone)]
pub enum CacheClient {
    /// Single-instance: in-process store only
    Local(Arc<LocalStore>),

    /// Multi-instance: shared Redis
    Redis(RedisStore),
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheClient::Local(store) => f.debug_tuple("Local").field(&store.len()).finish(),
            CacheClient::Redis(store) => f.debug_tuple("Redis").field(&store.url()).finish(),
        }
    }
}

impl CacheClient {
    /// Create a new local-only client.
    ///
    /// Inside a Tokio runtime this also starts the expired-key sweep.
    pub fn new_local() -> Self {
        let store = Arc::new(LocalStore::new());
        if tokio::runtime::Handle::try_current().is_ok() {
            store.start_cleanup_task(local::CLEANUP_INTERVAL);
        }
        CacheClient::Local(store)
    }

    /// Create a new Redis-backed client.
    pub fn new_redis(store: RedisStore) -> Self {
        CacheClient::Redis(store)
    }

    pub fn mode(&self) -> &'static str {
        match self {
            CacheClient::Local(_) => "local",
            CacheClient::Redis(_) => "redis",
        }
    }

    /// Check if the backing store answers (for health checks).
    pub async fn is_available(&self) -> bool {
        match self {
            CacheClient::Local(_) => true,
            CacheClient::Redis(store) => store.ping().await.is_ok(),
        }
    }

    /// Get the local store reference (for testing/internal use).
    pub fn local_store(&self) -> Option<&Arc<LocalStore>> {
        match self {
            CacheClient::Local(store) => Some(store),
            CacheClient::Redis(_) => None,
        }
    }

    // ==================== Fallible operations ====================

    pub async fn try_get(&self, key: &str) -> Result<Option<Arc<Vec<u8>>>, CacheError> {
        match self {
            CacheClient::Local(store) => store.get(key),
            CacheClient::Redis(store) => Ok(store.get(key).await?.map(Arc::new)),
        }
    }

    pub async fn try_set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        match self {
            CacheClient::Local(store) => {
                store.set(key, value, ttl);
                Ok(())
            }
            CacheClient::Redis(store) => store.set(key, &value, ttl).await,
        }
    }

    /// Returns the number of keys that existed.
    pub async fn try_delete_many(&self, keys: &[String]) -> Result<usize, CacheError> {
        match self {
            CacheClient::Local(store) => Ok(keys.iter().filter(|k| store.delete(k)).count()),
            CacheClient::Redis(store) => store.delete(keys).await,
        }
    }

    pub async fn try_keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        match self {
            CacheClient::Local(store) => store.keys_matching(pattern),
            CacheClient::Redis(store) => store.keys_matching(pattern).await,
        }
    }

    pub async fn try_increment(&self, key: &str) -> Result<i64, CacheError> {
        match self {
            CacheClient::Local(store) => store.increment(key),
            CacheClient::Redis(store) => store.increment(key).await,
        }
    }

    /// Atomic "set if not exists, with expiry". Returns `true` only if this call created the key.
    pub async fn try_set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        match self {
            CacheClient::Local(store) => Ok(store.set_if_absent(key, value.to_vec(), ttl)),
            CacheClient::Redis(store) => store.set_if_absent(key, value, ttl).await,
        }
    }

    pub async fn try_ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        match self {
            CacheClient::Local(store) => Ok(store.ttl(key)),
            CacheClient::Redis(store) => store.ttl(key).await,
        }
    }

    /// Delete `key` only if it currently holds `expected`.
    pub async fn try_compare_and_delete(
        &self,
        key: &str,
        expected: &[u8],
    ) -> Result<bool, CacheError> {
        match self {
            CacheClient::Local(store) => Ok(store.compare_and_delete(key, expected)),
            CacheClient::Redis(store) => store.compare_and_delete(key, expected).await,
        }
    }

    /// Atomic sliding-window step, see [`WindowState`].
    pub async fn try_sliding_window(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
        member: &str,
    ) -> Result<WindowState, CacheError> {
        match self {
            CacheClient::Local(store) => store.sliding_window(key, now_ms, window, limit, member),
            CacheClient::Redis(store) => {
                store
                    .sliding_window(key, now_ms, window, limit, member)
                    .await
            }
        }
    }

    /// Returns the number of subscribers that received the payload.
    pub async fn try_publish(&self, channel: &str, payload: Vec<u8>) -> Result<usize, CacheError> {
        match self {
            CacheClient::Local(store) => Ok(store.publish(channel, payload)),
            CacheClient::Redis(store) => store.publish(channel, &payload).await,
        }
    }

    /// Subscribe to `channel` on a dedicated connection.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscription, CacheError> {
        match self {
            CacheClient::Local(store) => Ok(Subscription::Local(store.subscribe(channel))),
            CacheClient::Redis(store) => Ok(Subscription::Redis(store.subscribe(channel).await?)),
        }
    }

    // ==================== Degrading operations ====================

    /// Get a value; any store failure reads as a miss.
    pub async fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        match self.try_get(key).await {
            Ok(value) => value,
            Err(e) => {
                degraded("get", key, &e);
                None
            }
        }
    }

    /// Set a value; any store failure is logged and ignored.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        if let Err(e) = self.try_set(key, value, ttl).await {
            degraded("set", key, &e);
        }
    }

    /// Delete a key. Returns `true` if it existed.
    pub async fn delete(&self, key: &str) -> bool {
        match self.try_delete_many(&[key.to_string()]).await {
            Ok(n) => n > 0,
            Err(e) => {
                degraded("delete", key, &e);
                false
            }
        }
    }

    pub async fn keys_matching(&self, pattern: &str) -> Vec<String> {
        match self.try_keys_matching(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                degraded("keys_matching", pattern, &e);
                Vec::new()
            }
        }
    }

    /// Delete every key matching a glob pattern. Returns how many were removed.
    pub async fn delete_matching(&self, pattern: &str) -> usize {
        let keys = match self.try_keys_matching(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                degraded("delete_matching", pattern, &e);
                return 0;
            }
        };
        match self.try_delete_many(&keys).await {
            Ok(n) => {
                tracing::debug!(pattern = %pattern, deleted = n, "pattern invalidated");
                n
            }
            Err(e) => {
                degraded("delete_matching", pattern, &e);
                0
            }
        }
    }

    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        match self.try_ttl(key).await {
            Ok(ttl) => ttl,
            Err(e) => {
                degraded("ttl", key, &e);
                None
            }
        }
    }

    /// Increment a counter. `None` if the store is unavailable.
    pub async fn increment(&self, key: &str) -> Option<i64> {
        match self.try_increment(key).await {
            Ok(n) => Some(n),
            Err(e) => {
                degraded("increment", key, &e);
                None
            }
        }
    }
}

fn degraded(operation: &'static str, key: &str, error: &CacheError) {
    tracing::warn!(operation, key = %key, error = %error, "cache store unavailable, degrading to pass-through");
    crate::metrics::record_store_error(operation);
}
