//! Redis-backed key-value operations.
//!
//! Commands go through the shared `deadpool_redis` pool. Pub/sub needs its own
//! connection because a subscribed Redis connection accepts no other commands.
//! Every call is bounded by the configured command timeout.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use deadpool_redis::{Connection, Pool};
use futures_util::Stream;
use redis::{RedisResult, Script};

use super::{CacheError, WindowState};

/// Deletes a key only if it still holds the caller's token.
static COMPARE_AND_DELETE: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
",
    )
});

/// Prune entries older than `now - window`, count the rest, add the new entry
/// only if under the limit, and refresh the key's expiry.
///
/// Returns `{count_before_add, admitted, oldest_score_or_-1}`.
static SLIDING_WINDOW: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local admitted = 0
if count < limit then
    redis.call('ZADD', key, now, member)
    admitted = 1
end
redis.call('PEXPIRE', key, window)

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_score = -1
if oldest[2] then
    oldest_score = tonumber(oldest[2])
end
return {count, admitted, oldest_score}
",
    )
});

/// Page size hint for `SCAN`.
const SCAN_COUNT: usize = 200;

/// Stream of raw pub/sub payloads.
pub type MessageStream = Pin<Box<dyn Stream<Item = redis::Msg> + Send>>;

/// Pooled Redis access with a per-command timeout.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    url: Arc<str>,
    timeout: Duration,
}

impl RedisStore {
    pub fn new(pool: Pool, url: impl Into<Arc<str>>, timeout: Duration) -> Self {
        Self {
            pool,
            url: url.into(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one command on a pooled connection, bounded by the command timeout.
    async fn run<T, F, Fut>(&self, f: F) -> Result<T, CacheError>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let call = async {
            let conn = self
                .pool
                .get()
                .await
                .map_err(|e| CacheError::Pool(e.to_string()))?;
            f(conn).await.map_err(CacheError::from)
        };
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| CacheError::Timeout(self.timeout))?
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        let _: String = self
            .run(|mut conn| async move { redis::cmd("PING").query_async(&mut conn).await })
            .await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.run(|mut conn| async move { redis::cmd("GET").arg(key).query_async(&mut conn).await })
            .await
    }

    pub async fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.run(|mut conn| async move {
            let mut cmd = redis::cmd("SET");
            cmd.arg(key).arg(value);
            if let Some(ttl) = ttl {
                cmd.arg("PX").arg(ttl_millis(ttl));
            }
            cmd.query_async(&mut conn).await
        })
        .await
    }

    pub async fn delete(&self, keys: &[String]) -> Result<usize, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.run(|mut conn| async move { redis::cmd("DEL").arg(keys).query_async(&mut conn).await })
            .await
    }

    /// Collect keys via `SCAN MATCH` so large keyspaces are never blocked by `KEYS`.
    ///
    /// Each page is its own command under the command timeout, so the walk as
    /// a whole may take longer than one timeout.
    pub async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch) = self.scan_page(cursor, pattern).await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn scan_page(&self, cursor: u64, pattern: &str) -> Result<(u64, Vec<String>), CacheError> {
        self.run(|mut conn| async move {
            redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    pub async fn increment(&self, key: &str) -> Result<i64, CacheError> {
        self.run(|mut conn| async move { redis::cmd("INCR").arg(key).query_async(&mut conn).await })
            .await
    }

    pub async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let reply: Option<String> = self
            .run(|mut conn| async move {
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn)
                    .await
            })
            .await?;
        Ok(reply.is_some())
    }

    /// `PTTL`: `-2` for a missing key, `-1` for a key without expiry.
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let millis: i64 = self
            .run(|mut conn| async move { redis::cmd("PTTL").arg(key).query_async(&mut conn).await })
            .await?;
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    pub async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool, CacheError> {
        let deleted: i64 = self
            .run(|mut conn| async move {
                COMPARE_AND_DELETE
                    .key(key)
                    .arg(expected)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;
        Ok(deleted > 0)
    }

    pub async fn sliding_window(
        &self,
        key: &str,
        now_ms: u64,
        window: Duration,
        limit: u64,
        member: &str,
    ) -> Result<WindowState, CacheError> {
        let reply: Vec<i64> = self
            .run(|mut conn| async move {
                SLIDING_WINDOW
                    .key(key)
                    .arg(now_ms)
                    .arg(ttl_millis(window))
                    .arg(limit)
                    .arg(member)
                    .invoke_async(&mut conn)
                    .await
            })
            .await?;

        match reply.as_slice() {
            [count, admitted, oldest] => Ok(WindowState {
                count: (*count).max(0) as u64,
                admitted: *admitted == 1,
                oldest_ms: (*oldest >= 0).then_some(*oldest as u64),
            }),
            other => Err(CacheError::Serialization(format!(
                "unexpected sliding window reply: {other:?}"
            ))),
        }
    }

    pub async fn publish(&self, channel: &str, payload: &[u8]) -> Result<usize, CacheError> {
        self.run(|mut conn| async move {
            redis::cmd("PUBLISH")
                .arg(channel)
                .arg(payload)
                .query_async(&mut conn)
                .await
        })
        .await
    }

    /// Open a dedicated pub/sub connection subscribed to `channel`.
    pub async fn subscribe(&self, channel: &str) -> Result<MessageStream, CacheError> {
        let connect = async {
            let client = redis::Client::open(self.url.as_ref())?;
            let mut pubsub = client.get_async_pubsub().await?;
            pubsub.subscribe(channel).await?;
            RedisResult::Ok(pubsub)
        };
        let pubsub = tokio::time::timeout(self.timeout, connect)
            .await
            .map_err(|_| CacheError::Timeout(self.timeout))??;
        Ok(Box::pin(pubsub.into_on_message()))
    }
}

/// Redis rejects a zero `PX`, so sub-millisecond TTLs round up to 1ms.
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}
