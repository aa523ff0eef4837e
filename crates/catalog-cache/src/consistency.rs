//! Hit/miss/staleness accounting and refresh-ahead.
//!
//! Counters are process-local and reset on restart. Staleness is a TTL
//! heuristic: a value whose remaining lifetime dropped below the refresh
//! threshold is still served, it only triggers a background reload.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashSet;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::client::CacheClient;
use crate::metrics;

/// Point-in-time view of the tracker counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConsistencyMetrics {
    pub hits: u64,
    pub misses: u64,
    pub stale_reads: u64,
    pub consistency_errors: u64,
    /// `hits / (hits + misses)`, `0.0` before the first read.
    pub hit_rate: f64,
    /// `max(0, 100 - 100 * errors / (hits + misses))`, `100.0` before the first read.
    pub consistency_score: f64,
}

impl ConsistencyMetrics {
    fn compute(hits: u64, misses: u64, stale_reads: u64, consistency_errors: u64) -> Self {
        let reads = hits + misses;
        let (hit_rate, consistency_score) = if reads == 0 {
            (0.0, 100.0)
        } else {
            let reads = reads as f64;
            (
                hits as f64 / reads,
                (100.0 - 100.0 * consistency_errors as f64 / reads).max(0.0),
            )
        };
        Self {
            hits,
            misses,
            stale_reads,
            consistency_errors,
            hit_rate,
            consistency_score,
        }
    }
}

/// Owns the consistency counters and runs background refreshes.
///
/// Shared as `Arc<ConsistencyTracker>`; spawned refreshes keep their own clone.
pub struct ConsistencyTracker {
    client: CacheClient,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_reads: AtomicU64,
    consistency_errors: AtomicU64,
    /// Keys with a refresh currently running in this process.
    refreshing: DashSet<String>,
}

impl ConsistencyTracker {
    pub fn new(client: CacheClient) -> Self {
        Self {
            client,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_reads: AtomicU64::new(0),
            consistency_errors: AtomicU64::new(0),
            refreshing: DashSet::new(),
        }
    }

    pub fn track_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_hit();
        self.publish_score();
    }

    pub fn track_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_miss();
        self.publish_score();
    }

    pub fn track_stale_read(&self) {
        self.stale_reads.fetch_add(1, Ordering::Relaxed);
        metrics::record_stale_read();
    }

    pub fn track_error(&self) {
        self.consistency_errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_consistency_error();
        self.publish_score();
    }

    pub fn snapshot(&self) -> ConsistencyMetrics {
        ConsistencyMetrics::compute(
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.stale_reads.load(Ordering::Relaxed),
            self.consistency_errors.load(Ordering::Relaxed),
        )
    }

    fn publish_score(&self) {
        metrics::set_consistency_score(self.snapshot().consistency_score);
    }

    /// True if `key` is cached with a remaining TTL at or below `threshold`.
    ///
    /// A missing key, a key without expiry, or an unreachable store is never stale.
    pub async fn is_stale(&self, key: &str, threshold: Duration) -> bool {
        self.client
            .ttl(key)
            .await
            .is_some_and(|remaining| remaining <= threshold)
    }

    /// Serve the cached value for `key`, refreshing it in the background when
    /// its remaining TTL is at or below `threshold`.
    ///
    /// With nothing cached, `loader` runs inline and its result is stored with
    /// `ttl` before returning. A loader returning `None` caches nothing.
    pub async fn refresh_ahead<F, Fut, E>(
        self: &Arc<Self>,
        key: &str,
        loader: F,
        ttl: Duration,
        threshold: Duration,
    ) -> Result<Option<Arc<Vec<u8>>>, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<Vec<u8>>, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        if let Some(cached) = self.client.get(key).await {
            self.track_hit();
            if self.is_stale(key, threshold).await {
                self.track_stale_read();
                tracing::debug!(key = %key, "stale read, refreshing ahead");
                let _ = self.spawn_refresh(key, loader, ttl);
            }
            return Ok(Some(cached));
        }

        self.track_miss();
        match loader().await? {
            Some(bytes) => {
                let value = Arc::new(bytes);
                self.client.set(key, value.to_vec(), Some(ttl)).await;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Reload `key` on a detached task and write the result back with `ttl`.
    ///
    /// Returns `None` without spawning when a refresh of the same key is
    /// already running in this process. Loader failures are logged and counted
    /// inside the task; the cached value is left to expire on its own.
    pub fn spawn_refresh<F, Fut, E>(
        self: &Arc<Self>,
        key: &str,
        loader: F,
        ttl: Duration,
    ) -> Option<JoinHandle<()>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<Vec<u8>>, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        if !self.refreshing.insert(key.to_string()) {
            tracing::trace!(key = %key, "refresh already in flight");
            metrics::record_refresh_ahead("skipped");
            return None;
        }

        let tracker = Arc::clone(self);
        let key = key.to_string();
        Some(tokio::spawn(async move {
            let _in_flight = InFlight {
                tracker: &tracker,
                key: &key,
            };
            match loader().await {
                Ok(Some(bytes)) => {
                    tracker.client.set(&key, bytes, Some(ttl)).await;
                    metrics::record_refresh_ahead("ok");
                    tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "refreshed ahead of expiry");
                }
                Ok(None) => {
                    tracker.client.delete(&key).await;
                    metrics::record_refresh_ahead("ok");
                    tracing::debug!(key = %key, "record gone, dropped cached value");
                }
                Err(e) => {
                    tracker.track_error();
                    metrics::record_refresh_ahead("error");
                    tracing::warn!(key = %key, error = %e, "background refresh failed");
                }
            }
        }))
    }
}

/// Clears the in-flight marker even if the loader panics.
struct InFlight<'a> {
    tracker: &'a ConsistencyTracker,
    key: &'a str,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.tracker.refreshing.remove(self.key);
    }
}

impl std::fmt::Debug for ConsistencyTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistencyTracker")
            .field("metrics", &self.snapshot())
            .field("refreshing", &self.refreshing.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> Arc<ConsistencyTracker> {
        Arc::new(ConsistencyTracker::new(CacheClient::new_local()))
    }

    #[test]
    fn test_empty_tracker_scores() {
        let m = ConsistencyTracker::new(CacheClient::new_local()).snapshot();
        assert_eq!(m.hit_rate, 0.0);
        assert_eq!(m.consistency_score, 100.0);
    }

    #[test]
    fn test_hit_rate_and_score() {
        let t = ConsistencyTracker::new(CacheClient::new_local());
        for _ in 0..3 {
            t.track_hit();
        }
        t.track_miss();
        t.track_error();

        let m = t.snapshot();
        assert_eq!((m.hits, m.misses, m.consistency_errors), (3, 1, 1));
        assert!((m.hit_rate - 0.75).abs() < f64::EPSILON);
        assert!((m.consistency_score - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_score_never_negative() {
        let t = ConsistencyTracker::new(CacheClient::new_local());
        t.track_miss();
        t.track_error();
        t.track_error();
        assert_eq!(t.snapshot().consistency_score, 0.0);
    }

    #[tokio::test]
    async fn test_is_stale_uses_remaining_ttl() {
        let t = tracker();
        let threshold = Duration::from_secs(300);
        t.client.set("fresh", vec![1], Some(Duration::from_secs(1800))).await;
        t.client.set("old", vec![1], Some(Duration::from_secs(250))).await;
        t.client.set("forever", vec![1], None).await;

        assert!(!t.is_stale("fresh", threshold).await);
        assert!(t.is_stale("old", threshold).await);
        assert!(!t.is_stale("forever", threshold).await);
        assert!(!t.is_stale("absent", threshold).await);
    }

    #[tokio::test]
    async fn test_refresh_ahead_loads_inline_on_miss() {
        let t = tracker();
        let value = t
            .refresh_ahead(
                "k",
                || async { Ok::<_, String>(Some(b"v".to_vec())) },
                Duration::from_secs(60),
                Duration::from_secs(10),
            )
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some(&b"v".to_vec()));
        assert!(t.client.get("k").await.is_some());
        assert_eq!(t.snapshot().misses, 1);
    }

    #[tokio::test]
    async fn test_refresh_ahead_propagates_inline_loader_error() {
        let t = tracker();
        let result = t
            .refresh_ahead(
                "k",
                || async { Err::<Option<Vec<u8>>, _>("store down".to_string()) },
                Duration::from_secs(60),
                Duration::from_secs(10),
            )
            .await;
        assert_eq!(result.unwrap_err(), "store down");
        assert!(t.client.get("k").await.is_none());
    }

    #[tokio::test]
    async fn test_background_failure_is_contained() {
        let t = tracker();
        t.client.set("k", b"old".to_vec(), Some(Duration::from_secs(5))).await;

        let handle = t
            .spawn_refresh(
                "k",
                || async { Err::<Option<Vec<u8>>, _>("boom") },
                Duration::from_secs(60),
            )
            .unwrap();
        handle.await.unwrap();

        assert_eq!(t.client.get("k").await.as_deref(), Some(&b"old".to_vec()));
        assert_eq!(t.snapshot().consistency_errors, 1);
        assert!(t.refreshing.is_empty());
    }

    #[tokio::test]
    async fn test_second_refresh_of_same_key_is_skipped() {
        let t = tracker();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let first = t
            .spawn_refresh(
                "k",
                move || async move {
                    let _ = rx.await;
                    Ok::<_, String>(Some(b"new".to_vec()))
                },
                Duration::from_secs(60),
            )
            .unwrap();

        let second = t.spawn_refresh(
            "k",
            || async { Ok::<_, String>(Some(b"other".to_vec())) },
            Duration::from_secs(60),
        );
        assert!(second.is_none());

        tx.send(()).unwrap();
        first.await.unwrap();
        assert_eq!(t.client.get("k").await.as_deref(), Some(&b"new".to_vec()));
    }

    #[tokio::test]
    async fn test_refresh_with_missing_record_drops_key() {
        let t = tracker();
        t.client.set("k", b"old".to_vec(), Some(Duration::from_secs(5))).await;
        t.spawn_refresh("k", || async { Ok::<_, String>(None) }, Duration::from_secs(60))
            .unwrap()
            .await
            .unwrap();
        assert!(t.client.get("k").await.is_none());
    }
}
