//! Cache-aside accessor with write-through and stampede protection.
//!
//! ## Read path
//!
//! ```text
//! CHECK_CACHE ──hit──► (stale? spawn refresh) ──► RETURN
//!      │ miss
//!      ▼
//! LOCK_WAIT ──acquired──► LOAD_SOURCE ──► POPULATE ──► RETURN
//!      │ contended
//!      ▼
//! ContentionPolicy: backoff, re-check, retry once ──► direct load (no populate)
//! ```
//!
//! ## Write path
//!
//! | Operation | Store first | Entity key      | List keys         | Event            |
//! |-----------|-------------|-----------------|-------------------|------------------|
//! | `create`  | yes         | written through | pattern-deleted   | `entity_created` |
//! | `update`  | yes         | deleted         | pattern-deleted   | `entity_updated` |
//! | `delete`  | yes         | deleted         | pattern-deleted   | `entity_deleted` |
//!
//! Cache or publish failures after a successful store write are logged and
//! never fail the operation. Record-store errors are returned verbatim and
//! leave the cache untouched. Not-found results are never cached.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use catalog_core::keys::{count_key, entity_key, list_key, list_pattern};
use catalog_core::{DomainEvent, Entity, ListFilter};
use catalog_storage::{RecordStore, StoreError};
use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::client::CacheClient;
use crate::consistency::ConsistencyTracker;
use crate::events::{DOMAIN_EVENTS_CHANNEL, EventPublisher};
use crate::lock::{DistributedLock, LockGuard};
use crate::metrics;

/// What a caller does when another process holds the repopulation lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentionPolicy {
    /// Poll every `backoff`: re-check the cache, then retry the lock. Gives
    /// up after the policy's `lock_ttl` and loads directly without populating.
    BackoffRetry { backoff: Duration },
    /// Load directly right away and skip populating.
    DirectLoad,
}

impl Default for ContentionPolicy {
    fn default() -> Self {
        ContentionPolicy::BackoffRetry {
            backoff: Duration::from_millis(50),
        }
    }
}

/// TTL and contention settings for one accessor.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheAsidePolicy {
    /// Base TTL for single entities.
    pub ttl: Duration,
    /// Base TTL for list and count results.
    pub list_ttl: Duration,
    /// Remaining TTL at or below which a hit triggers a background refresh.
    pub refresh_threshold: Duration,
    /// Every write-through TTL is scaled by a random factor in `1 ± jitter_ratio`.
    pub jitter_ratio: f64,
    /// Upper bound on how long a crashed loader can hold the lock.
    pub lock_ttl: Duration,
    pub contention: ContentionPolicy,
}

impl Default for CacheAsidePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(1800),
            list_ttl: Duration::from_secs(300),
            refresh_threshold: Duration::from_secs(300),
            jitter_ratio: 0.15,
            lock_ttl: Duration::from_secs(10),
            contention: ContentionPolicy::default(),
        }
    }
}

/// How a read was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from cache.
    Hit,
    /// Served from cache; a background refresh was triggered.
    StaleHit,
    /// Loaded from the store under the lock and written to cache.
    Loaded,
    /// Loaded from the store without populating (lock contended or unavailable).
    LoadedDirect,
}

/// Scale `base` by a random factor in `[1 - ratio, 1 + ratio]`.
///
/// Spreads out expiry of entries populated at the same moment.
pub fn jittered_ttl(base: Duration, ratio: f64) -> Duration {
    let ratio = ratio.clamp(0.0, 1.0);
    if ratio == 0.0 || base.is_zero() {
        return base;
    }
    let factor = 1.0 + rand::thread_rng().gen_range(-ratio..=ratio);
    Duration::from_secs_f64((base.as_secs_f64() * factor).max(0.001))
}

/// Cache-aside access to one entity type backed by a [`RecordStore`].
///
/// Cheap to share behind an `Arc`; every dependency is itself shared.
pub struct CacheAside<T: Entity, S: RecordStore<T> + ?Sized> {
    store: Arc<S>,
    client: CacheClient,
    lock: DistributedLock,
    tracker: Arc<ConsistencyTracker>,
    publisher: Option<EventPublisher>,
    policy: CacheAsidePolicy,
    _entity: PhantomData<fn() -> T>,
}

impl<T, S> CacheAside<T, S>
where
    T: Entity,
    S: RecordStore<T> + ?Sized + 'static,
{
    pub fn new(
        store: Arc<S>,
        client: CacheClient,
        tracker: Arc<ConsistencyTracker>,
        policy: CacheAsidePolicy,
    ) -> Self {
        let lock = DistributedLock::new(client.clone(), T::NAMESPACE, policy.lock_ttl);
        Self {
            store,
            client,
            lock,
            tracker,
            publisher: None,
            policy,
            _entity: PhantomData,
        }
    }

    /// Publish domain events for every mutation.
    pub fn with_publisher(mut self, publisher: EventPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn policy(&self) -> &CacheAsidePolicy {
        &self.policy
    }

    pub fn tracker(&self) -> &Arc<ConsistencyTracker> {
        &self.tracker
    }

    // ==================== Reads ====================

    pub async fn get(&self, id: &str) -> Result<Option<T>, StoreError> {
        self.get_traced(id).await.map(|(value, _)| value)
    }

    /// Like [`get`](Self::get), also reporting how the read was served.
    pub async fn get_traced(&self, id: &str) -> Result<(Option<T>, CacheOutcome), StoreError> {
        let store = Arc::clone(&self.store);
        let id = id.to_string();
        let key = entity_key(T::NAMESPACE, &id);
        self.load_with(&key, self.policy.ttl, move || {
            let store = Arc::clone(&store);
            let id = id.clone();
            async move { store.find_by_id(&id).await }
        })
        .await
    }

    /// One page of records matching `filter`, cached under the list key.
    pub async fn find_all(
        &self,
        filter: &ListFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<T>, StoreError> {
        let key = list_key(T::NAMESPACE, &filter.paged(offset, limit));
        let store = Arc::clone(&self.store);
        let filter = filter.clone();
        let (page, _) = self
            .load_with(&key, self.policy.list_ttl, move || {
                let store = Arc::clone(&store);
                let filter = filter.clone();
                async move { store.find_all(&filter, offset, limit).await.map(Some) }
            })
            .await?;
        Ok(page.unwrap_or_default())
    }

    /// Number of records matching `filter`, cached beside the lists so list
    /// invalidation covers it.
    pub async fn count(&self, filter: &ListFilter) -> Result<u64, StoreError> {
        let key = count_key(T::NAMESPACE, filter);
        let store = Arc::clone(&self.store);
        let filter = filter.clone();
        let (count, _) = self
            .load_with(&key, self.policy.list_ttl, move || {
                let store = Arc::clone(&store);
                let filter = filter.clone();
                async move { store.count(&filter).await.map(Some) }
            })
            .await?;
        Ok(count.unwrap_or(0))
    }

    /// Run the cache-aside read path for an arbitrary loader.
    ///
    /// `loader` may run more than once per call (never concurrently for the
    /// same key in one process while the lock is held), and once more later
    /// on a background task when a stale hit triggers a refresh.
    pub async fn load_with<V, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<(Option<V>, CacheOutcome), StoreError>
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<V>, StoreError>> + Send + 'static,
    {
        if let Some(value) = self.read_cached::<V>(key).await {
            self.tracker.track_hit();
            let outcome = if self
                .tracker
                .is_stale(key, self.policy.refresh_threshold)
                .await
            {
                self.tracker.track_stale_read();
                self.refresh_in_background(key, ttl, loader);
                CacheOutcome::StaleHit
            } else {
                CacheOutcome::Hit
            };
            return Ok((Some(value), outcome));
        }

        self.tracker.track_miss();
        tracing::debug!(key = %key, operation = "load", "cache miss");

        let result = match self.lock.acquire(key).await {
            Ok(Some(guard)) => self.load_locked(key, ttl, &loader, guard).await,
            Ok(None) => self.on_contention(key, ttl, &loader).await,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "lock unavailable, loading without cache");
                load_direct(&loader).await
            }
        };
        if let Err(e) = &result {
            tracing::warn!(
                key = %key,
                store = self.store.backend_name(),
                error = %e,
                "store load failed"
            );
        }
        result
    }

    async fn on_contention<V, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: &F,
    ) -> Result<(Option<V>, CacheOutcome), StoreError>
    where
        V: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<V>, StoreError>>,
    {
        metrics::record_lock_contention(T::NAMESPACE);

        let backoff = match self.policy.contention {
            ContentionPolicy::DirectLoad => {
                tracing::debug!(key = %key, "lock contended, loading directly");
                return load_direct(loader).await;
            }
            ContentionPolicy::BackoffRetry { backoff } => backoff,
        };

        tracing::debug!(key = %key, backoff_ms = backoff.as_millis() as u64, "lock contended, backing off");
        // The holder's lock expires by `lock_ttl` at the latest.
        let deadline = tokio::time::Instant::now() + self.policy.lock_ttl;
        loop {
            tokio::time::sleep(backoff).await;

            if let Some(value) = self.read_cached::<V>(key).await {
                return Ok((Some(value), CacheOutcome::Hit));
            }

            match self.lock.acquire(key).await {
                Ok(Some(guard)) => return self.load_locked(key, ttl, loader, guard).await,
                Ok(None) if tokio::time::Instant::now() < deadline => continue,
                Ok(None) => {
                    tracing::warn!(key = %key, "lock still held after waiting, loading without cache");
                    return load_direct(loader).await;
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "lock unavailable, loading without cache");
                    return load_direct(loader).await;
                }
            }
        }
    }

    /// LOAD_SOURCE + POPULATE while holding `guard`. The lock is released on
    /// every path, including loader errors.
    async fn load_locked<V, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: &F,
        guard: LockGuard,
    ) -> Result<(Option<V>, CacheOutcome), StoreError>
    where
        V: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<V>, StoreError>>,
    {
        // Another holder may have populated between our miss and the acquire.
        let result = match self.read_cached::<V>(key).await {
            Some(value) => Ok((Some(value), CacheOutcome::Hit)),
            None => match loader().await {
                Ok(Some(value)) => {
                    self.populate(key, &value, ttl).await;
                    Ok((Some(value), CacheOutcome::Loaded))
                }
                Ok(None) => Ok((None, CacheOutcome::Loaded)),
                Err(e) => Err(e),
            },
        };
        self.lock.release(guard).await;
        result
    }

    fn refresh_in_background<V, F, Fut>(&self, key: &str, ttl: Duration, loader: F)
    where
        V: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>, StoreError>> + Send + 'static,
    {
        let ttl = jittered_ttl(ttl, self.policy.jitter_ratio);
        let _ = self.tracker.spawn_refresh(
            key,
            move || async move {
                match loader().await {
                    Ok(Some(value)) => rmp_serde::to_vec_named(&value)
                        .map(Some)
                        .map_err(|e| e.to_string()),
                    Ok(None) => Ok(None),
                    Err(e) => Err(e.to_string()),
                }
            },
            ttl,
        );
    }

    /// Decode a cached value. An undecodable payload counts as a consistency
    /// error, is deleted, and reads as a miss.
    async fn read_cached<V: DeserializeOwned>(&self, key: &str) -> Option<V> {
        let bytes = self.client.get(key).await?;
        match rmp_serde::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(key = %key, error = %e, "corrupt cache entry, deleting");
                self.tracker.track_error();
                self.client.delete(key).await;
                None
            }
        }
    }

    async fn populate<V: Serialize>(&self, key: &str, value: &V, ttl: Duration) {
        match rmp_serde::to_vec_named(value) {
            Ok(bytes) => {
                let ttl = jittered_ttl(ttl, self.policy.jitter_ratio);
                self.client.set(key, bytes, Some(ttl)).await;
            }
            Err(e) => {
                tracing::error!(key = %key, error = %e, "failed to encode value for cache");
                self.tracker.track_error();
            }
        }
    }

    // ==================== Writes ====================

    /// Persist a new record, write it through, and drop cached lists and
    /// dependent entries.
    pub async fn create(&self, record: T, correlation_id: Option<&str>) -> Result<T, StoreError> {
        let created = self.store.create(record).await?;

        let key = entity_key(T::NAMESPACE, created.id());
        self.populate(&key, &created, self.policy.ttl).await;
        self.invalidate_lists().await;
        self.invalidate_dependents().await;

        self.publish(
            DomainEvent::created(
                T::NAMESPACE,
                created.id(),
                event_data(&created),
                T::dependent_patterns(),
            ),
            correlation_id,
        )
        .await;
        Ok(created)
    }

    /// Persist a change, then delete (not refresh) the entity key.
    pub async fn update(&self, record: T, correlation_id: Option<&str>) -> Result<T, StoreError> {
        let updated = self.store.update(record).await?;

        self.client
            .delete(&entity_key(T::NAMESPACE, updated.id()))
            .await;
        self.invalidate_lists().await;
        self.invalidate_dependents().await;

        self.publish(
            DomainEvent::updated(
                T::NAMESPACE,
                updated.id(),
                event_data(&updated),
                T::dependent_patterns(),
            ),
            correlation_id,
        )
        .await;
        Ok(updated)
    }

    /// Delete a record. Returns `false` if it did not exist; the cache is
    /// cleared either way, so repeated deletes are harmless.
    pub async fn delete(&self, id: &str, correlation_id: Option<&str>) -> Result<bool, StoreError> {
        let removed = self.store.delete(id).await?;

        self.client.delete(&entity_key(T::NAMESPACE, id)).await;
        self.invalidate_lists().await;
        self.invalidate_dependents().await;

        if removed {
            self.publish(
                DomainEvent::deleted(T::NAMESPACE, id, T::dependent_patterns()),
                correlation_id,
            )
            .await;
        }
        Ok(removed)
    }

    /// Drop the cached entity and tell other processes to do the same.
    pub async fn invalidate(&self, id: &str) {
        let key = entity_key(T::NAMESPACE, id);
        self.client.delete(&key).await;
        if let Some(publisher) = &self.publisher {
            let _ = publisher.publish_invalidation(vec![key], Vec::new()).await;
        }
    }

    /// Drop every cached list and count in this namespace.
    pub async fn invalidate_lists(&self) -> usize {
        self.client.delete_matching(&list_pattern(T::NAMESPACE)).await
    }

    /// Drop entries of other namespaces that embed this one. The same
    /// patterns travel in the published event for other processes.
    pub async fn invalidate_dependents(&self) -> usize {
        let mut deleted = 0;
        for pattern in T::dependent_patterns() {
            deleted += self.client.delete_matching(&pattern).await;
        }
        deleted
    }

    async fn publish(&self, event: DomainEvent, correlation_id: Option<&str>) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let event = match correlation_id {
            Some(id) => event.with_correlation_id(id),
            None => event,
        };
        // Failure is already logged by the publisher.
        let _ = publisher.publish(DOMAIN_EVENTS_CHANNEL, &event).await;
    }
}

async fn load_direct<V, F, Fut>(loader: &F) -> Result<(Option<V>, CacheOutcome), StoreError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<V>, StoreError>>,
{
    loader()
        .await
        .map(|value| (value, CacheOutcome::LoadedDirect))
}

fn event_data<T: Serialize>(record: &T) -> serde_json::Value {
    serde_json::to_value(record).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "record not representable as JSON, event carries no data");
        serde_json::Value::Null
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::Product;
    use catalog_storage::InMemoryRecordStore;

    type Accessor = CacheAside<Product, InMemoryRecordStore<Product>>;

    fn accessor(policy: CacheAsidePolicy) -> (Accessor, Arc<InMemoryRecordStore<Product>>, CacheClient) {
        let client = CacheClient::new_local();
        let store = Arc::new(InMemoryRecordStore::new());
        let tracker = Arc::new(ConsistencyTracker::new(client.clone()));
        let cache = CacheAside::new(Arc::clone(&store), client.clone(), tracker, policy);
        (cache, store, client)
    }

    fn lamp(id: &str) -> Product {
        Product::new(id, format!("SKU-{id}"), "Lamp", 1999)
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let base = Duration::from_secs(1000);
        for _ in 0..200 {
            let ttl = jittered_ttl(base, 0.15);
            assert!(ttl >= Duration::from_secs(850) && ttl <= Duration::from_secs(1150));
        }
        assert_eq!(jittered_ttl(base, 0.0), base);
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let (cache, store, _) = accessor(CacheAsidePolicy::default());
        store.seed(lamp("p1"));

        let (value, outcome) = cache.get_traced("p1").await.unwrap();
        assert_eq!(value.unwrap().id, "p1");
        assert_eq!(outcome, CacheOutcome::Loaded);

        let (_, outcome) = cache.get_traced("p1").await.unwrap();
        assert_eq!(outcome, CacheOutcome::Hit);
        assert_eq!(store.stats().reads, 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached() {
        let (cache, store, client) = accessor(CacheAsidePolicy::default());
        assert!(cache.get("missing").await.unwrap().is_none());
        assert!(cache.get("missing").await.unwrap().is_none());
        assert_eq!(store.stats().reads, 2);
        assert!(client.get("product:missing").await.is_none());
    }

    #[tokio::test]
    async fn test_store_error_propagates_and_releases_lock() {
        let (cache, store, client) = accessor(CacheAsidePolicy::default());
        store.set_unavailable(true);
        let err = cache.get("p1").await.unwrap_err();
        assert!(matches!(err, StoreError::Connection { .. }));
        assert!(client.get("product:lock:product:p1").await.is_none());
        assert!(client.get("product:p1").await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_deleted_and_reloaded() {
        let (cache, store, client) = accessor(CacheAsidePolicy::default());
        store.seed(lamp("p1"));
        client.set("product:p1", b"\xc1garbage".to_vec(), None).await;

        let (value, outcome) = cache.get_traced("p1").await.unwrap();
        assert_eq!(value.unwrap().id, "p1");
        assert_eq!(outcome, CacheOutcome::Loaded);
        assert_eq!(cache.tracker().snapshot().consistency_errors, 1);
    }

    #[tokio::test]
    async fn test_contended_direct_load_skips_populate() {
        let policy = CacheAsidePolicy {
            contention: ContentionPolicy::DirectLoad,
            ..CacheAsidePolicy::default()
        };
        let (cache, store, client) = accessor(policy);
        store.seed(lamp("p1"));

        let held = cache.lock.acquire("product:p1").await.unwrap().unwrap();
        let (value, outcome) = cache.get_traced("p1").await.unwrap();
        assert!(value.is_some());
        assert_eq!(outcome, CacheOutcome::LoadedDirect);
        assert!(client.get("product:p1").await.is_none());
        assert!(cache.lock.release(held).await);
    }

    #[tokio::test]
    async fn test_backoff_retry_takes_lock_when_freed() {
        let policy = CacheAsidePolicy {
            contention: ContentionPolicy::BackoffRetry {
                backoff: Duration::from_millis(30),
            },
            lock_ttl: Duration::from_millis(10),
            ..CacheAsidePolicy::default()
        };
        let (cache, store, client) = accessor(policy);
        store.seed(lamp("p1"));

        // Abandoned lock expires during the backoff.
        let _abandoned = cache.lock.acquire("product:p1").await.unwrap().unwrap();
        let (_, outcome) = cache.get_traced("p1").await.unwrap();
        assert_eq!(outcome, CacheOutcome::Loaded);
        assert!(client.get("product:p1").await.is_some());
    }

    #[tokio::test]
    async fn test_backoff_retry_waits_for_slow_holder() {
        let policy = CacheAsidePolicy {
            contention: ContentionPolicy::BackoffRetry {
                backoff: Duration::from_millis(10),
            },
            ..CacheAsidePolicy::default()
        };
        let (cache, store, client) = accessor(policy);
        store.seed(lamp("p1"));

        // The holder needs several backoff rounds before it populates.
        let held = cache.lock.acquire("product:p1").await.unwrap().unwrap();
        let holder = {
            let client = client.clone();
            let lock = cache.lock.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(80)).await;
                let bytes = rmp_serde::to_vec_named(&lamp("p1")).unwrap();
                client.set("product:p1", bytes, None).await;
                lock.release(held).await
            })
        };

        let (value, outcome) = cache.get_traced("p1").await.unwrap();
        assert_eq!(value.unwrap().id, "p1");
        assert_eq!(outcome, CacheOutcome::Hit);
        assert_eq!(store.stats().reads, 0);
        assert!(holder.await.unwrap());
    }

    #[tokio::test]
    async fn test_mutations_clear_dependents_without_publisher() {
        let (cache, _, client) = accessor(CacheAsidePolicy::default());
        client.set("category:list:all", vec![0x90], None).await;
        client.set("category:c1", vec![0x01], None).await;

        cache.create(lamp("p1"), None).await.unwrap();
        assert!(client.get("category:list:all").await.is_none());

        client.set("category:list:all", vec![0x90], None).await;
        cache.update(lamp("p1"), None).await.unwrap();
        assert!(client.get("category:list:all").await.is_none());

        client.set("category:list:all", vec![0x90], None).await;
        cache.delete("p1", None).await.unwrap();
        assert!(client.get("category:list:all").await.is_none());

        // Single category entries do not embed products.
        assert!(client.get("category:c1").await.is_some());
    }

    #[tokio::test]
    async fn test_lists_and_counts_are_cached_and_invalidated() {
        let (cache, store, _) = accessor(CacheAsidePolicy::default());
        store.seed(lamp("p1").with_category("c1"));
        store.seed(lamp("p2").with_category("c1"));

        let filter = ListFilter::new().with("category_id", "c1");
        assert_eq!(cache.find_all(&filter, 0, 10).await.unwrap().len(), 2);
        assert_eq!(cache.find_all(&filter, 0, 10).await.unwrap().len(), 2);
        assert_eq!(cache.count(&filter).await.unwrap(), 2);
        assert_eq!(cache.count(&filter).await.unwrap(), 2);
        assert_eq!(store.stats().lists, 1);
        assert_eq!(store.stats().counts, 1);

        cache.create(lamp("p3").with_category("c1"), None).await.unwrap();
        assert_eq!(cache.find_all(&filter, 0, 10).await.unwrap().len(), 3);
        assert_eq!(cache.count(&filter).await.unwrap(), 3);
        assert_eq!(store.stats().lists, 2);
    }

    #[tokio::test]
    async fn test_failed_create_leaves_cache_untouched() {
        let (cache, store, client) = accessor(CacheAsidePolicy::default());
        store.seed(lamp("p1"));
        client.set("product:list:all", vec![0x90], None).await;

        let err = cache.create(lamp("p1"), None).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert!(client.get("product:list:all").await.is_some());
        assert!(client.get("product:p1").await.is_none());
    }
}
