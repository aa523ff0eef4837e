//! In-memory record store.
//!
//! Backs tests and single-process demos. It counts every call so callers can
//! assert how often the cache layer actually reached the store, and it can be
//! switched into a failing mode or given artificial latency.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use catalog_core::{Entity, ListFilter};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::StoreError;
use crate::traits::RecordStore;

/// Call counters for an [`InMemoryRecordStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: u64,
    pub lists: u64,
    pub counts: u64,
    pub writes: u64,
    pub deletes: u64,
}

/// Record store keeping everything in a concurrent map.
pub struct InMemoryRecordStore<T: Entity> {
    records: DashMap<String, T>,
    latency: Option<Duration>,
    unavailable: AtomicBool,
    reads: AtomicU64,
    lists: AtomicU64,
    counts: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl<T: Entity> InMemoryRecordStore<T> {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            latency: None,
            unavailable: AtomicBool::new(false),
            reads: AtomicU64::new(0),
            lists: AtomicU64::new(0),
            counts: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every subsequent call fail with `StoreError::Connection`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert a record directly, bypassing counters.
    pub fn seed(&self, record: T) {
        self.records.insert(record.id().to_string(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            reads: self.reads.load(Ordering::SeqCst),
            lists: self.lists.load(Ordering::SeqCst),
            counts: self.counts.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
        }
    }

    async fn enter(&self, counter: &AtomicU64) -> Result<(), StoreError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::connection("in-memory store marked unavailable"));
        }
        Ok(())
    }

    fn matching(&self, filter: &ListFilter) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        for entry in self.records.iter() {
            let json = serde_json::to_value(entry.value())
                .map_err(|e| StoreError::invalid_record(e.to_string()))?;
            if filter.matches(&json) {
                out.push(entry.value().clone());
            }
        }
        out.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(out)
    }
}

impl<T: Entity> Default for InMemoryRecordStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Entity> RecordStore<T> for InMemoryRecordStore<T> {
    async fn find_by_id(&self, id: &str) -> Result<Option<T>, StoreError> {
        self.enter(&self.reads).await?;
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn create(&self, record: T) -> Result<T, StoreError> {
        self.enter(&self.writes).await?;
        if record.id().is_empty() {
            return Err(StoreError::invalid_record("id must not be empty"));
        }
        match self.records.entry(record.id().to_string()) {
            Entry::Occupied(_) => Err(StoreError::already_exists(T::NAMESPACE, record.id())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn update(&self, record: T) -> Result<T, StoreError> {
        self.enter(&self.writes).await?;
        match self.records.get_mut(record.id()) {
            Some(mut existing) => {
                *existing = record.clone();
                Ok(record)
            }
            None => Err(StoreError::not_found(T::NAMESPACE, record.id())),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        self.enter(&self.deletes).await?;
        Ok(self.records.remove(id).is_some())
    }

    async fn find_all(
        &self,
        filter: &ListFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<T>, StoreError> {
        self.enter(&self.lists).await?;
        Ok(self
            .matching(filter)?
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn count(&self, filter: &ListFilter) -> Result<u64, StoreError> {
        self.enter(&self.counts).await?;
        Ok(self.matching(filter)?.len() as u64)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
