//! Record store trait.

use async_trait::async_trait;
use catalog_core::{Entity, ListFilter};

use crate::error::StoreError;

/// The durable store the cache layer sits in front of.
///
/// Implementations must be thread-safe (`Send + Sync`).
#[async_trait]
pub trait RecordStore<T: Entity>: Send + Sync {
    /// Reads a record by id.
    ///
    /// Returns `None` if the record does not exist. Errors are reserved for
    /// infrastructure failures.
    async fn find_by_id(&self, id: &str) -> Result<Option<T>, StoreError>;

    /// Persists a new record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if a record with the same id exists.
    async fn create(&self, record: T) -> Result<T, StoreError>;

    /// Replaces an existing record.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the record does not exist.
    async fn update(&self, record: T) -> Result<T, StoreError>;

    /// Deletes a record. Returns `false` if there was nothing to delete.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    /// Returns one page of records matching `filter`.
    async fn find_all(
        &self,
        filter: &ListFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<T>, StoreError>;

    /// Counts records matching `filter`.
    async fn count(&self, filter: &ListFilter) -> Result<u64, StoreError>;

    /// Name of this backend for logging.
    fn backend_name(&self) -> &'static str;
}
