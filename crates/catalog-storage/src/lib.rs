//! # catalog-storage
//!
//! Record store contract for the catalog cache layer.
//!
//! The cache layer treats the record store as the single authoritative source
//! of truth: it calls into it on cache misses and for every mutation, and it
//! never caches an error result.
//!
//! ## Example
//!
//! ```ignore
//! use catalog_core::Product;
//! use catalog_storage::{InMemoryRecordStore, RecordStore};
//!
//! let store = InMemoryRecordStore::<Product>::new();
//! let created = store.create(Product::new("p1", "SKU-1", "Lamp", 1999)).await?;
//! assert!(store.find_by_id("p1").await?.is_some());
//! ```

mod error;
pub mod memory;
mod traits;

pub use error::StoreError;
pub use memory::{InMemoryRecordStore, StoreStats};
pub use traits::RecordStore;
