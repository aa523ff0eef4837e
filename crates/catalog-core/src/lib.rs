//! Core types shared by the catalog caching layer.
//!
//! - [`entity`]: the [`Entity`] trait plus the catalog records (`Product`, `Category`)
//! - [`keys`]: the stable cache key naming convention and list filter canonicalization
//! - [`events`]: domain events and the handler contract used by subscribers

pub mod entity;
pub mod events;
pub mod keys;

pub use entity::{Category, Entity, Product};
pub use events::{
    DomainEvent, DomainEventType, EventHandler, EventPayload, HandlerError, RetryPolicy,
};
pub use keys::ListFilter;
