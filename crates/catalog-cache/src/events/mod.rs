//! Pub/sub transport for domain events.
//!
//! ## How It Works
//!
//! ```text
//! CacheAside::update("p1")
//!   ↓
//! EventPublisher: PUBLISH catalog:events {"event_type":"entity_updated",...}
//!   ↓
//! EventSubscriber (worker process): decode → one task per matching handler
//!   ↓
//! AuditLogHandler / CacheInvalidationHandler: execute_with_retry
//! ```
//!
//! Publishing never waits for consumers. Delivery is at-most-once: messages
//! published while a subscriber is reconnecting are lost.

mod handlers;
mod publisher;
mod subscriber;

pub use handlers::{AuditLogHandler, CacheInvalidationHandler};
pub use publisher::EventPublisher;
pub use subscriber::EventSubscriber;

use crate::client::CacheError;

/// Channel carrying entity lifecycle events.
pub const DOMAIN_EVENTS_CHANNEL: &str = "catalog:events";

/// Channel carrying explicit cache invalidation notices.
pub const INVALIDATION_CHANNEL: &str = "cache:invalidate";

/// Errors from publishing or subscribing.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to publish to '{channel}': {source}")]
    Publish {
        channel: String,
        #[source]
        source: CacheError,
    },

    #[error("failed to subscribe to '{channel}': {source}")]
    Subscribe {
        channel: String,
        #[source]
        source: CacheError,
    },
}
