//! Event type definitions.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Kind of domain event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainEventType {
    /// A record was created in the record store.
    EntityCreated,
    /// A record was updated in the record store.
    EntityUpdated,
    /// A record was deleted from the record store.
    EntityDeleted,
    /// Cache entries were explicitly invalidated (administrative override).
    CacheInvalidated,
}

impl DomainEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainEventType::EntityCreated => "entity_created",
            DomainEventType::EntityUpdated => "entity_updated",
            DomainEventType::EntityDeleted => "entity_deleted",
            DomainEventType::CacheInvalidated => "cache_invalidated",
        }
    }
}

impl std::fmt::Display for DomainEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Typed event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    /// A record change.
    Entity {
        namespace: String,
        entity_id: String,
        /// Record snapshot after the change (`None` for deletions).
        #[serde(default)]
        data: Option<serde_json::Value>,
        /// Cache key patterns in other namespaces that embed this record.
        #[serde(default)]
        invalidate: Vec<String>,
    },
    /// Explicit invalidation of keys and key patterns.
    Invalidation {
        #[serde(default)]
        keys: Vec<String>,
        #[serde(default)]
        patterns: Vec<String>,
    },
}

/// An immutable, published domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: Uuid,
    pub event_type: DomainEventType,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub payload: EventPayload,
}

impl DomainEvent {
    /// Create a new event with a fresh id and the current timestamp.
    pub fn new(event_type: DomainEventType, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            timestamp: OffsetDateTime::now_utc(),
            correlation_id: None,
            payload,
        }
    }

    fn entity(
        event_type: DomainEventType,
        namespace: &str,
        entity_id: &str,
        data: Option<serde_json::Value>,
        invalidate: Vec<String>,
    ) -> Self {
        Self::new(
            event_type,
            EventPayload::Entity {
                namespace: namespace.to_string(),
                entity_id: entity_id.to_string(),
                data,
                invalidate,
            },
        )
    }

    /// Create an `entity_created` event.
    pub fn created(
        namespace: &str,
        entity_id: &str,
        data: serde_json::Value,
        invalidate: Vec<String>,
    ) -> Self {
        Self::entity(
            DomainEventType::EntityCreated,
            namespace,
            entity_id,
            Some(data),
            invalidate,
        )
    }

    /// Create an `entity_updated` event.
    pub fn updated(
        namespace: &str,
        entity_id: &str,
        data: serde_json::Value,
        invalidate: Vec<String>,
    ) -> Self {
        Self::entity(
            DomainEventType::EntityUpdated,
            namespace,
            entity_id,
            Some(data),
            invalidate,
        )
    }

    /// Create an `entity_deleted` event.
    pub fn deleted(namespace: &str, entity_id: &str, invalidate: Vec<String>) -> Self {
        Self::entity(
            DomainEventType::EntityDeleted,
            namespace,
            entity_id,
            None,
            invalidate,
        )
    }

    /// Create a `cache_invalidated` event.
    pub fn invalidated(keys: Vec<String>, patterns: Vec<String>) -> Self {
        Self::new(
            DomainEventType::CacheInvalidated,
            EventPayload::Invalidation { keys, patterns },
        )
    }

    /// Attach the correlation id of the request that caused this event.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Namespace of the affected record, if this is an entity event.
    pub fn namespace(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Entity { namespace, .. } => Some(namespace),
            EventPayload::Invalidation { .. } => None,
        }
    }

    /// Id of the affected record, if this is an entity event.
    pub fn entity_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Entity { entity_id, .. } => Some(entity_id),
            EventPayload::Invalidation { .. } => None,
        }
    }
}
