//! Built-in event handlers run by the worker process.

use async_trait::async_trait;
use catalog_core::{DomainEvent, EventHandler, EventPayload, HandlerError};

use crate::client::CacheClient;

/// Writes every event to the `audit` tracing target.
#[derive(Debug, Default)]
pub struct AuditLogHandler;

#[async_trait]
impl EventHandler for AuditLogHandler {
    fn name(&self) -> &str {
        "audit_log"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        tracing::info!(
            target: "audit",
            event_id = %event.event_id,
            event_type = %event.event_type,
            timestamp = %event.timestamp,
            correlation_id = event.correlation_id.as_deref().unwrap_or("-"),
            namespace = event.namespace().unwrap_or("-"),
            entity_id = event.entity_id().unwrap_or("-"),
            "domain event"
        );
        Ok(())
    }
}

/// Deletes the cache keys and patterns an event names.
///
/// Entity events carry the patterns of caches in other namespaces that embed
/// the changed record; `cache_invalidated` notices carry explicit keys too.
/// Store failures are returned so the retry policy applies.
#[derive(Debug, Clone)]
pub struct CacheInvalidationHandler {
    client: CacheClient,
}

impl CacheInvalidationHandler {
    pub fn new(client: CacheClient) -> Self {
        Self { client }
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize, HandlerError> {
        let keys = self
            .client
            .try_keys_matching(pattern)
            .await
            .map_err(|e| HandlerError::execution(format!("scan '{pattern}': {e}")))?;
        self.client
            .try_delete_many(&keys)
            .await
            .map_err(|e| HandlerError::execution(format!("delete '{pattern}': {e}")))
    }
}

#[async_trait]
impl EventHandler for CacheInvalidationHandler {
    fn name(&self) -> &str {
        "cache_invalidation"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
        let (keys, patterns): (&[String], &[String]) = match &event.payload {
            EventPayload::Entity { invalidate, .. } => (&[], invalidate.as_slice()),
            EventPayload::Invalidation { keys, patterns } => (keys.as_slice(), patterns.as_slice()),
        };

        let mut deleted = if keys.is_empty() {
            0
        } else {
            self.client
                .try_delete_many(keys)
                .await
                .map_err(|e| HandlerError::execution(e.to_string()))?
        };
        for pattern in patterns {
            deleted += self.delete_pattern(pattern).await?;
        }

        if deleted > 0 {
            tracing::debug!(event_id = %event.event_id, deleted, "dependent cache entries invalidated");
        }
        Ok(())
    }
}
