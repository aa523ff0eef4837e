use catalog_core::DomainEvent;

use super::{EventError, INVALIDATION_CHANNEL};
use crate::client::CacheClient;
use crate::metrics;

/// Serializes domain events to JSON and publishes them fire-and-forget.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    client: CacheClient,
}

impl EventPublisher {
    pub fn new(client: CacheClient) -> Self {
        Self { client }
    }

    /// Publish `event` on `channel`.
    ///
    /// Returns the number of subscribers that received it. Zero is not an
    /// error: nobody was listening and the event is gone.
    pub async fn publish(&self, channel: &str, event: &DomainEvent) -> Result<usize, EventError> {
        let payload = serde_json::to_vec(event)?;

        match self.client.try_publish(channel, payload).await {
            Ok(receivers) => {
                metrics::record_event_published(channel, true);
                tracing::debug!(
                    channel = %channel,
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    receivers,
                    "event published"
                );
                Ok(receivers)
            }
            Err(source) => {
                metrics::record_event_published(channel, false);
                tracing::warn!(
                    channel = %channel,
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    error = %source,
                    "failed to publish event"
                );
                Err(EventError::Publish {
                    channel: channel.to_string(),
                    source,
                })
            }
        }
    }

    /// Broadcast a `cache_invalidated` notice for `keys` and `patterns`.
    pub async fn publish_invalidation(
        &self,
        keys: Vec<String>,
        patterns: Vec<String>,
    ) -> Result<usize, EventError> {
        self.publish(INVALIDATION_CHANNEL, &DomainEvent::invalidated(keys, patterns))
            .await
    }
}
