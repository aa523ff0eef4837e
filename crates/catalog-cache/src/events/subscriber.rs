use std::sync::Arc;
use std::time::Duration;

use catalog_core::{DomainEvent, EventHandler, RetryPolicy};
use tokio::task::JoinHandle;

use super::EventError;
use crate::client::{CacheClient, Subscription};
use crate::metrics;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Consumes one channel and fans each event out to the registered handlers.
///
/// The subscription runs on its own connection. Each (event, handler) pair is
/// executed on a separate task through
/// [`EventHandler::execute_with_retry`], so a slow handler never holds up the
/// receive loop.
pub struct EventSubscriber {
    client: CacheClient,
    handlers: Vec<Arc<dyn EventHandler>>,
    retry: RetryPolicy,
    initial_backoff: Duration,
}

impl EventSubscriber {
    pub fn new(client: CacheClient) -> Self {
        Self {
            client,
            handlers: Vec::new(),
            retry: RetryPolicy::default(),
            initial_backoff: INITIAL_BACKOFF,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// First delay before reconnecting; doubles per failed attempt up to 5 minutes.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Subscribe to `channel` and start the receive loop.
    ///
    /// The subscription is live when this returns, so events published
    /// afterwards are delivered. Failure to connect the first time is
    /// returned; later disconnects are retried forever.
    pub async fn start(self, channel: &str) -> Result<JoinHandle<()>, EventError> {
        let subscription =
            self.client
                .subscribe(channel)
                .await
                .map_err(|source| EventError::Subscribe {
                    channel: channel.to_string(),
                    source,
                })?;

        tracing::info!(
            channel = %channel,
            handlers = self.handlers.len(),
            mode = self.client.mode(),
            "event subscriber started"
        );

        let channel = channel.to_string();
        Ok(tokio::spawn(async move {
            self.run(channel, subscription).await;
        }))
    }

    async fn run(self, channel: String, mut subscription: Subscription) {
        loop {
            while let Some(payload) = subscription.next_message().await {
                self.dispatch(&channel, &payload);
            }

            if matches!(subscription, Subscription::Local(_)) {
                tracing::info!(channel = %channel, "local channel closed, subscriber stopping");
                return;
            }

            tracing::warn!(channel = %channel, "subscription connection lost");
            subscription = self.reconnect(&channel).await;
        }
    }

    async fn reconnect(&self, channel: &str) -> Subscription {
        let mut backoff = self.initial_backoff;
        loop {
            tokio::time::sleep(backoff).await;
            match self.client.subscribe(channel).await {
                Ok(subscription) => {
                    tracing::info!(channel = %channel, "event subscriber reconnected");
                    return subscription;
                }
                Err(e) => {
                    tracing::error!(
                        channel = %channel,
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "event subscriber reconnect failed"
                    );
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    fn dispatch(&self, channel: &str, payload: &[u8]) {
        let event: DomainEvent = match serde_json::from_slice(payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(channel = %channel, error = %e, "dropping undecodable event");
                return;
            }
        };
        let event = Arc::new(event);

        for handler in self.handlers.iter().filter(|h| h.matches(&event)) {
            let handler = Arc::clone(handler);
            let event = Arc::clone(&event);
            let retry = self.retry.clone();
            tokio::spawn(async move {
                let ok = handler.execute_with_retry(&event, &retry).await.is_ok();
                metrics::record_handler_result(handler.name(), ok);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPublisher;
    use async_trait::async_trait;
    use catalog_core::{DomainEventType, HandlerError};
    use tokio::sync::mpsc;

    struct Forward {
        types: Vec<DomainEventType>,
        tx: mpsc::UnboundedSender<DomainEvent>,
    }

    #[async_trait]
    impl EventHandler for Forward {
        fn name(&self) -> &str {
            "forward"
        }

        fn event_types(&self) -> &[DomainEventType] {
            &self.types
        }

        async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
            self.tx
                .send(event.clone())
                .map_err(|e| HandlerError::execution(e.to_string()))
        }
    }

    #[tokio::test]
    async fn test_dispatches_only_matching_events() {
        let client = CacheClient::new_local();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = Arc::new(Forward {
            types: vec![DomainEventType::EntityDeleted],
            tx,
        });

        let task = EventSubscriber::new(client.clone())
            .with_handler(handler)
            .start("catalog:events")
            .await
            .unwrap();

        let publisher = EventPublisher::new(client);
        publisher
            .publish("catalog:events", &DomainEvent::updated("product", "p1", serde_json::Value::Null, vec![]))
            .await
            .unwrap();
        publisher
            .publish("catalog:events", &DomainEvent::deleted("product", "p1", vec![]))
            .await
            .unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.event_type, DomainEventType::EntityDeleted);
        assert!(rx.try_recv().is_err());
        task.abort();
    }

    #[tokio::test]
    async fn test_undecodable_payload_does_not_stop_loop() {
        let client = CacheClient::new_local();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = EventSubscriber::new(client.clone())
            .with_handler(Arc::new(Forward { types: vec![], tx }))
            .start("catalog:events")
            .await
            .unwrap();

        client
            .try_publish("catalog:events", b"not json".to_vec())
            .await
            .unwrap();
        EventPublisher::new(client)
            .publish("catalog:events", &DomainEvent::deleted("product", "p2", vec![]))
            .await
            .unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.entity_id(), Some("p2"));
        task.abort();
    }
}
