//! Event handler contract.
//!
//! Handlers are invoked by the subscriber's dispatch loop, one task per
//! message and handler. They should be quick; anything slow belongs behind an
//! internal channel.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::{debug, error, warn};

use super::types::{DomainEvent, DomainEventType};

/// Default timeout for a single handler attempt.
const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Error type for handler execution.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Handler failed with a message.
    #[error("Handler execution failed: {0}")]
    Execution(String),

    /// A single attempt exceeded its timeout.
    #[error("Handler timed out after {0:?}")]
    Timeout(Duration),

    /// Handler panicked.
    #[error("Handler panicked: {0}")]
    Panicked(String),

    /// Every attempt failed; the event was dropped.
    #[error("Handler '{handler}' gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        handler: String,
        attempts: u32,
        last_error: String,
    },

    /// Generic error with source.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn execution(msg: impl Into<String>) -> Self {
        HandlerError::Execution(msg.into())
    }
}

/// Retry budget for handler execution.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub base_delay: Duration,
    /// Cap on the retry delay.
    pub max_delay: Duration,
    /// Upper bound for a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Asynchronous consumer of domain events.
///
/// # Example
///
/// ```ignore
/// struct SearchIndexer { tx: mpsc::Sender<String> }
///
/// #[async_trait]
/// impl EventHandler for SearchIndexer {
///     fn name(&self) -> &str { "search_indexer" }
///
///     async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError> {
///         if let Some(id) = event.entity_id() {
///             self.tx.send(id.to_string()).await.map_err(|e| HandlerError::execution(e.to_string()))?;
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Unique name for this handler (for logging and metrics).
    fn name(&self) -> &str;

    /// Event types this handler consumes. Empty matches every type.
    fn event_types(&self) -> &[DomainEventType] {
        &[]
    }

    /// Handle one event.
    async fn handle(&self, event: &DomainEvent) -> Result<(), HandlerError>;

    /// Check if this handler should see the given event.
    fn matches(&self, event: &DomainEvent) -> bool {
        let types = self.event_types();
        types.is_empty() || types.contains(&event.event_type)
    }

    /// Run [`handle`](Self::handle) with timeout, panic protection, and
    /// exponential backoff between attempts.
    ///
    /// Returns the number of attempts used on success. After the budget is
    /// exhausted the failure is logged and returned; the event is not retried again.
    async fn execute_with_retry(
        &self,
        event: &DomainEvent,
        policy: &RetryPolicy,
    ) -> Result<u32, HandlerError> {
        let attempts = policy.max_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let outcome = tokio::time::timeout(
                policy.attempt_timeout,
                AssertUnwindSafe(self.handle(event)).catch_unwind(),
            )
            .await;

            let err = match outcome {
                Ok(Ok(Ok(()))) => {
                    debug!(
                        handler = %self.name(),
                        event_id = %event.event_id,
                        attempt,
                        "Event handled"
                    );
                    return Ok(attempt);
                }
                Ok(Ok(Err(e))) => e,
                Ok(Err(panic)) => HandlerError::Panicked(panic_message(panic.as_ref())),
                Err(_) => HandlerError::Timeout(policy.attempt_timeout),
            };

            last_error = err.to_string();
            if attempt < attempts {
                let delay = policy.delay_for(attempt - 1);
                warn!(
                    handler = %self.name(),
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "Event handler failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }

        error!(
            handler = %self.name(),
            event_id = %event.event_id,
            event_type = %event.event_type,
            attempts,
            error = %last_error,
            "Event handler exhausted retries, dropping event"
        );
        Err(HandlerError::Exhausted {
            handler: self.name().to_string(),
            attempts,
            last_error,
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyHandler {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl EventHandler for FlakyHandler {
        fn name(&self) -> &str {
            "flaky"
        }

        fn event_types(&self) -> &[DomainEventType] {
            &[DomainEventType::EntityCreated]
        }

        async fn handle(&self, _event: &DomainEvent) -> Result<(), HandlerError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Err(HandlerError::execution("boom"))
            } else {
                Ok(())
            }
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl EventHandler for PanickingHandler {
        fn name(&self) -> &str {
            "panicky"
        }

        async fn handle(&self, _event: &DomainEvent) -> Result<(), HandlerError> {
            panic!("handler bug");
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            attempt_timeout: Duration::from_secs(1),
        }
    }

    fn event() -> DomainEvent {
        DomainEvent::created("product", "1", serde_json::json!({}), vec![])
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            attempt_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn test_matches_filters_by_type() {
        let handler = FlakyHandler {
            failures_before_success: 0,
            calls: AtomicU32::new(0),
        };
        assert!(handler.matches(&event()));
        assert!(!handler.matches(&DomainEvent::deleted("product", "1", vec![])));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let handler = FlakyHandler {
            failures_before_success: 2,
            calls: AtomicU32::new(0),
        };
        let attempts = handler
            .execute_with_retry(&event(), &fast_policy(3))
            .await
            .unwrap();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let handler = FlakyHandler {
            failures_before_success: 10,
            calls: AtomicU32::new(0),
        };
        let err = handler
            .execute_with_retry(&event(), &fast_policy(2))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Exhausted { attempts: 3, .. }));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_zero_retries_runs_once() {
        let handler = FlakyHandler {
            failures_before_success: 1,
            calls: AtomicU32::new(0),
        };
        let result = tokio_test::block_on(handler.execute_with_retry(&event(), &fast_policy(0)));
        assert!(matches!(result, Err(HandlerError::Exhausted { attempts: 1, .. })));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let err = PanickingHandler
            .execute_with_retry(&event(), &fast_policy(1))
            .await
            .unwrap_err();
        match err {
            HandlerError::Exhausted { last_error, .. } => {
                assert!(last_error.contains("handler bug"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
