//! Sliding-window rate limiting.
//!
//! Each subject owns a time-ordered set at `rate_limit:{subject}`. One atomic
//! step prunes entries at or before `now - window`, counts the rest, records
//! the request if the count is under the limit, and refreshes the key's
//! expiry. The count always covers the trailing window, so bursts straddling
//! a bucket boundary are still caught. Rejected requests are not recorded.
//!
//! The limiter fails open: if the store cannot be reached the request is
//! allowed and a warning is logged.

mod middleware;

pub use middleware::{RateLimitState, rate_limit_middleware};

use std::fmt;
use std::time::Duration;

use catalog_core::keys::rate_limit_key;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::CacheClient;
use crate::metrics;

/// Who a window belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitSubject {
    Ip(String),
    User(String),
    /// Per client and route, for endpoints with their own quota.
    IpEndpoint { ip: String, endpoint: String },
}

impl fmt::Display for RateLimitSubject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitSubject::Ip(ip) => write!(f, "ip:{ip}"),
            RateLimitSubject::User(id) => write!(f, "user:{id}"),
            RateLimitSubject::IpEndpoint { ip, endpoint } => write!(f, "ip:{ip}:{endpoint}"),
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u64,
    /// Requests still admissible in the current window after this one.
    pub remaining: u64,
    /// When the oldest request in the window leaves it.
    pub reset_at: OffsetDateTime,
}

impl RateLimitDecision {
    /// Whole seconds from `now` until `reset_at`, at least 1.
    pub fn retry_after_secs(&self, now: OffsetDateTime) -> u64 {
        let secs = (self.reset_at - now).whole_seconds();
        secs.max(1) as u64
    }
}

/// Sliding-window limiter over the shared key-value store.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    client: CacheClient,
    default_window: Duration,
    default_limit: u64,
}

impl RateLimiter {
    pub fn new(client: CacheClient, default_window: Duration, default_limit: u64) -> Self {
        Self {
            client,
            default_window,
            default_limit,
        }
    }

    pub fn default_window(&self) -> Duration {
        self.default_window
    }

    pub fn default_limit(&self) -> u64 {
        self.default_limit
    }

    /// Check `subject` against the default window and limit.
    pub async fn check_default(&self, subject: &RateLimitSubject) -> RateLimitDecision {
        self.check(&subject.to_string(), self.default_window, self.default_limit)
            .await
    }

    /// Check and, if admitted, record one request for `subject`.
    pub async fn check(&self, subject: &str, window: Duration, limit: u64) -> RateLimitDecision {
        self.check_at(subject, window, limit, OffsetDateTime::now_utc())
            .await
    }

    /// [`check`](Self::check) with an explicit clock.
    pub async fn check_at(
        &self,
        subject: &str,
        window: Duration,
        limit: u64,
        now: OffsetDateTime,
    ) -> RateLimitDecision {
        let key = rate_limit_key(subject);
        let now_ms = unix_millis(now);
        let member = format!("{now_ms}-{}", Uuid::new_v4().simple());

        let state = match self
            .client
            .try_sliding_window(&key, now_ms, window, limit, &member)
            .await
        {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(subject = %subject, error = %e, "rate limit store unavailable, allowing request");
                metrics::record_rate_limit_decision(true);
                return RateLimitDecision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    reset_at: now + window,
                };
            }
        };

        let remaining = if state.admitted {
            limit.saturating_sub(state.count + 1)
        } else {
            0
        };
        let oldest_ms = state.oldest_ms.unwrap_or(now_ms);
        let reset_at = from_unix_millis(oldest_ms).unwrap_or(now) + window;

        metrics::record_rate_limit_decision(state.admitted);
        if !state.admitted {
            tracing::warn!(
                subject = %subject,
                limit,
                window_secs = window.as_secs(),
                "rate limit exceeded"
            );
        }

        RateLimitDecision {
            allowed: state.admitted,
            limit,
            remaining,
            reset_at,
        }
    }

    /// Clear a subject's window (administrative override).
    pub async fn reset(&self, subject: &str) -> bool {
        let cleared = self.client.delete(&rate_limit_key(subject)).await;
        tracing::info!(subject = %subject, cleared, "rate limit window reset");
        cleared
    }
}

fn unix_millis(at: OffsetDateTime) -> u64 {
    (at.unix_timestamp_nanos() / 1_000_000).max(0) as u64
}

fn from_unix_millis(ms: u64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).ok()
}
