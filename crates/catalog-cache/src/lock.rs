//! Distributed lock for cache repopulation.
//!
//! Built on the store's atomic "set if absent with expiry". Locks are advisory
//! and time-bounded: a holder that crashes is released by TTL expiry. Release
//! is token-checked, so a holder whose lock already expired never removes a
//! lock that another process has since taken.

use std::time::Duration;

use catalog_core::keys::lock_key;
use uuid::Uuid;

use crate::client::{CacheClient, CacheError};

/// Proof of holding a lock. Hand it back to [`DistributedLock::release`].
#[derive(Debug)]
#[must_use = "an unreleased lock is only freed by TTL expiry"]
pub struct LockGuard {
    key: String,
    token: String,
}

impl LockGuard {
    /// The lock entry's key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Cross-process mutual exclusion for one namespace.
#[derive(Debug, Clone)]
pub struct DistributedLock {
    client: CacheClient,
    namespace: String,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(client: CacheClient, namespace: impl Into<String>, ttl: Duration) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Try to take the lock for `key` without waiting.
    ///
    /// `Ok(None)` means another holder has it (contention, not an error).
    /// `Err` means the store could not be asked at all.
    pub async fn acquire(&self, key: &str) -> Result<Option<LockGuard>, CacheError> {
        let lock_key = lock_key(&self.namespace, key);
        let token = Uuid::new_v4().to_string();

        let created = self
            .client
            .try_set_if_absent(&lock_key, token.as_bytes(), self.ttl)
            .await?;

        if created {
            tracing::trace!(key = %lock_key, "lock acquired");
            Ok(Some(LockGuard {
                key: lock_key,
                token,
            }))
        } else {
            tracing::debug!(key = %lock_key, "lock held elsewhere");
            Ok(None)
        }
    }

    /// Release a held lock. Returns `false` if the lock had already expired or
    /// been taken over, or the store was unreachable.
    pub async fn release(&self, guard: LockGuard) -> bool {
        match self
            .client
            .try_compare_and_delete(&guard.key, guard.token.as_bytes())
            .await
        {
            Ok(released) => {
                if !released {
                    tracing::warn!(key = %guard.key, "lock expired before release");
                }
                released
            }
            Err(e) => {
                tracing::warn!(key = %guard.key, error = %e, "failed to release lock, leaving it to expire");
                false
            }
        }
    }
}
