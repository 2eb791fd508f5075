//! # Attempt Lockout
//!
//! Per-(user, purpose) failure counters with a fixed lockout policy:
//! 3 failures inside 5 minutes locks the step for the remainder of the
//! window.
//!
//! Counters live under `attempts:{user}:{purpose}` in the ephemeral store.
//! The window is armed by the first failure and not extended by later
//! ones, so a locked user is freed when the original window lapses.
//!
//! Purposes in use: `login` (emailed code), `totp` (2FA codes), `verify`
//! (email verification), `reset` (password reset codes).

use shared::ephemeral::{keys, EphemeralStore};
use shared::errors::ApiError;
use std::time::Duration;
use uuid::Uuid;

/// Failures tolerated before the step locks.
const MAX_ATTEMPTS: i64 = 3;

/// Counter window and lockout duration.
const WINDOW: Duration = Duration::from_secs(5 * 60);

/// Shared failure-counter policy.
#[derive(Clone)]
pub struct Lockout {
    store: EphemeralStore,
}

impl Lockout {
    pub fn new(store: EphemeralStore) -> Self {
        Self { store }
    }

    /// Rejects with `RateLimited` when the step is currently locked.
    pub async fn ensure_clear(&self, user_id: Uuid, purpose: &str) -> Result<(), ApiError> {
        let key = keys::attempts(user_id, purpose);
        let count = self
            .store
            .get(&key)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);

        if count >= MAX_ATTEMPTS {
            let retry_after_seconds = self
                .store
                .ttl_of(&key)
                .await?
                .map(|ttl| ttl.as_secs().max(1))
                .unwrap_or(WINDOW.as_secs());
            return Err(ApiError::RateLimited { retry_after_seconds });
        }

        Ok(())
    }

    /// Counts one failure. Returns `true` when this failure tripped the
    /// lock (so the caller can audit the lockout exactly once).
    pub async fn record_failure(&self, user_id: Uuid, purpose: &str) -> Result<bool, ApiError> {
        let count = self
            .store
            .incr_with_ttl(&keys::attempts(user_id, purpose), WINDOW)
            .await?;
        Ok(count == MAX_ATTEMPTS)
    }

    /// Clears the counter after a successful attempt.
    pub async fn clear(&self, user_id: Uuid, purpose: &str) -> Result<(), ApiError> {
        self.store.delete(&keys::attempts(user_id, purpose)).await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_three_failures_lock_the_step() {
        let lockout = Lockout::new(EphemeralStore::in_memory());
        let user = Uuid::new_v4();

        assert!(lockout.ensure_clear(user, "login").await.is_ok());
        assert!(!lockout.record_failure(user, "login").await.unwrap());
        assert!(!lockout.record_failure(user, "login").await.unwrap());
        // Third failure trips the lock and reports it
        assert!(lockout.record_failure(user, "login").await.unwrap());

        match lockout.ensure_clear(user, "login").await {
            Err(ApiError::RateLimited { retry_after_seconds }) => {
                assert!(retry_after_seconds > 0);
                assert!(retry_after_seconds <= WINDOW.as_secs());
            }
            other => panic!("expected RateLimited, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_success_resets_the_counter() {
        let lockout = Lockout::new(EphemeralStore::in_memory());
        let user = Uuid::new_v4();

        lockout.record_failure(user, "totp").await.unwrap();
        lockout.record_failure(user, "totp").await.unwrap();
        lockout.clear(user, "totp").await.unwrap();

        // Two fresh failures do not lock
        lockout.record_failure(user, "totp").await.unwrap();
        assert!(!lockout.record_failure(user, "totp").await.unwrap());
        assert!(lockout.ensure_clear(user, "totp").await.is_ok());
    }

    #[tokio::test]
    async fn test_purposes_are_independent() {
        let lockout = Lockout::new(EphemeralStore::in_memory());
        let user = Uuid::new_v4();

        for _ in 0..3 {
            lockout.record_failure(user, "login").await.unwrap();
        }

        assert!(lockout.ensure_clear(user, "login").await.is_err());
        assert!(lockout.ensure_clear(user, "totp").await.is_ok());
    }
}
