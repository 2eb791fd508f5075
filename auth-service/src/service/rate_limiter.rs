//! # Rate Limiter
//!
//! Sliding-window request limiter backed by the ephemeral store.
//!
//! ## Window Model
//!
//! The classic two-bucket approximation: requests are counted into
//! fixed-size buckets keyed by `floor(now / window)`, and the effective
//! count blends the current bucket with the previous one, weighted by how
//! far into the current bucket we are:
//!
//! ```text
//!          previous bucket         current bucket
//!    ├────────────────────────┼────────────────────────┤
//!                             ◄──── elapsed ────►  now
//!
//!    estimate = current + previous × (1 - elapsed/window)
//! ```
//!
//! This smooths the reset cliff of a fixed window at the cost of a small
//! over-estimate, which errs on the safe side for an auth service.
//!
//! ## Identifier Precedence
//!
//! Authenticated user id when available, else client IP. The handler layer
//! decides; the limiter only sees an opaque identifier.
//!
//! ## Counting Discipline
//!
//! The bucket is incremented *first* and the request rejected when the
//! estimate exceeds the limit, so the number of accepted requests per
//! window never exceeds the configured limit even under concurrency.

use shared::config::RateLimitWindow;
use shared::ephemeral::{keys, EphemeralStore};
use shared::errors::ApiError;
use shared::metrics::Metrics;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Sliding-window rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    store: EphemeralStore,
    metrics: Metrics,
}

impl RateLimiter {
    /// Creates a limiter over the given store.
    pub fn new(store: EphemeralStore, metrics: Metrics) -> Self {
        Self { store, metrics }
    }

    /// Admits or rejects one request for `(endpoint, identifier)`.
    ///
    /// ## Errors
    ///
    /// - `ApiError::RateLimited` with a `Retry-After` estimate when the
    ///   window is exhausted
    /// - store errors pass through (the caller treats the limiter as a
    ///   dependency, not a best-effort hint)
    pub async fn check(
        &self,
        endpoint: &str,
        identifier: &str,
        window: RateLimitWindow,
    ) -> Result<(), ApiError> {
        let window_seconds = window.window_seconds.max(1);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let bucket = now / window_seconds;
        let elapsed_fraction = (now % window_seconds) as f64 / window_seconds as f64;

        // Count this request into the current bucket first
        let current_key = keys::rate_bucket(endpoint, identifier, bucket);
        let current = self
            .store
            .incr_with_ttl(&current_key, Duration::from_secs(window_seconds * 2))
            .await?;

        let previous_key = keys::rate_bucket(endpoint, identifier, bucket.wrapping_sub(1));
        let previous = self
            .store
            .get(&previous_key)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);

        let estimate = sliding_estimate(previous, current, elapsed_fraction);

        if estimate > window.limit as f64 {
            self.metrics
                .rate_limited_total
                .with_label_values(&[endpoint])
                .inc();
            let retry_after_seconds = window_seconds - (now % window_seconds);
            return Err(ApiError::RateLimited { retry_after_seconds });
        }

        Ok(())
    }
}

/// Weighted two-bucket estimate; see the module docs.
fn sliding_estimate(previous: i64, current: i64, elapsed_fraction: f64) -> f64 {
    current as f64 + previous as f64 * (1.0 - elapsed_fraction)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(EphemeralStore::in_memory(), Metrics::new())
    }

    #[test]
    fn test_estimate_at_bucket_start_counts_full_previous() {
        assert_eq!(sliding_estimate(10, 0, 0.0), 10.0);
    }

    #[test]
    fn test_estimate_at_bucket_end_ignores_previous() {
        let estimate = sliding_estimate(10, 3, 1.0);
        assert!((estimate - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_estimate_midway_weights_half() {
        let estimate = sliding_estimate(10, 3, 0.5);
        assert!((estimate - 8.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_accepts_up_to_limit_then_rejects() {
        let limiter = limiter();
        let window = RateLimitWindow { limit: 3, window_seconds: 3600 };

        // A long window keeps the whole test inside one bucket with an
        // empty previous bucket, so the estimate equals the current count.
        for _ in 0..3 {
            limiter.check("login", "user-1", window).await.unwrap();
        }

        let rejected = limiter.check("login", "user-1", window).await;
        match rejected {
            Err(ApiError::RateLimited { retry_after_seconds }) => {
                assert!(retry_after_seconds <= 3600);
                assert!(retry_after_seconds > 0);
            }
            other => panic!("expected RateLimited, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_identifiers_do_not_share_windows() {
        let limiter = limiter();
        let window = RateLimitWindow { limit: 1, window_seconds: 3600 };

        limiter.check("login", "user-1", window).await.unwrap();
        // A different identifier starts fresh
        limiter.check("login", "user-2", window).await.unwrap();
        // And a different endpoint too
        limiter.check("register", "user-1", window).await.unwrap();

        assert!(limiter.check("login", "user-1", window).await.is_err());
    }
}
