//! # Prometheus Metrics
//!
//! Process-wide counters for the security-relevant events of the service,
//! exposed in Prometheus text format via `GET /metrics`.
//!
//! ## Metric Taxonomy
//!
//! | Metric | Labels | Meaning |
//! |--------|--------|---------|
//! | `auth_logins_total` | `outcome` | Login attempts by outcome |
//! | `auth_tokens_issued_total` | `kind` | Tokens minted by kind |
//! | `auth_authz_decisions_total` | `result` | Policy decisions (allow/deny) |
//! | `auth_authz_cache_total` | `level` | Cache hits by level (l1/l2/miss) |
//! | `auth_rate_limited_total` | `endpoint` | Requests rejected by the limiter |
//! | `auth_replays_detected_total` | `kind` | Single-use credential replays |
//!
//! Counters only - anything that needs timing lives in the tracing spans.
//! The registry is created once in the composition root and shared by
//! reference; there is no global mutable state.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Counter bundle registered against one [`Registry`].
///
/// ## Thread Safety
///
/// `prometheus` counters are atomics internally; `Metrics` is `Clone` and
/// safe to share across workers.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Login attempts by outcome: success, invalid_credentials, code_required,
    /// totp_required, locked_out, org_selection
    pub logins_total: IntCounterVec,
    /// Tokens minted by kind: access, refresh, pre_auth, oauth_access, oauth_refresh
    pub tokens_issued_total: IntCounterVec,
    /// Authorization decisions by result: allow, deny
    pub authz_decisions_total: IntCounterVec,
    /// Authorization cache consultations by level: l1, l2, miss, bypass
    pub authz_cache_total: IntCounterVec,
    /// Requests rejected by the rate limiter, by endpoint
    pub rate_limited_total: IntCounterVec,
    /// Replayed single-use credentials by kind: refresh_jti, oauth_code
    pub replays_detected_total: IntCounterVec,
}

impl Metrics {
    /// Creates and registers all counters on a fresh registry.
    ///
    /// # Panics
    ///
    /// Panics if registration fails, which can only happen on duplicate
    /// metric names - a programming error caught at startup.
    pub fn new() -> Self {
        let registry = Registry::new();

        let logins_total = IntCounterVec::new(
            Opts::new("auth_logins_total", "Login attempts by outcome"),
            &["outcome"],
        )
        .expect("metric definition");
        let tokens_issued_total = IntCounterVec::new(
            Opts::new("auth_tokens_issued_total", "Tokens minted by kind"),
            &["kind"],
        )
        .expect("metric definition");
        let authz_decisions_total = IntCounterVec::new(
            Opts::new("auth_authz_decisions_total", "Authorization decisions by result"),
            &["result"],
        )
        .expect("metric definition");
        let authz_cache_total = IntCounterVec::new(
            Opts::new("auth_authz_cache_total", "Authorization cache consultations by level"),
            &["level"],
        )
        .expect("metric definition");
        let rate_limited_total = IntCounterVec::new(
            Opts::new("auth_rate_limited_total", "Requests rejected by the rate limiter"),
            &["endpoint"],
        )
        .expect("metric definition");
        let replays_detected_total = IntCounterVec::new(
            Opts::new("auth_replays_detected_total", "Single-use credential replays"),
            &["kind"],
        )
        .expect("metric definition");

        for collector in [
            &logins_total,
            &tokens_issued_total,
            &authz_decisions_total,
            &authz_cache_total,
            &rate_limited_total,
            &replays_detected_total,
        ] {
            registry
                .register(Box::new(collector.clone()))
                .expect("metric registration");
        }

        Self {
            registry,
            logins_total,
            tokens_issued_total,
            authz_decisions_total,
            authz_cache_total,
            rate_limited_total,
            replays_detected_total,
        }
    }

    /// Renders the registry in Prometheus text exposition format.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_appear_in_exposition() {
        let metrics = Metrics::new();
        metrics.logins_total.with_label_values(&["success"]).inc();
        metrics
            .authz_decisions_total
            .with_label_values(&["allow"])
            .inc();

        let text = metrics.export();
        assert!(text.contains("auth_logins_total"));
        assert!(text.contains("outcome=\"success\""));
        assert!(text.contains("auth_authz_decisions_total"));
    }

    #[test]
    fn test_fresh_registry_per_instance() {
        // Two instances must not share counter state.
        let a = Metrics::new();
        let b = Metrics::new();
        a.logins_total.with_label_values(&["success"]).inc();
        assert_eq!(b.logins_total.with_label_values(&["success"]).get(), 0);
    }
}
