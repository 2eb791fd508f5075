//! # Audit Events
//!
//! Security-relevant events recorded to the append-only audit trail.
//!
//! ## Event Catalogue
//!
//! | Event | Recorded When |
//! |-------|---------------|
//! | `authz_decision` | Every policy decision, allow and deny alike |
//! | `refresh_replay` | A rotated/revoked refresh jti is presented again |
//! | `oauth_code_replay` | An authorization code is redeemed twice |
//! | `two_factor_lockout` | The attempt limiter locks a user out |
//! | `password_reset` | A reset completes |
//! | `consent_granted` | A user approves an OAuth consent screen |
//!
//! Events are fire-and-forget: the writer runs on a detached task and a
//! failed insert logs a warning without touching the primary path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discriminant for one audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    AuthzDecision,
    RefreshReplay,
    OauthCodeReplay,
    TwoFactorLockout,
    PasswordReset,
    ConsentGranted,
}

impl AuditEventKind {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthzDecision => "authz_decision",
            Self::RefreshReplay => "refresh_replay",
            Self::OauthCodeReplay => "oauth_code_replay",
            Self::TwoFactorLockout => "two_factor_lockout",
            Self::PasswordReset => "password_reset",
            Self::ConsentGranted => "consent_granted",
        }
    }
}

/// One record bound for the `audit_events` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// What happened
    pub kind: AuditEventKind,
    /// User involved, when there is one
    pub user_id: Option<Uuid>,
    /// Organization scope, when there is one
    pub org_id: Option<Uuid>,
    /// OAuth client involved, when there is one
    pub client_id: Option<String>,
    /// Event-specific payload
    pub detail: serde_json::Value,
    /// When the event occurred
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    fn new(kind: AuditEventKind) -> Self {
        Self {
            kind,
            user_id: None,
            org_id: None,
            client_id: None,
            detail: serde_json::Value::Null,
            occurred_at: Utc::now(),
        }
    }

    /// An authorization decision, allow or deny.
    pub fn authz_decision(user_id: Uuid, org_id: Uuid, permission: &str, allowed: bool) -> Self {
        let mut event = Self::new(AuditEventKind::AuthzDecision);
        event.user_id = Some(user_id);
        event.org_id = Some(org_id);
        event.detail = serde_json::json!({
            "permission": permission,
            "allowed": allowed,
        });
        event
    }

    /// A refresh token presented after rotation or revocation.
    pub fn refresh_replay(user_id: Uuid, org_id: Option<Uuid>, jti: Uuid) -> Self {
        let mut event = Self::new(AuditEventKind::RefreshReplay);
        event.user_id = Some(user_id);
        event.org_id = org_id;
        event.detail = serde_json::json!({ "jti": jti });
        event
    }

    /// An authorization code redeemed more than once.
    pub fn oauth_code_replay(client_id: &str) -> Self {
        let mut event = Self::new(AuditEventKind::OauthCodeReplay);
        event.client_id = Some(client_id.to_string());
        event
    }

    /// The per-attempt limiter locked a user out of a 2FA-gated step.
    pub fn two_factor_lockout(user_id: Uuid, purpose: &str) -> Self {
        let mut event = Self::new(AuditEventKind::TwoFactorLockout);
        event.user_id = Some(user_id);
        event.detail = serde_json::json!({ "purpose": purpose });
        event
    }

    /// A password reset completed.
    pub fn password_reset(user_id: Uuid) -> Self {
        let mut event = Self::new(AuditEventKind::PasswordReset);
        event.user_id = Some(user_id);
        event
    }

    /// A user granted consent to an OAuth client.
    pub fn consent_granted(user_id: Uuid, client_id: &str, scopes: &[String]) -> Self {
        let mut event = Self::new(AuditEventKind::ConsentGranted);
        event.user_id = Some(user_id);
        event.client_id = Some(client_id.to_string());
        event.detail = serde_json::json!({ "scopes": scopes });
        event
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_storage_representation() {
        assert_eq!(AuditEventKind::AuthzDecision.as_str(), "authz_decision");
        assert_eq!(AuditEventKind::RefreshReplay.as_str(), "refresh_replay");
        assert_eq!(AuditEventKind::ConsentGranted.as_str(), "consent_granted");
    }

    #[test]
    fn test_authz_decision_carries_permission_and_result() {
        let user = Uuid::new_v4();
        let org = Uuid::new_v4();
        let event = AuditEvent::authz_decision(user, org, "image:write", false);

        assert_eq!(event.kind, AuditEventKind::AuthzDecision);
        assert_eq!(event.user_id, Some(user));
        assert_eq!(event.org_id, Some(org));
        assert_eq!(event.detail["permission"], "image:write");
        assert_eq!(event.detail["allowed"], false);
    }

    #[test]
    fn test_refresh_replay_records_jti() {
        let jti = Uuid::new_v4();
        let event = AuditEvent::refresh_replay(Uuid::new_v4(), None, jti);
        assert_eq!(event.detail["jti"], serde_json::json!(jti));
    }

    #[test]
    fn test_consent_records_scopes() {
        let event = AuditEvent::consent_granted(
            Uuid::new_v4(),
            "spa",
            &["groups:read".to_string()],
        );
        assert_eq!(event.client_id.as_deref(), Some("spa"));
        assert_eq!(event.detail["scopes"][0], "groups:read");
    }
}
