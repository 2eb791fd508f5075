//! # Account Lifecycle
//!
//! Registration, email verification, and password reset.
//!
//! ## Token Shape
//!
//! Both flows hand out an opaque token (32 random bytes, base64url) whose
//! ephemeral value is `"{code}:{user_id}"`, plus a reverse key that keeps
//! at most one token active per user:
//!
//! ```text
//! verify_token:{token} → "{code}:{user}"   TTL 24h ─┐ paired
//! verify_user:{user}   → token             TTL 24h ─┘
//!
//! reset_token:{token}  → "{code}:{user}"   TTL 1h  ─┐ paired
//! reset_user:{user}    → token             TTL 1h  ─┘
//! ```
//!
//! Redemption is one `consume_if_equal` with the expected value rebuilt
//! from the *supplied* code, so a wrong code fails the compare, leaves the
//! token alive, and feeds the attempt counter; the right code consumes the
//! token atomically.
//!
//! ## Enumeration Resistance
//!
//! Registration against a taken email and reset requests for unknown
//! emails both return the same generic success as the happy path - the
//! only difference is that no email is dispatched.
//!
//! ## Reset Consequences
//!
//! A completed reset revokes every outstanding refresh token for the user
//! (each jti blacklisted for its remaining life) and drops the user's
//! authorization cache entries.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use rand::RngCore;
use shared::auth::{hash_blocking, PasswordHasher, StrengthPolicy};
use shared::ephemeral::{keys, EphemeralStore};
use shared::errors::ApiError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{AuditEvent, NewUser, User};
use crate::repository::UserRepository;
use crate::service::audit_log::AuditLog;
use crate::service::auth_service::generate_numeric_code;
use crate::service::authz_service::AuthzService;
use crate::service::breach_client::BreachClient;
use crate::service::email_client::{EmailClient, EmailTemplate};
use crate::service::lockout::Lockout;

/// Attempt-counter purposes.
const VERIFY_PURPOSE: &str = "verify";
const RESET_PURPOSE: &str = "reset";

/// Outcome of a registration call.
///
/// Both fields are `None` when the email was already taken: the HTTP
/// response is identical either way, and the handler surfaces the token
/// outside production only.
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    pub user_id: Option<Uuid>,
    pub verification_token: Option<String>,
}

/// Registration, verification and reset flows.
#[derive(Clone)]
pub struct AccountService {
    users: UserRepository,
    store: EphemeralStore,
    hasher: Arc<PasswordHasher>,
    breach: BreachClient,
    email: EmailClient,
    audit: AuditLog,
    authz: AuthzService,
    lockout: Lockout,
    verification_ttl: Duration,
    reset_ttl: Duration,
}

impl AccountService {
    /// Creates the service.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: UserRepository,
        store: EphemeralStore,
        hasher: Arc<PasswordHasher>,
        breach: BreachClient,
        email: EmailClient,
        audit: AuditLog,
        authz: AuthzService,
        verification_ttl: Duration,
        reset_ttl: Duration,
    ) -> Self {
        let lockout = Lockout::new(store.clone());
        Self {
            users,
            store,
            hasher,
            breach,
            email,
            audit,
            authz,
            lockout,
            verification_ttl,
            reset_ttl,
        }
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Registers a new, unverified account.
    ///
    /// A taken email yields the same result shape as success, minus the
    /// email dispatch.
    pub async fn register(&self, email: &str, password: &str) -> Result<RegistrationResult, ApiError> {
        let email = email.trim().to_lowercase();

        // Strength gate: local policy, then the breach corpus
        StrengthPolicy::check(password)?;
        self.breach.gate(password).await?;

        if self.users.find_by_email(&email).await?.is_some() {
            info!(email = %email, "Registration against an existing email");
            return Ok(RegistrationResult { user_id: None, verification_token: None });
        }

        let hashed_password = hash_blocking(self.hasher.clone(), password.to_string()).await?;

        let user = match self
            .users
            .create(NewUser { email: email.clone(), hashed_password })
            .await
        {
            Ok(user) => user,
            // Lost a registration race: same generic outcome as above
            Err(ApiError::Conflict { .. }) => {
                return Ok(RegistrationResult { user_id: None, verification_token: None });
            }
            Err(e) => return Err(e),
        };

        info!(user_id = %user.user_id, "User registered");

        let token = self.issue_verification(&user).await?;
        Ok(RegistrationResult {
            user_id: Some(user.user_id),
            verification_token: Some(token),
        })
    }

    /// Mints a verification token, replacing any prior one for the user.
    async fn issue_verification(&self, user: &User) -> Result<String, ApiError> {
        let reverse_key = keys::verify_user(user.user_id);

        // One active verification per user: retire the predecessor
        if let Some(old_token) = self.store.get(&reverse_key).await? {
            self.store.delete(&keys::verify_token(&old_token)).await?;
        }

        let token = generate_url_token();
        let code = generate_numeric_code(6);
        let value = format!("{}:{}", code, user.user_id);

        self.store
            .set_with_ttl(&keys::verify_token(&token), &value, self.verification_ttl)
            .await?;
        self.store
            .set_with_ttl(&reverse_key, &token, self.verification_ttl)
            .await?;

        self.email.dispatch(
            &user.email,
            EmailTemplate::EmailVerification,
            serde_json::json!({
                "token": token,
                "code": code,
                "expires_in": self.verification_ttl.as_secs(),
            }),
        );

        Ok(token)
    }

    /// Redeems a verification token + code pair.
    pub async fn verify(&self, token: &str, code: &str) -> Result<Uuid, ApiError> {
        let key = keys::verify_token(token);
        let Some(value) = self.store.get(&key).await? else {
            return Err(ApiError::InvalidCredentials);
        };
        let user_id = user_of(&value)?;

        self.lockout.ensure_clear(user_id, VERIFY_PURPOSE).await?;

        // Rebuild the expected value from the supplied code; a mismatch
        // fails the compare and leaves the token alive
        let expected = format!("{code}:{user_id}");
        if !self.store.consume_if_equal(&key, &expected).await? {
            self.lockout.record_failure(user_id, VERIFY_PURPOSE).await?;
            return Err(ApiError::InvalidCredentials);
        }

        self.users.mark_verified(user_id).await?;
        self.store.delete(&keys::verify_user(user_id)).await?;
        self.lockout.clear(user_id, VERIFY_PURPOSE).await?;

        info!(user_id = %user_id, "Email verified");
        Ok(user_id)
    }

    /// Re-issues the verification email. Generic for unknown or already
    /// verified addresses; the endpoint's rate limit bounds the volume.
    pub async fn resend_verification(&self, email: &str) -> Result<(), ApiError> {
        let email = email.trim().to_lowercase();

        match self.users.find_by_email(&email).await? {
            Some(user) if !user.verified => {
                self.issue_verification(&user).await?;
            }
            Some(_) => {
                info!(email = %email, "Resend requested for a verified account");
            }
            None => {
                info!(email = %email, "Resend requested for unknown email");
            }
        }

        Ok(())
    }

    // =========================================================================
    // DEACTIVATION
    // =========================================================================

    /// Deactivates the account and revokes every outstanding session.
    ///
    /// The row survives (audit trail); authentication stops immediately
    /// because login checks `active` and every live refresh jti lands on
    /// the blacklist here.
    pub async fn deactivate(&self, user_id: Uuid) -> Result<(), ApiError> {
        self.users.deactivate(user_id).await?;

        let revoked = self.users.revoke_all_refresh_records(user_id).await?;
        for record in revoked {
            let remaining = (record.expires_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            if let Err(e) = self.store.blacklist_jti(record.jti, remaining).await {
                warn!(jti = %record.jti, error = %e, "Post-deactivation blacklist write failed");
            }
        }

        self.authz.invalidate_user_all(user_id).await;

        info!(user_id = %user_id, "Account deactivated");
        Ok(())
    }

    // =========================================================================
    // PASSWORD RESET
    // =========================================================================

    /// Starts a reset. Always generic; a prior reset token is overwritten.
    pub async fn request_reset(&self, email: &str) -> Result<(), ApiError> {
        let email = email.trim().to_lowercase();

        let Some(user) = self.users.find_by_email(&email).await? else {
            info!(email = %email, "Password reset requested for unknown email");
            return Ok(());
        };

        let reverse_key = keys::reset_user(user.user_id);
        if let Some(old_token) = self.store.get(&reverse_key).await? {
            self.store.delete(&keys::reset_token(&old_token)).await?;
        }

        let token = generate_url_token();
        let code = generate_numeric_code(6);
        let value = format!("{}:{}", code, user.user_id);

        self.store
            .set_with_ttl(&keys::reset_token(&token), &value, self.reset_ttl)
            .await?;
        self.store
            .set_with_ttl(&reverse_key, &token, self.reset_ttl)
            .await?;

        self.email.dispatch(
            &user.email,
            EmailTemplate::PasswordReset,
            serde_json::json!({
                "token": token,
                "code": code,
                "expires_in": self.reset_ttl.as_secs(),
            }),
        );

        info!(user_id = %user.user_id, "Password reset token issued");
        Ok(())
    }

    /// Completes a reset: consume, gate, rewrite, revoke sessions.
    pub async fn reset(&self, token: &str, code: &str, new_password: &str) -> Result<(), ApiError> {
        let key = keys::reset_token(token);
        let Some(value) = self.store.get(&key).await? else {
            return Err(ApiError::InvalidCredentials);
        };
        let user_id = user_of(&value)?;

        self.lockout.ensure_clear(user_id, RESET_PURPOSE).await?;

        let expected = format!("{code}:{user_id}");
        if !self.store.consume_if_equal(&key, &expected).await? {
            self.lockout.record_failure(user_id, RESET_PURPOSE).await?;
            return Err(ApiError::InvalidCredentials);
        }

        // The token is burned; a weak replacement password means the user
        // requests a fresh reset
        StrengthPolicy::check(new_password)?;
        self.breach.gate(new_password).await?;

        let hashed_password =
            hash_blocking(self.hasher.clone(), new_password.to_string()).await?;
        self.users.update_password(user_id, &hashed_password).await?;
        self.store.delete(&keys::reset_user(user_id)).await?;
        self.lockout.clear(user_id, RESET_PURPOSE).await?;

        // Every outstanding session dies with the old password
        let revoked = self.users.revoke_all_refresh_records(user_id).await?;
        for record in revoked {
            let remaining = (record.expires_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            if let Err(e) = self.store.blacklist_jti(record.jti, remaining).await {
                warn!(jti = %record.jti, error = %e, "Post-reset blacklist write failed");
            }
        }

        // Cache hygiene for the principal
        self.authz.invalidate_user_all(user_id).await;

        self.audit.record(AuditEvent::password_reset(user_id));
        info!(user_id = %user_id, "Password reset completed");
        Ok(())
    }
}

/// Extracts the user id from a `"{code}:{user_id}"` value.
fn user_of(value: &str) -> Result<Uuid, ApiError> {
    value
        .split_once(':')
        .and_then(|(_, user)| Uuid::parse_str(user).ok())
        .ok_or_else(|| ApiError::InternalError {
            message: "Malformed ephemeral token value".to_string(),
        })
}

/// Opaque URL-safe token: 32 random bytes, base64url without padding.
pub(crate) fn generate_url_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_token_shape() {
        let token = generate_url_token();
        // 32 bytes → 43 base64url chars, no padding
        assert_eq!(token.len(), 43);
        assert!(!token.contains('='));
        assert!(!token.contains('+'));
        assert!(!token.contains('/'));
    }

    #[test]
    fn test_url_tokens_are_unique() {
        assert_ne!(generate_url_token(), generate_url_token());
    }

    #[test]
    fn test_user_of_parses_value() {
        let user_id = Uuid::new_v4();
        let value = format!("123456:{user_id}");
        assert_eq!(user_of(&value).unwrap(), user_id);
    }

    #[test]
    fn test_user_of_rejects_garbage() {
        assert!(user_of("no-separator").is_err());
        assert!(user_of("123456:not-a-uuid").is_err());
    }

    #[tokio::test]
    async fn test_verification_value_consumed_exactly_once() {
        // The redemption primitive, exercised directly against the store
        let store = EphemeralStore::in_memory();
        let user_id = Uuid::new_v4();
        let token = generate_url_token();
        let value = format!("123456:{user_id}");

        store
            .set_with_ttl(&keys::verify_token(&token), &value, Duration::from_secs(60))
            .await
            .unwrap();

        // Wrong code: compare fails, token survives
        let wrong = format!("000000:{user_id}");
        assert!(!store
            .consume_if_equal(&keys::verify_token(&token), &wrong)
            .await
            .unwrap());
        assert!(store.exists(&keys::verify_token(&token)).await.unwrap());

        // Right code: consumed, gone, second attempt fails
        assert!(store
            .consume_if_equal(&keys::verify_token(&token), &value)
            .await
            .unwrap());
        assert!(!store
            .consume_if_equal(&keys::verify_token(&token), &value)
            .await
            .unwrap());
    }
}
