//! # Login State Machine, Refresh Rotation & Logout
//!
//! The multi-step login is one idempotent operation that inspects the
//! supplied fields and advances as far as the evidence allows:
//!
//! ```text
//!   START ──password OK──▶ NEED_CODE ──code OK──▶ NEED_2FA? ──no──▶ ORG_SELECT? ──done──▶ TOKENS
//!                                                      │yes                  │
//!                                                      ▼                     ▼
//!                                               NEED_TOTP ──ok──▶ ORG_SELECT? ─…
//! ```
//!
//! Each transition consumes a single-use ephemeral key, which is what
//! makes one login attempt linearizable: a replayed code or a re-used
//! carrier token loses the compare-and-delete race and observes failure.
//!
//! ## Carrier Tokens
//!
//! The hops between requests ride on `pre_auth`-kind JWTs paired with
//! single-use ephemeral records keyed by the token's jti:
//!
//! | Hop | Record | TTL |
//! |-----|--------|-----|
//! | 2FA pending | `pre_auth:{jti}` | 5 min |
//! | org selection pending | `login_session:{jti}` | 15 min |
//!
//! The record kind tells the resume path which hop the token belongs to;
//! the record's consumption makes the hop single-use.
//!
//! ## Enumeration Resistance
//!
//! Every pre-authentication failure is the same `invalid_credentials`:
//! unknown email (after burning a verification against a dummy hash, so
//! timing stays flat), wrong password, inactive account, unknown org. The
//! two deliberate exceptions: `rate_limited`, and `account_not_verified`
//! once the password has already been verified.
//!
//! ## Refresh Rotation
//!
//! Single-use is mandatory. The presented jti is blacklisted **before**
//! the new pair is minted; if the blacklist write fails the rotation
//! aborts and no pair is emitted. A presentation of an already-rotated or
//! revoked jti is a replay: it is audit-logged and rejected, leaving the
//! legitimate successor pair intact.

use rand::Rng;
use serde::Serialize;
use shared::auth::{hash_blocking, verify_bounded, PasswordHasher, TokenKind, TokenMint};
use shared::ephemeral::{keys, EphemeralStore};
use shared::errors::ApiError;
use shared::metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{AuditEvent, NewRefreshTokenRecord, OrgSummary, User};
use crate::repository::{OrgRepository, UserRepository};
use crate::service::audit_log::AuditLog;
use crate::service::email_client::{EmailClient, EmailTemplate};
use crate::service::lockout::Lockout;
use crate::service::two_factor_service::TwoFactorService;

/// Attempt-counter purpose for the emailed login code.
const LOGIN_PURPOSE: &str = "login";

// =============================================================================
// Inputs and Outcomes
// =============================================================================

/// The fields a login request may carry; the machine advances on whatever
/// is present.
#[derive(Debug, Clone, Default)]
pub struct LoginAttempt {
    pub email: Option<String>,
    pub password: Option<String>,
    /// Emailed six-digit login code
    pub code: Option<String>,
    /// TOTP or backup code
    pub totp_code: Option<String>,
    /// Organization to bind the session to
    pub org_id: Option<Uuid>,
    /// Carrier token from a previous step
    pub user_token: Option<String>,
}

/// Tagged result of one login call.
///
/// "This login needs a code" is not an error; it is a distinct variant.
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// Password verified; a six-digit code was emailed
    CodeRequired { user_id: Uuid, expires_in: u64 },
    /// Password (and code) verified; a TOTP or backup code is required
    TotpRequired { user_token: String, expires_in: u64 },
    /// Everything verified; the user must pick an organization
    OrgSelectionRequired {
        organizations: Vec<OrgSummary>,
        user_token: String,
        expires_in: u64,
    },
    /// The attempt completed
    Success(SessionTokens),
}

/// A completed session: the access/refresh pair and its org binding.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub org_id: Option<Uuid>,
    /// Seconds until the access token expires
    pub expires_in: i64,
}

// =============================================================================
// Service
// =============================================================================

/// Login, refresh and logout.
#[derive(Clone)]
pub struct AuthService {
    users: UserRepository,
    orgs: OrgRepository,
    mint: Arc<TokenMint>,
    hasher: Arc<PasswordHasher>,
    store: EphemeralStore,
    lockout: Lockout,
    audit: AuditLog,
    email: EmailClient,
    two_factor: TwoFactorService,
    metrics: Metrics,
    /// Development switch: skip the emailed-code step entirely
    skip_login_code: bool,
    login_code_ttl: Duration,
}

impl AuthService {
    /// Creates the service. All collaborators arrive from the composition
    /// root; nothing here reads global state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: UserRepository,
        orgs: OrgRepository,
        mint: Arc<TokenMint>,
        hasher: Arc<PasswordHasher>,
        store: EphemeralStore,
        audit: AuditLog,
        email: EmailClient,
        two_factor: TwoFactorService,
        metrics: Metrics,
        skip_login_code: bool,
        login_code_ttl: Duration,
    ) -> Self {
        let lockout = Lockout::new(store.clone());
        Self {
            users,
            orgs,
            mint,
            hasher,
            store,
            lockout,
            audit,
            email,
            two_factor,
            metrics,
            skip_login_code,
            login_code_ttl,
        }
    }

    // =========================================================================
    // LOGIN
    // =========================================================================

    /// Drives one login attempt as far as the supplied fields allow.
    pub async fn login(&self, attempt: LoginAttempt) -> Result<LoginOutcome, ApiError> {
        // A carrier token means this is a follow-up hop
        if let Some(token) = attempt.user_token.clone() {
            return self.resume(&token, &attempt).await;
        }

        // ── Password check ──────────────────────────────────────────────
        let email = attempt
            .email
            .as_deref()
            .ok_or(ApiError::InvalidCredentials)?
            .trim()
            .to_lowercase();
        let password = attempt
            .password
            .as_deref()
            .ok_or(ApiError::InvalidCredentials)?;

        let Some(user) = self.users.find_by_email(&email).await? else {
            // Burn a verification against a dummy hash so "unknown user"
            // and "wrong password" are indistinguishable by timing
            let hasher = self.hasher.clone();
            let burned = password.to_string();
            let _ = tokio::task::spawn_blocking(move || hasher.verify_dummy(&burned)).await;
            self.count_login("invalid_credentials");
            return Err(ApiError::InvalidCredentials);
        };

        self.lockout.ensure_clear(user.user_id, LOGIN_PURPOSE).await?;

        let password_ok = verify_bounded(
            self.hasher.clone(),
            password.to_string(),
            user.hashed_password.clone(),
        )
        .await?;
        if !password_ok {
            warn!(user_id = %user.user_id, "Failed login attempt - wrong password");
            self.count_login("invalid_credentials");
            return Err(ApiError::InvalidCredentials);
        }

        if !user.active {
            // Inactive is not disclosed pre-authentication
            self.count_login("invalid_credentials");
            return Err(ApiError::InvalidCredentials);
        }
        if !user.verified {
            // Post-authentication: the caller proved they know the password
            self.count_login("unverified");
            return Err(ApiError::AccountNotVerified);
        }

        self.maybe_rehash(&user, password).await;

        // ── Emailed login code ──────────────────────────────────────────
        if !self.skip_login_code {
            match attempt.code.as_deref() {
                None => return self.issue_login_code(&user).await,
                Some(code) => {
                    let consumed = self
                        .store
                        .consume_if_equal(&keys::login_code(user.user_id), code)
                        .await?;
                    if !consumed {
                        if self.lockout.record_failure(user.user_id, LOGIN_PURPOSE).await? {
                            warn!(user_id = %user.user_id, "Login-code lockout triggered");
                            self.count_login("locked_out");
                        } else {
                            self.count_login("invalid_credentials");
                        }
                        return Err(ApiError::InvalidCredentials);
                    }
                    self.lockout.clear(user.user_id, LOGIN_PURPOSE).await?;
                }
            }
        }

        // ── TOTP gate ───────────────────────────────────────────────────
        if user.totp_active() {
            match attempt.totp_code.as_deref() {
                Some(code) => self.two_factor.verify_login_code(&user, code).await?,
                None => return self.issue_totp_hop(&user).await,
            }
        }

        // ── Org selection ───────────────────────────────────────────────
        self.select_org(&user, attempt.org_id).await
    }

    /// Resumes a login from a carrier token (2FA hop or org selection).
    async fn resume(&self, token: &str, attempt: &LoginAttempt) -> Result<LoginOutcome, ApiError> {
        // Carrier problems are pre-authentication failures: collapse
        let claims = self
            .mint
            .decode(token, TokenKind::PreAuth)
            .map_err(|_| ApiError::InvalidCredentials)?;
        let user_id = claims.sub.ok_or(ApiError::InvalidCredentials)?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(ApiError::InvalidCredentials)?;
        if !user.active {
            return Err(ApiError::InvalidCredentials);
        }

        // The record kind distinguishes the hop
        let totp_key = keys::pre_auth(claims.jti);
        if self.store.exists(&totp_key).await? {
            let code = attempt
                .totp_code
                .as_deref()
                .ok_or(ApiError::InvalidCredentials)?;
            self.two_factor.verify_login_code(&user, code).await?;

            // Single use: exactly one concurrent caller passes this gate
            let consumed = self
                .store
                .consume_if_equal(&totp_key, &user_id.to_string())
                .await?;
            if !consumed {
                return Err(ApiError::InvalidCredentials);
            }
            return self.select_org(&user, attempt.org_id).await;
        }

        // Org-selection hop: an org choice is required now
        let org_id = attempt.org_id.ok_or(ApiError::InvalidCredentials)?;
        if self.orgs.find_membership(user_id, org_id).await?.is_none() {
            // Unknown or foreign org is not disclosed; the session record
            // survives so the client may retry with a valid choice
            return Err(ApiError::InvalidCredentials);
        }

        let consumed = self
            .store
            .consume_if_equal(&keys::login_session(claims.jti), &user_id.to_string())
            .await?;
        if !consumed {
            return Err(ApiError::InvalidCredentials);
        }

        Ok(LoginOutcome::Success(self.issue_session(&user, Some(org_id)).await?))
    }

    /// Emits the six-digit login code and parks the attempt.
    async fn issue_login_code(&self, user: &User) -> Result<LoginOutcome, ApiError> {
        let code = generate_numeric_code(6);
        self.store
            .set_with_ttl(&keys::login_code(user.user_id), &code, self.login_code_ttl)
            .await?;

        let expires_in = self.login_code_ttl.as_secs();
        self.email.dispatch(
            &user.email,
            EmailTemplate::LoginCode,
            serde_json::json!({ "code": code, "expires_in": expires_in }),
        );

        self.count_login("code_required");
        Ok(LoginOutcome::CodeRequired { user_id: user.user_id, expires_in })
    }

    /// Mints the 2FA carrier and parks the attempt.
    async fn issue_totp_hop(&self, user: &User) -> Result<LoginOutcome, ApiError> {
        let ttl = self.mint.pre_auth_ttl_seconds();
        let (token, jti) = self.mint.issue_pre_auth(user.user_id, ttl)?;
        self.store
            .set_with_ttl(
                &keys::pre_auth(jti),
                &user.user_id.to_string(),
                Duration::from_secs(ttl),
            )
            .await?;

        self.count_login("totp_required");
        Ok(LoginOutcome::TotpRequired { user_token: token, expires_in: ttl })
    }

    /// The org-selection step: zero orgs bind to none, one binds to it,
    /// several park the attempt behind a selection carrier.
    async fn select_org(&self, user: &User, requested: Option<Uuid>) -> Result<LoginOutcome, ApiError> {
        let organizations = self.orgs.list_orgs_for_user(user.user_id).await?;

        if let Some(org_id) = requested {
            // Valid without a carrier only when the membership holds
            if organizations.iter().any(|o| o.org_id == org_id) {
                return Ok(LoginOutcome::Success(
                    self.issue_session(user, Some(org_id)).await?,
                ));
            }
            return Err(ApiError::InvalidCredentials);
        }

        match organizations.len() {
            0 => Ok(LoginOutcome::Success(self.issue_session(user, None).await?)),
            1 => {
                let org_id = organizations[0].org_id;
                Ok(LoginOutcome::Success(self.issue_session(user, Some(org_id)).await?))
            }
            _ => {
                let ttl = self.mint.login_session_ttl_seconds();
                let (token, jti) = self.mint.issue_pre_auth(user.user_id, ttl)?;
                self.store
                    .set_with_ttl(
                        &keys::login_session(jti),
                        &user.user_id.to_string(),
                        Duration::from_secs(ttl),
                    )
                    .await?;

                self.count_login("org_selection");
                Ok(LoginOutcome::OrgSelectionRequired {
                    organizations,
                    user_token: token,
                    expires_in: ttl,
                })
            }
        }
    }

    /// Mints and persists a completed session.
    async fn issue_session(&self, user: &User, org_id: Option<Uuid>) -> Result<SessionTokens, ApiError> {
        let pair = self.mint.issue_pair(user.user_id, org_id)?;

        self.users
            .create_refresh_record(NewRefreshTokenRecord {
                jti: pair.refresh_jti,
                user_id: user.user_id,
                org_id,
                expires_at: pair.refresh_expires_at,
            })
            .await?;
        self.users.update_last_login(user.user_id).await?;

        info!(user_id = %user.user_id, org_id = ?org_id, "Login completed");
        self.count_login("success");
        self.count_token("access");
        self.count_token("refresh");

        Ok(SessionTokens {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            org_id,
            expires_in: pair.expires_in,
        })
    }

    /// Transparently upgrades hashes stored under an older, weaker policy.
    async fn maybe_rehash(&self, user: &User, password: &str) {
        if !self.hasher.needs_rehash(&user.hashed_password) {
            return;
        }
        match hash_blocking(self.hasher.clone(), password.to_string()).await {
            Ok(new_hash) => {
                if let Err(e) = self.users.update_password(user.user_id, &new_hash).await {
                    warn!(user_id = %user.user_id, error = %e, "Rehash persist failed");
                } else {
                    info!(user_id = %user.user_id, "Password hash upgraded to current policy");
                }
            }
            Err(e) => warn!(user_id = %user.user_id, error = %e, "Rehash failed"),
        }
    }

    // =========================================================================
    // REFRESH & LOGOUT
    // =========================================================================

    /// Rotates a refresh token: single-use, blacklist before mint.
    pub async fn refresh(&self, refresh_token: &str) -> Result<SessionTokens, ApiError> {
        let claims = self.mint.decode(refresh_token, TokenKind::Refresh)?;
        if claims.client_id.is_some() {
            // OAuth refresh tokens rotate at the OAuth token endpoint
            return Err(ApiError::TokenInvalid);
        }
        let user_id = claims.sub.ok_or(ApiError::TokenInvalid)?;

        if self.store.is_jti_blacklisted(claims.jti).await? {
            self.handle_replay(user_id, claims.org_id, &claims).await?;
            return Err(ApiError::TokenRevoked);
        }

        let Some(record) = self.users.find_refresh_record(claims.jti).await? else {
            // Signed but never persisted: not one of ours any more
            return Err(ApiError::TokenInvalid);
        };
        if record.is_revoked() {
            self.handle_replay(user_id, claims.org_id, &claims).await?;
            return Err(ApiError::TokenRevoked);
        }

        // Rotation invariant: the old jti is dead before the new pair
        // exists. A failed blacklist write aborts the rotation.
        self.store
            .blacklist_jti(claims.jti, claims.remaining_lifetime())
            .await?;
        self.users.revoke_refresh_record(claims.jti).await?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .filter(|u| u.active)
            .ok_or(ApiError::TokenInvalid)?;

        let session = self.issue_rotated(&user.user_id, claims.org_id).await?;
        info!(user_id = %user_id, "Refresh token rotated");
        Ok(session)
    }

    async fn issue_rotated(&self, user_id: &Uuid, org_id: Option<Uuid>) -> Result<SessionTokens, ApiError> {
        let pair = self.mint.issue_pair(*user_id, org_id)?;
        self.users
            .create_refresh_record(NewRefreshTokenRecord {
                jti: pair.refresh_jti,
                user_id: *user_id,
                org_id,
                expires_at: pair.refresh_expires_at,
            })
            .await?;

        self.count_token("access");
        self.count_token("refresh");

        Ok(SessionTokens {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            org_id,
            expires_in: pair.expires_in,
        })
    }

    /// Replay response: audit the event and make sure the replayed jti is
    /// fully dead; the caller fails the request with `TokenRevoked`.
    ///
    /// Only the replayed token is revoked. The successor pair from the
    /// legitimate rotation stays valid, so a stray retry of an old token
    /// does not log the real client out.
    async fn handle_replay(
        &self,
        user_id: Uuid,
        org_id: Option<Uuid>,
        claims: &shared::auth::Claims,
    ) -> Result<(), ApiError> {
        warn!(user_id = %user_id, jti = %claims.jti, "Refresh token replay detected");
        self.metrics
            .replays_detected_total
            .with_label_values(&["refresh_jti"])
            .inc();
        self.audit
            .record(AuditEvent::refresh_replay(user_id, org_id, claims.jti));

        // Idempotent cleanup of both revocation surfaces
        self.users.revoke_refresh_record(claims.jti).await?;
        if let Err(e) = self
            .store
            .blacklist_jti(claims.jti, claims.remaining_lifetime())
            .await
        {
            warn!(jti = %claims.jti, error = %e, "Replay blacklist write failed");
        }

        Ok(())
    }

    /// Revokes one refresh token. Idempotent: expired tokens and repeat
    /// calls both succeed quietly.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), ApiError> {
        let claims = match self.mint.decode(refresh_token, TokenKind::Refresh) {
            Ok(claims) => claims,
            // Nothing left to revoke
            Err(ApiError::TokenExpired) => return Ok(()),
            Err(e) => return Err(e),
        };

        self.store
            .blacklist_jti(claims.jti, claims.remaining_lifetime())
            .await?;
        self.users.revoke_refresh_record(claims.jti).await?;

        if let Some(user_id) = claims.sub {
            info!(user_id = %user_id, "Logout completed");
        }
        Ok(())
    }

    // =========================================================================
    // Metrics Plumbing
    // =========================================================================

    fn count_login(&self, outcome: &str) {
        self.metrics.logins_total.with_label_values(&[outcome]).inc();
    }

    fn count_token(&self, kind: &str) {
        self.metrics.tokens_issued_total.with_label_values(&[kind]).inc();
    }
}

// =============================================================================
// Code Generation
// =============================================================================

/// Uniform random decimal code of the given width, zero padded.
pub(crate) fn generate_numeric_code(digits: u32) -> String {
    let bound = 10u64.pow(digits);
    let value = rand::thread_rng().gen_range(0..bound);
    format!("{value:0width$}", width = digits as usize)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_code_width_and_charset() {
        for _ in 0..100 {
            let code = generate_numeric_code(6);
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_numeric_codes_vary() {
        let codes: std::collections::HashSet<String> =
            (0..50).map(|_| generate_numeric_code(6)).collect();
        // 50 draws from a million-value space collide with negligible odds
        assert!(codes.len() > 40);
    }

    #[test]
    fn test_session_tokens_serialize_camel_case() {
        let session = SessionTokens {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            org_id: None,
            expires_in: 900,
        };
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("accessToken").is_some());
        assert!(json.get("refreshToken").is_some());
        assert!(json.get("expiresIn").is_some());
    }
}
