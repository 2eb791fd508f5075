//! # OAuth 2.0 Authorization Server
//!
//! Authorization-code grant with PKCE, refresh-token rotation,
//! client-credentials for service-to-service calls, and RFC 7009
//! revocation.
//!
//! ## Grant Map
//!
//! ```text
//! GET/POST /oauth/authorize ──► code (60 s, single use) ──┐
//!                                                         │
//! POST /oauth/token                                       ▼
//!   grant_type=authorization_code + PKCE ──► oauth access + refresh
//!   grant_type=refresh_token             ──► rotated pair (scope may narrow)
//!   grant_type=client_credentials        ──► access only, client principal
//!
//! POST /oauth/revoke ──► blacklist jti, always 200
//! ```
//!
//! ## Authorization Codes
//!
//! A code is 32 random bytes (base64url) bound to
//! `(client, user, redirect_uri, scope, pkce)` in the ephemeral store for
//! 60 seconds. Redemption consumes the binding atomically and leaves a
//! short-lived `"used"` tombstone in its place, so a second redemption is
//! recognizably a replay: it is audit-logged and rejected.
//!
//! ## Client Authentication
//!
//! | Type | Token endpoint |
//! |------|----------------|
//! | confidential | secret via HTTP Basic or form body, Argon2id-verified |
//! | public | `client_id` only; PKCE carries the proof of possession |
//!
//! Resource servers distinguish the principal kind by the presence of
//! `sub` (a user) versus `client_id` without `sub` (a service).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Serialize;
use sha2::{Digest, Sha256};
use shared::auth::{verify_bounded, PasswordHasher, TokenKind, TokenMint};
use shared::ephemeral::{keys, EphemeralStore};
use shared::errors::ApiError;
use shared::metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;
use validator::{ValidationError, ValidationErrors};

use crate::domain::{AuditEvent, AuthorizationCode, ClientType, OAuthClient, PkceMethod};
use crate::repository::{NewOAuthClient, OAuthRepository, OrgRepository};
use crate::service::account_service::generate_url_token;
use crate::service::audit_log::AuditLog;

/// Lifetime of an authorization code.
const CODE_TTL: Duration = Duration::from_secs(60);

/// Lifetime of the `"used"` tombstone left behind by redemption.
const CODE_TOMBSTONE_TTL: Duration = Duration::from_secs(300);

/// Tombstone value marking a redeemed code.
const CODE_USED: &str = "used";

// =============================================================================
// Requests and Responses
// =============================================================================

/// Parameters of one authorization request, already authenticated.
#[derive(Debug, Clone)]
pub struct AuthorizeParams {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    /// Space-separated scope list
    pub scope: String,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    /// Organization binding carried into the issued tokens
    pub org_id: Option<Uuid>,
    /// Present on the consent-approval POST
    pub approved: bool,
}

/// Outcome of an authorization request.
#[derive(Debug, Clone)]
pub enum AuthorizeOutcome {
    /// The consent screen must be rendered
    ConsentRequired {
        client_name: String,
        scopes: Vec<String>,
    },
    /// Redirect back to the client with the code
    Redirect {
        redirect_uri: String,
        code: String,
        state: Option<String>,
    },
}

/// Form parameters of one token-endpoint call.
#[derive(Debug, Clone, Default)]
pub struct TokenParams {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Successful token response (RFC 6749 §5.1).
#[derive(Debug, Clone, Serialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}

/// Server metadata (RFC 8414).
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub revocation_endpoint: String,
    pub response_types_supported: Vec<&'static str>,
    pub grant_types_supported: Vec<&'static str>,
    pub scopes_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<&'static str>,
    pub token_endpoint_auth_methods_supported: Vec<&'static str>,
}

// =============================================================================
// Service
// =============================================================================

/// The authorization server.
#[derive(Clone)]
pub struct OAuthService {
    clients: OAuthRepository,
    orgs: OrgRepository,
    mint: Arc<TokenMint>,
    hasher: Arc<PasswordHasher>,
    store: EphemeralStore,
    audit: AuditLog,
    metrics: Metrics,
    oauth_access_ttl: u64,
}

impl OAuthService {
    /// Creates the server.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clients: OAuthRepository,
        orgs: OrgRepository,
        mint: Arc<TokenMint>,
        hasher: Arc<PasswordHasher>,
        store: EphemeralStore,
        audit: AuditLog,
        metrics: Metrics,
        oauth_access_ttl: u64,
    ) -> Self {
        Self {
            clients,
            orgs,
            mint,
            hasher,
            store,
            audit,
            metrics,
            oauth_access_ttl,
        }
    }

    // =========================================================================
    // DISCOVERY
    // =========================================================================

    /// Server metadata for `/.well-known/oauth-authorization-server`.
    ///
    /// Advertised scopes are the permission catalog's canonical strings.
    pub async fn discovery(&self, base_url: &str) -> Result<DiscoveryMetadata, ApiError> {
        let base = base_url.trim_end_matches('/');
        let scopes = self
            .orgs
            .list_permissions()
            .await?
            .iter()
            .map(|p| p.canonical())
            .collect();

        Ok(DiscoveryMetadata {
            issuer: base.to_string(),
            authorization_endpoint: format!("{base}/oauth/authorize"),
            token_endpoint: format!("{base}/oauth/token"),
            revocation_endpoint: format!("{base}/oauth/revoke"),
            response_types_supported: vec!["code"],
            grant_types_supported: vec![
                "authorization_code",
                "refresh_token",
                "client_credentials",
            ],
            scopes_supported: scopes,
            code_challenge_methods_supported: vec!["S256", "plain"],
            token_endpoint_auth_methods_supported: vec![
                "client_secret_basic",
                "client_secret_post",
                "none",
            ],
        })
    }

    // =========================================================================
    // AUTHORIZATION ENDPOINT
    // =========================================================================

    /// Validates an authorization request and either asks for consent or
    /// mints the code.
    ///
    /// The caller has already authenticated the user (bearer via the login
    /// machinery); `user_id` is that principal.
    pub async fn authorize(
        &self,
        user_id: Uuid,
        params: AuthorizeParams,
    ) -> Result<AuthorizeOutcome, ApiError> {
        let client = self
            .clients
            .find_client(&params.client_id)
            .await?
            .ok_or_else(|| ApiError::BadRequest {
                message: "Unknown client".to_string(),
            })?;

        // Exact string match against the registered list; anything else is
        // an open-redirect vector and never redirected to
        if !client.redirect_uri_allowed(&params.redirect_uri) {
            return Err(ApiError::BadRequest {
                message: "redirect_uri is not registered for this client".to_string(),
            });
        }

        if params.response_type != "code" {
            return Err(ApiError::BadRequest {
                message: "Unsupported response_type".to_string(),
            });
        }

        if !client.grant_allowed("authorization_code") {
            return Err(ApiError::BadRequest {
                message: "Client may not use the authorization_code grant".to_string(),
            });
        }

        let scopes = split_scopes(&params.scope);
        if scopes.is_empty() || !client.scopes_allowed(&scopes) {
            return Err(scope_validation_error());
        }

        // PKCE: mandatory for public clients, honored whenever registered
        let pkce = self.validate_pkce(&client, &params)?;

        // Consent, unless first-party or already on record
        if client.require_consent && !client.first_party {
            let consent = self.clients.find_consent(user_id, &client.client_id).await?;
            let covered = consent.map(|c| c.covers(&scopes)).unwrap_or(false);

            if !covered {
                if !params.approved {
                    return Ok(AuthorizeOutcome::ConsentRequired {
                        client_name: client.name.clone(),
                        scopes,
                    });
                }
                self.clients
                    .upsert_consent(user_id, &client.client_id, &scopes)
                    .await?;
                self.audit
                    .record(AuditEvent::consent_granted(user_id, &client.client_id, &scopes));
            }
        }

        // Mint the code and bind everything it stands for
        let code = generate_url_token();
        let binding = AuthorizationCode {
            client_id: client.client_id.clone(),
            user_id,
            org_id: params.org_id,
            redirect_uri: params.redirect_uri.clone(),
            scope: scopes,
            pkce_challenge: pkce.as_ref().map(|(challenge, _)| challenge.clone()),
            pkce_method: pkce.map(|(_, method)| method),
        };
        let serialized = serde_json::to_string(&binding).map_err(|e| ApiError::InternalError {
            message: format!("Code binding serialization failed: {}", e),
        })?;
        self.store
            .set_with_ttl(&keys::oauth_code(&code), &serialized, CODE_TTL)
            .await?;

        info!(client_id = %client.client_id, user_id = %user_id, "Authorization code issued");

        Ok(AuthorizeOutcome::Redirect {
            redirect_uri: params.redirect_uri,
            code,
            state: params.state,
        })
    }

    fn validate_pkce(
        &self,
        client: &OAuthClient,
        params: &AuthorizeParams,
    ) -> Result<Option<(String, PkceMethod)>, ApiError> {
        match params.code_challenge.as_deref() {
            Some(challenge) => {
                // Method defaults to plain per RFC 7636 §4.3
                let method = match params.code_challenge_method.as_deref() {
                    None => PkceMethod::Plain,
                    Some(raw) => PkceMethod::parse(raw).ok_or_else(|| ApiError::BadRequest {
                        message: "Unsupported code_challenge_method".to_string(),
                    })?,
                };
                Ok(Some((challenge.to_string(), method)))
            }
            None if client.require_pkce || client.typed() == ClientType::Public => {
                Err(ApiError::BadRequest {
                    message: "code_challenge is required for this client".to_string(),
                })
            }
            None => Ok(None),
        }
    }

    // =========================================================================
    // TOKEN ENDPOINT
    // =========================================================================

    /// Executes one token-endpoint call.
    ///
    /// `basic_auth` carries decoded HTTP Basic credentials when present;
    /// body credentials are the fallback.
    pub async fn token(
        &self,
        params: TokenParams,
        basic_auth: Option<(String, String)>,
    ) -> Result<TokenGrant, ApiError> {
        // Resolve client credentials: Basic header wins over the body
        let (client_id, client_secret) = match basic_auth {
            Some((id, secret)) => (id, Some(secret)),
            None => (
                params
                    .client_id
                    .clone()
                    .ok_or(ApiError::InvalidCredentials)?,
                params.client_secret.clone(),
            ),
        };

        let client = self
            .authenticate_client(&client_id, client_secret.as_deref())
            .await?;

        match params.grant_type.as_str() {
            "authorization_code" => self.grant_authorization_code(&client, &params).await,
            "refresh_token" => self.grant_refresh(&client, &params).await,
            "client_credentials" => self.grant_client_credentials(&client, &params).await,
            _ => Err(ApiError::BadRequest {
                message: "Unsupported grant_type".to_string(),
            }),
        }
    }

    /// Authenticates the client for the token endpoint.
    ///
    /// Confidential clients prove the secret; public clients are
    /// identified only (PKCE is their proof).
    async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: Option<&str>,
    ) -> Result<OAuthClient, ApiError> {
        let client = self
            .clients
            .find_client(client_id)
            .await?
            .ok_or(ApiError::InvalidCredentials)?;

        if client.typed() == ClientType::Confidential {
            let secret = client_secret.ok_or(ApiError::InvalidCredentials)?;
            let hash = client
                .secret_hash
                .clone()
                .ok_or_else(|| ApiError::InternalError {
                    message: "Confidential client is missing its secret hash".to_string(),
                })?;
            let ok = verify_bounded(self.hasher.clone(), secret.to_string(), hash).await?;
            if !ok {
                warn!(client_id = %client_id, "Client secret verification failed");
                return Err(ApiError::InvalidCredentials);
            }
        }

        Ok(client)
    }

    /// `grant_type=authorization_code`: redeem the code, check PKCE.
    async fn grant_authorization_code(
        &self,
        client: &OAuthClient,
        params: &TokenParams,
    ) -> Result<TokenGrant, ApiError> {
        if !client.grant_allowed("authorization_code") {
            return Err(ApiError::PermissionDenied);
        }

        let code = params.code.as_deref().ok_or(ApiError::TokenInvalid)?;
        let key = keys::oauth_code(code);

        let Some(value) = self.store.get(&key).await? else {
            // Expired or never ours
            return Err(ApiError::TokenInvalid);
        };

        if value == CODE_USED {
            // The tombstone makes a second redemption recognizable
            self.note_code_replay(&client.client_id);
            return Err(ApiError::TokenInvalid);
        }

        // Single use: exactly one concurrent redemption wins the swap
        if !self.store.consume_if_equal(&key, &value).await? {
            self.note_code_replay(&client.client_id);
            return Err(ApiError::TokenInvalid);
        }
        self.store
            .set_with_ttl(&key, CODE_USED, CODE_TOMBSTONE_TTL)
            .await?;

        let binding: AuthorizationCode =
            serde_json::from_str(&value).map_err(|e| ApiError::InternalError {
                message: format!("Code binding deserialization failed: {}", e),
            })?;

        // The code is bound to one client and one redirect_uri
        if binding.client_id != client.client_id {
            return Err(ApiError::TokenInvalid);
        }
        let redirect_uri = params.redirect_uri.as_deref().unwrap_or_default();
        if binding.redirect_uri != redirect_uri {
            return Err(ApiError::TokenInvalid);
        }

        // PKCE: the verifier must reproduce the committed challenge
        if let (Some(challenge), Some(method)) = (&binding.pkce_challenge, binding.pkce_method) {
            let verifier = params.code_verifier.as_deref().ok_or(ApiError::TokenInvalid)?;
            if !pkce_matches(method, challenge, verifier) {
                warn!(client_id = %client.client_id, "PKCE verification failed");
                return Err(ApiError::TokenInvalid);
            }
        }

        let scope = binding.scope.join(" ");
        let access_token = self.mint.issue_oauth_access(
            Some(binding.user_id),
            binding.org_id,
            &client.client_id,
            &scope,
        )?;
        let (refresh_token, _jti) = self.mint.issue_oauth_refresh(
            binding.user_id,
            binding.org_id,
            &client.client_id,
            &scope,
        )?;

        self.count_token("oauth_access");
        self.count_token("oauth_refresh");
        info!(client_id = %client.client_id, user_id = %binding.user_id, "Authorization code redeemed");

        Ok(TokenGrant {
            access_token,
            token_type: "Bearer",
            expires_in: self.oauth_access_ttl,
            refresh_token: Some(refresh_token),
            scope,
        })
    }

    /// `grant_type=refresh_token`: rotate; scope may only narrow.
    async fn grant_refresh(
        &self,
        client: &OAuthClient,
        params: &TokenParams,
    ) -> Result<TokenGrant, ApiError> {
        if !client.grant_allowed("refresh_token") {
            return Err(ApiError::PermissionDenied);
        }

        let token = params.refresh_token.as_deref().ok_or(ApiError::TokenInvalid)?;
        let claims = self.mint.decode(token, TokenKind::Refresh)?;

        // Must be an OAuth refresh token issued to this very client
        if claims.client_id.as_deref() != Some(client.client_id.as_str()) {
            return Err(ApiError::TokenInvalid);
        }
        let user_id = claims.sub.ok_or(ApiError::TokenInvalid)?;

        if self.store.is_jti_blacklisted(claims.jti).await? {
            warn!(client_id = %client.client_id, jti = %claims.jti, "OAuth refresh replay detected");
            self.metrics
                .replays_detected_total
                .with_label_values(&["refresh_jti"])
                .inc();
            self.audit
                .record(AuditEvent::refresh_replay(user_id, claims.org_id, claims.jti));
            return Err(ApiError::TokenRevoked);
        }

        let granted = split_scopes(claims.scope.as_deref().unwrap_or_default());
        let scope = match params.scope.as_deref() {
            // Narrowing only: a rotation can never widen the grant
            Some(requested) => {
                let requested = split_scopes(requested);
                if !requested.iter().all(|s| granted.contains(s)) {
                    return Err(scope_validation_error());
                }
                requested
            }
            None => granted,
        }
        .join(" ");

        // Rotation invariant shared with the first-party path: blacklist
        // before mint
        self.store
            .blacklist_jti(claims.jti, claims.remaining_lifetime())
            .await?;

        let access_token = self.mint.issue_oauth_access(
            Some(user_id),
            claims.org_id,
            &client.client_id,
            &scope,
        )?;
        let (refresh_token, _jti) =
            self.mint
                .issue_oauth_refresh(user_id, claims.org_id, &client.client_id, &scope)?;

        self.count_token("oauth_access");
        self.count_token("oauth_refresh");

        Ok(TokenGrant {
            access_token,
            token_type: "Bearer",
            expires_in: self.oauth_access_ttl,
            refresh_token: Some(refresh_token),
            scope,
        })
    }

    /// `grant_type=client_credentials`: service-to-service access.
    async fn grant_client_credentials(
        &self,
        client: &OAuthClient,
        params: &TokenParams,
    ) -> Result<TokenGrant, ApiError> {
        // Confidential clients only; a public client has nothing to
        // authenticate with
        if client.typed() != ClientType::Confidential {
            return Err(ApiError::PermissionDenied);
        }
        if !client.grant_allowed("client_credentials") {
            return Err(ApiError::PermissionDenied);
        }

        let scopes = split_scopes(params.scope.as_deref().unwrap_or_default());
        if !client.scopes_allowed(&scopes) {
            return Err(scope_validation_error());
        }
        let scope = scopes.join(" ");

        // No sub: the client itself is the principal, and no refresh token
        // is issued - the client can always ask again
        let access_token = self
            .mint
            .issue_oauth_access(None, None, &client.client_id, &scope)?;

        self.count_token("oauth_access");
        info!(client_id = %client.client_id, "Client-credentials token issued");

        Ok(TokenGrant {
            access_token,
            token_type: "Bearer",
            expires_in: self.oauth_access_ttl,
            refresh_token: None,
            scope,
        })
    }

    // =========================================================================
    // REVOCATION
    // =========================================================================

    /// RFC 7009 revocation: blacklist the jti; always succeed.
    ///
    /// Unknown, malformed and already-revoked tokens all return success -
    /// the caller learns nothing about token validity from this endpoint.
    pub async fn revoke(&self, token: &str) -> Result<(), ApiError> {
        let claims = self
            .mint
            .decode(token, TokenKind::Refresh)
            .or_else(|_| self.mint.decode(token, TokenKind::Access));

        if let Ok(claims) = claims {
            self.store
                .blacklist_jti(claims.jti, claims.remaining_lifetime())
                .await?;
            info!(jti = %claims.jti, "Token revoked");
        }

        Ok(())
    }

    // =========================================================================
    // CLIENT REGISTRY
    // =========================================================================

    /// Registers a client, generating and hashing the secret for
    /// confidential clients.
    ///
    /// Returns the plaintext secret exactly once.
    pub async fn register_client(
        &self,
        mut new_client: NewOAuthClient,
    ) -> Result<(OAuthClient, Option<String>), ApiError> {
        let plain_secret = match new_client.client_type {
            ClientType::Confidential => {
                let secret = generate_url_token();
                new_client.secret_hash = Some(self.hasher.hash(&secret)?);
                Some(secret)
            }
            ClientType::Public => {
                new_client.secret_hash = None;
                new_client.require_pkce = true;
                None
            }
        };

        let client = self.clients.register_client(new_client).await?;
        info!(client_id = %client.client_id, client_type = %client.client_type, "OAuth client registered");

        Ok((client, plain_secret))
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    fn note_code_replay(&self, client_id: &str) {
        warn!(client_id = %client_id, "Authorization code replay detected");
        self.metrics
            .replays_detected_total
            .with_label_values(&["oauth_code"])
            .inc();
        self.audit.record(AuditEvent::oauth_code_replay(client_id));
    }

    fn count_token(&self, kind: &str) {
        self.metrics.tokens_issued_total.with_label_values(&[kind]).inc();
    }
}

// =============================================================================
// PKCE and Scope Helpers
// =============================================================================

/// `base64url_nopad(sha256(verifier))`, the S256 challenge derivation.
pub(crate) fn pkce_challenge_s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Checks a verifier against the committed challenge.
fn pkce_matches(method: PkceMethod, challenge: &str, verifier: &str) -> bool {
    match method {
        PkceMethod::S256 => pkce_challenge_s256(verifier) == challenge,
        PkceMethod::Plain => verifier == challenge,
    }
}

/// Splits a space-separated scope string, dropping empties.
fn split_scopes(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

/// Field-level validation error for scope violations.
fn scope_validation_error() -> ApiError {
    let mut errors = ValidationErrors::new();
    errors.add("scope", ValidationError::new("scope_not_allowed"));
    ApiError::ValidationError(errors)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s256_challenge_matches_rfc_vector() {
        // RFC 7636 appendix B
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = pkce_challenge_s256(verifier);
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
    }

    #[test]
    fn test_pkce_s256_round_trip() {
        let verifier = "a".repeat(43);
        let challenge = pkce_challenge_s256(&verifier);

        assert!(pkce_matches(PkceMethod::S256, &challenge, &verifier));
        assert!(!pkce_matches(PkceMethod::S256, &challenge, "wrong-verifier"));
        // The challenge itself is not the verifier
        assert!(!pkce_matches(PkceMethod::S256, &challenge, &challenge));
    }

    #[test]
    fn test_pkce_plain_compares_directly() {
        assert!(pkce_matches(PkceMethod::Plain, "same-string", "same-string"));
        assert!(!pkce_matches(PkceMethod::Plain, "same-string", "other"));
    }

    #[test]
    fn test_split_scopes() {
        assert_eq!(
            split_scopes("groups:read  profile:read"),
            vec!["groups:read".to_string(), "profile:read".to_string()]
        );
        assert!(split_scopes("").is_empty());
        assert!(split_scopes("   ").is_empty());
    }

    #[test]
    fn test_scope_violation_is_a_validation_error() {
        let error = scope_validation_error();
        assert_eq!(error.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_token_grant_omits_absent_refresh() {
        let grant = TokenGrant {
            access_token: "a".to_string(),
            token_type: "Bearer",
            expires_in: 3600,
            refresh_token: None,
            scope: "groups:read".to_string(),
        };
        let json = serde_json::to_value(&grant).unwrap();
        assert!(json.get("refresh_token").is_none());
        assert_eq!(json["token_type"], "Bearer");
    }
}
