//! # Token Mint
//!
//! Issues and verifies every bearer token the service emits.
//!
//! ## Token Kinds
//!
//! | Kind | Lifetime | Audience | Claims |
//! |------|----------|----------|--------|
//! | `access` | 15 min | all services | `sub`, `org_id?`, `jti` |
//! | `refresh` | 30 days | auth only | `sub`, `org_id?`, `jti` |
//! | `pre_auth` | 5-15 min | auth only | `sub`, `jti` |
//! | OAuth access | ≤60 min | resource servers | `sub` or `client_id`, `scope`, `aud`, `jti` |
//! | OAuth refresh | 30 days | auth only | `sub`, `client_id`, `scope`, `jti` |
//!
//! OAuth tokens reuse the `access`/`refresh` type tags; resource servers
//! distinguish the principal kind by the presence of `sub` versus
//! `client_id`.
//!
//! ## Verification Rules
//!
//! - Signature (HS256, one secret shared across services) and `exp` are
//!   always checked.
//! - The expected token type must match; a refresh token can never pass as
//!   an access token and vice versa.
//! - `aud` is enforced at the API boundary only ([`TokenMint::decode_for_audience`]);
//!   internal decodes skip it.
//! - The jti blacklist lives in the ephemeral store and is I/O, so the
//!   *callers* of `decode` consult it - every decode path in the service
//!   pairs `decode` with `EphemeralStore::is_jti_blacklisted`.
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! let mint = TokenMint::new(config.jwt.clone());
//!
//! let pair = mint.issue_pair(user_id, Some(org_id))?;
//! // persist pair.refresh_jti, hand pair.access_token / pair.refresh_token out
//!
//! let claims = mint.decode(&pair.access_token, TokenKind::Access)?;
//! if store.is_jti_blacklisted(claims.jti).await? {
//!     return Err(ApiError::TokenRevoked);
//! }
//! ```

use crate::config::JwtConfig;
use crate::errors::ApiError;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Claims
// =============================================================================

/// JWT claims for every token kind the mint issues.
///
/// Optional fields are omitted from the serialized token entirely, so an
/// access token for a user with no organization carries no `org_id` claim
/// at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - the user's unique identifier. Absent on client-credentials
    /// tokens, which authenticate a service rather than a person.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<Uuid>,

    /// Organization the token is scoped to, when one was selected at login.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<Uuid>,

    /// Space-separated OAuth scopes, on OAuth tokens only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// OAuth client the token was issued to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Audience, set on OAuth access tokens to the client id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,

    /// Issuer - who created the token.
    pub iss: String,

    /// Expiration time as Unix timestamp (seconds since epoch).
    pub exp: i64,

    /// Issued at time as Unix timestamp.
    pub iat: i64,

    /// Unique token identifier - the blacklist key.
    pub jti: Uuid,

    /// Token kind tag. Prevents cross-kind misuse.
    #[serde(rename = "type")]
    pub token_type: TokenKind,
}

impl Claims {
    /// Remaining lifetime from `now`, clamped at zero.
    ///
    /// Used when blacklisting: a revoked jti only needs to be remembered
    /// until the signature check would reject the token anyway.
    pub fn remaining_lifetime(&self) -> std::time::Duration {
        let remaining = self.exp - Utc::now().timestamp();
        std::time::Duration::from_secs(remaining.max(0) as u64)
    }
}

// =============================================================================
// Token Kind
// =============================================================================

/// Distinguishes the token kinds at verification time.
///
/// Stored in the token itself under the `type` claim so a stolen refresh
/// token cannot be replayed against an access-token endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Short-lived bearer for API authorization.
    Access,
    /// Long-lived, single-use token for obtaining a new pair.
    Refresh,
    /// Carrier of "password-and-code verified" state inside the multi-step
    /// login (2FA hop, org selection).
    PreAuth,
}

impl TokenKind {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::PreAuth => "pre_auth",
        }
    }
}

// =============================================================================
// Issued Pair
// =============================================================================

/// An access + refresh pair with the bookkeeping the caller must persist.
#[derive(Debug, Clone)]
pub struct IssuedPair {
    /// Bearer for API calls
    pub access_token: String,
    /// Single-use token for rotation
    pub refresh_token: String,
    /// jti of the refresh token - the persistence/blacklist index
    pub refresh_jti: Uuid,
    /// Absolute expiry of the refresh token
    pub refresh_expires_at: DateTime<Utc>,
    /// Seconds until the access token expires
    pub expires_in: i64,
}

// =============================================================================
// Token Mint
// =============================================================================

/// Issues and verifies signed tokens (HS256).
///
/// Created once at startup from [`JwtConfig`] and shared via `Arc`. The
/// secret never leaves the encoding/decoding keys.
#[derive(Clone)]
pub struct TokenMint {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    config: JwtConfig,
}

impl TokenMint {
    /// Creates a new mint with the given configuration.
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        Self {
            encoding_key,
            decoding_key,
            config,
        }
    }

    // =========================================================================
    // Issuance
    // =========================================================================

    /// Issues an access + refresh pair for a user, optionally bound to an
    /// organization.
    ///
    /// The caller persists `refresh_jti` as a `RefreshTokenRecord` before
    /// handing the pair out.
    pub fn issue_pair(&self, user_id: Uuid, org_id: Option<Uuid>) -> Result<IssuedPair, ApiError> {
        let access_token = self.sign(ClaimsDraft {
            sub: Some(user_id),
            org_id,
            token_type: TokenKind::Access,
            ttl_seconds: self.config.access_token_ttl_seconds,
            ..ClaimsDraft::default()
        })?;

        let refresh_jti = Uuid::new_v4();
        let refresh_expires_at =
            Utc::now() + Duration::seconds(self.config.refresh_token_ttl_seconds as i64);
        let refresh_token = self.sign(ClaimsDraft {
            sub: Some(user_id),
            org_id,
            jti: Some(refresh_jti),
            token_type: TokenKind::Refresh,
            ttl_seconds: self.config.refresh_token_ttl_seconds,
            ..ClaimsDraft::default()
        })?;

        Ok(IssuedPair {
            access_token,
            refresh_token,
            refresh_jti,
            refresh_expires_at,
            expires_in: self.config.access_token_ttl_seconds as i64,
        })
    }

    /// Issues a pre-auth token carrying verified-so-far login state.
    ///
    /// `ttl_seconds` is supplied by the caller because the two hops differ:
    /// the 2FA hop uses the short pre-auth lifetime, the org-selection hop
    /// uses the login-session window.
    pub fn issue_pre_auth(&self, user_id: Uuid, ttl_seconds: u64) -> Result<(String, Uuid), ApiError> {
        let jti = Uuid::new_v4();
        let token = self.sign(ClaimsDraft {
            sub: Some(user_id),
            jti: Some(jti),
            token_type: TokenKind::PreAuth,
            ttl_seconds,
            ..ClaimsDraft::default()
        })?;
        Ok((token, jti))
    }

    /// Issues an OAuth access token.
    ///
    /// For the authorization-code and refresh grants, `user_id` is the
    /// resource owner. For client-credentials, `user_id` is `None` and the
    /// principal is the client itself.
    pub fn issue_oauth_access(
        &self,
        user_id: Option<Uuid>,
        org_id: Option<Uuid>,
        client_id: &str,
        scope: &str,
    ) -> Result<String, ApiError> {
        self.sign(ClaimsDraft {
            sub: user_id,
            org_id,
            scope: Some(scope.to_string()),
            client_id: Some(client_id.to_string()),
            aud: Some(client_id.to_string()),
            token_type: TokenKind::Access,
            ttl_seconds: self.config.oauth_access_ttl_seconds,
            ..ClaimsDraft::default()
        })
    }

    /// Issues an OAuth refresh token bound to a user and client.
    ///
    /// Returns the token and its jti; the jti is the rotation index.
    pub fn issue_oauth_refresh(
        &self,
        user_id: Uuid,
        org_id: Option<Uuid>,
        client_id: &str,
        scope: &str,
    ) -> Result<(String, Uuid), ApiError> {
        let jti = Uuid::new_v4();
        let token = self.sign(ClaimsDraft {
            sub: Some(user_id),
            org_id,
            scope: Some(scope.to_string()),
            client_id: Some(client_id.to_string()),
            jti: Some(jti),
            token_type: TokenKind::Refresh,
            ttl_seconds: self.config.refresh_token_ttl_seconds,
            ..ClaimsDraft::default()
        })?;
        Ok((token, jti))
    }

    fn sign(&self, draft: ClaimsDraft) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = Claims {
            sub: draft.sub,
            org_id: draft.org_id,
            scope: draft.scope,
            client_id: draft.client_id,
            aud: draft.aud,
            iss: self.config.issuer.clone(),
            exp: (now + Duration::seconds(draft.ttl_seconds as i64)).timestamp(),
            iat: now.timestamp(),
            jti: draft.jti.unwrap_or_else(Uuid::new_v4),
            token_type: draft.token_type,
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            ApiError::InternalError {
                message: format!("Failed to sign token: {}", e),
            }
        })
    }

    // =========================================================================
    // Verification
    // =========================================================================

    /// Decodes a token and requires it to be of `expected` kind.
    ///
    /// Skips `aud` - this is the internal decode. Callers must still
    /// consult the jti blacklist (async, ephemeral store).
    ///
    /// ## Errors
    ///
    /// - `ApiError::TokenExpired` - `exp` has passed
    /// - `ApiError::TokenInvalid` - bad signature, malformed, wrong kind
    pub fn decode(&self, token: &str, expected: TokenKind) -> Result<Claims, ApiError> {
        let claims = self.decode_inner(token, None)?;
        if claims.token_type != expected {
            return Err(ApiError::TokenInvalid);
        }
        Ok(claims)
    }

    /// Decodes a token and additionally enforces the `aud` claim.
    ///
    /// Used at the API boundary for OAuth access tokens presented to
    /// resource-facing endpoints.
    pub fn decode_for_audience(
        &self,
        token: &str,
        expected: TokenKind,
        audience: &str,
    ) -> Result<Claims, ApiError> {
        let claims = self.decode_inner(token, Some(audience))?;
        if claims.token_type != expected {
            return Err(ApiError::TokenInvalid);
        }
        Ok(claims)
    }

    fn decode_inner(&self, token: &str, audience: Option<&str>) -> Result<Claims, ApiError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.config.issuer]);
        if let Some(aud) = audience {
            validation.set_audience(&[aud]);
        }

        let token_data: TokenData<Claims> = decode(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => ApiError::TokenExpired,
                _ => ApiError::TokenInvalid,
            })?;

        Ok(token_data.claims)
    }

    /// Access-token lifetime in seconds, for response DTOs.
    pub fn access_ttl_seconds(&self) -> u64 {
        self.config.access_token_ttl_seconds
    }

    /// Pre-auth lifetime in seconds.
    pub fn pre_auth_ttl_seconds(&self) -> u64 {
        self.config.pre_auth_ttl_seconds
    }

    /// Login-session (org selection) window in seconds.
    pub fn login_session_ttl_seconds(&self) -> u64 {
        self.config.login_session_ttl_seconds
    }
}

/// Builder-ish intermediate for [`TokenMint::sign`]; keeps the issuance
/// methods free of positional-argument soup.
#[derive(Default)]
struct ClaimsDraft {
    sub: Option<Uuid>,
    org_id: Option<Uuid>,
    scope: Option<String>,
    client_id: Option<String>,
    aud: Option<String>,
    jti: Option<Uuid>,
    token_type: TokenKind,
    ttl_seconds: u64,
}

impl Default for TokenKind {
    fn default() -> Self {
        Self::Access
    }
}

// Implement Debug manually to avoid exposing keys
impl std::fmt::Debug for TokenMint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenMint")
            .field("issuer", &self.config.issuer)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "test_secret_key_minimum_32_chars_required".to_string(),
            access_token_ttl_seconds: 900,
            refresh_token_ttl_seconds: 2_592_000,
            pre_auth_ttl_seconds: 300,
            login_session_ttl_seconds: 900,
            oauth_access_ttl_seconds: 3600,
            issuer: "test-issuer".to_string(),
        }
    }

    #[test]
    fn test_pair_roundtrip() {
        let mint = TokenMint::new(test_config());
        let user_id = Uuid::new_v4();
        let org_id = Uuid::new_v4();

        let pair = mint.issue_pair(user_id, Some(org_id)).unwrap();

        let access = mint.decode(&pair.access_token, TokenKind::Access).unwrap();
        assert_eq!(access.sub, Some(user_id));
        assert_eq!(access.org_id, Some(org_id));
        assert_eq!(access.token_type, TokenKind::Access);

        let refresh = mint.decode(&pair.refresh_token, TokenKind::Refresh).unwrap();
        assert_eq!(refresh.jti, pair.refresh_jti);
        assert_eq!(refresh.sub, Some(user_id));
    }

    #[test]
    fn test_org_id_omitted_when_absent() {
        let mint = TokenMint::new(test_config());
        let pair = mint.issue_pair(Uuid::new_v4(), None).unwrap();
        let claims = mint.decode(&pair.access_token, TokenKind::Access).unwrap();
        assert_eq!(claims.org_id, None);
    }

    #[test]
    fn test_kind_cross_misuse_rejected() {
        let mint = TokenMint::new(test_config());
        let pair = mint.issue_pair(Uuid::new_v4(), None).unwrap();

        // Access token must not pass as refresh, and vice versa
        assert!(matches!(
            mint.decode(&pair.access_token, TokenKind::Refresh),
            Err(ApiError::TokenInvalid)
        ));
        assert!(matches!(
            mint.decode(&pair.refresh_token, TokenKind::Access),
            Err(ApiError::TokenInvalid)
        ));
    }

    #[test]
    fn test_pre_auth_is_its_own_kind() {
        let mint = TokenMint::new(test_config());
        let (token, jti) = mint.issue_pre_auth(Uuid::new_v4(), 300).unwrap();

        let claims = mint.decode(&token, TokenKind::PreAuth).unwrap();
        assert_eq!(claims.jti, jti);
        assert!(matches!(
            mint.decode(&token, TokenKind::Access),
            Err(ApiError::TokenInvalid)
        ));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let mint = TokenMint::new(test_config());
        let pair = mint.issue_pair(Uuid::new_v4(), None).unwrap();

        let mut tampered = pair.access_token.clone();
        tampered.pop();
        tampered.push('x');

        assert!(matches!(
            mint.decode(&tampered, TokenKind::Access),
            Err(ApiError::TokenInvalid)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let mint = TokenMint::new(test_config());
        let other = TokenMint::new(JwtConfig {
            secret: "another_secret_key_minimum_32_chars_ok".to_string(),
            ..test_config()
        });

        let pair = mint.issue_pair(Uuid::new_v4(), None).unwrap();
        assert!(other.decode(&pair.access_token, TokenKind::Access).is_err());
    }

    #[test]
    fn test_oauth_access_audience_gate() {
        let mint = TokenMint::new(test_config());
        let user_id = Uuid::new_v4();
        let token = mint
            .issue_oauth_access(Some(user_id), None, "spa", "groups:read")
            .unwrap();

        // Matching audience passes
        let claims = mint
            .decode_for_audience(&token, TokenKind::Access, "spa")
            .unwrap();
        assert_eq!(claims.aud.as_deref(), Some("spa"));
        assert_eq!(claims.scope.as_deref(), Some("groups:read"));

        // Wrong audience fails at the boundary
        assert!(mint
            .decode_for_audience(&token, TokenKind::Access, "other-client")
            .is_err());

        // Internal decode skips the audience check entirely
        assert!(mint.decode(&token, TokenKind::Access).is_ok());
    }

    #[test]
    fn test_client_credentials_token_has_no_sub() {
        let mint = TokenMint::new(test_config());
        let token = mint
            .issue_oauth_access(None, None, "chat-api", "groups:read")
            .unwrap();

        let claims = mint.decode(&token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, None);
        assert_eq!(claims.client_id.as_deref(), Some("chat-api"));
    }

    #[test]
    fn test_jti_unique_per_token() {
        let mint = TokenMint::new(test_config());
        let user_id = Uuid::new_v4();

        let a = mint.issue_pair(user_id, None).unwrap();
        let b = mint.issue_pair(user_id, None).unwrap();
        assert_ne!(a.refresh_jti, b.refresh_jti);

        let ca = mint.decode(&a.access_token, TokenKind::Access).unwrap();
        let cb = mint.decode(&b.access_token, TokenKind::Access).unwrap();
        assert_ne!(ca.jti, cb.jti);
    }

    #[test]
    fn test_remaining_lifetime_clamps_at_zero() {
        let claims = Claims {
            sub: None,
            org_id: None,
            scope: None,
            client_id: None,
            aud: None,
            iss: "test".into(),
            exp: Utc::now().timestamp() - 100,
            iat: Utc::now().timestamp() - 200,
            jti: Uuid::new_v4(),
            token_type: TokenKind::Access,
        };
        assert_eq!(claims.remaining_lifetime(), std::time::Duration::ZERO);
    }
}
