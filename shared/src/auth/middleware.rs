//! # Bearer Authentication
//!
//! Extracts and validates bearer tokens on protected endpoints.
//!
//! ## Authentication Flow
//!
//! ```text
//! ┌─────────┐    ┌────────────────┐    ┌──────────────┐    ┌───────────────┐
//! │ Request │───►│ Extract bearer │───►│ Decode (HS256│───►│ jti blacklist │
//! └─────────┘    │ from header    │    │ + type gate) │    │ consult       │
//!                └────────────────┘    └──────────────┘    └──────┬────────┘
//!                                                                 │
//!                               ┌──────────────────┐              │
//!                               │ AuthenticatedUser│◄─────────────┘
//!                               └──────────────────┘      (if not revoked)
//! ```
//!
//! The decode is synchronous; the blacklist consult is I/O against the
//! ephemeral store. Handlers call [`authenticate`] which performs both, so
//! no accepted bearer can carry a revoked jti.
//!
//! ## Principal Kinds
//!
//! A bearer authenticates either a **user** (`sub` claim) or a **service**
//! (client-credentials token, `client_id` claim, no `sub`). Resource-style
//! endpoints that only make sense for people call
//! [`AuthenticatedUser::require_user`]; scope-gated endpoints call
//! [`AuthenticatedUser::require_scope`].

use crate::auth::jwt::{Claims, TokenKind, TokenMint};
use crate::ephemeral::EphemeralStore;
use crate::errors::ApiError;
use actix_web::HttpRequest;
use uuid::Uuid;

// =============================================================================
// Authenticated Principal
// =============================================================================

/// Who a validated bearer token speaks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// A person; `sub` claim was present.
    User(Uuid),
    /// A service authenticated via client credentials; no `sub`.
    Service(String),
}

/// A validated bearer, as seen by handlers.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// User or service principal
    pub principal: Principal,
    /// Organization the token is scoped to, if any
    pub org_id: Option<Uuid>,
    /// OAuth scopes, space-separated, on OAuth-issued tokens
    pub scope: Option<String>,
    /// Token identifier, for logout paths
    pub jti: Uuid,
}

impl AuthenticatedUser {
    /// Returns the user id, or `PermissionDenied` for service principals.
    pub fn require_user(&self) -> Result<Uuid, ApiError> {
        match &self.principal {
            Principal::User(id) => Ok(*id),
            Principal::Service(_) => Err(ApiError::PermissionDenied),
        }
    }

    /// Checks that an OAuth-issued token carries `required` in its scope
    /// list. First-party tokens (no `scope` claim) pass unconditionally.
    pub fn require_scope(&self, required: &str) -> Result<(), ApiError> {
        match &self.scope {
            None => Ok(()),
            Some(scopes) => {
                if scopes.split_whitespace().any(|s| s == required) {
                    Ok(())
                } else {
                    Err(ApiError::PermissionDenied)
                }
            }
        }
    }
}

impl From<Claims> for AuthenticatedUser {
    fn from(claims: Claims) -> Self {
        let principal = match (claims.sub, claims.client_id) {
            (Some(user_id), _) => Principal::User(user_id),
            (None, Some(client_id)) => Principal::Service(client_id),
            // A token with neither claim never leaves the mint; treat it
            // as an anonymous service principal rather than panic.
            (None, None) => Principal::Service(String::new()),
        };
        Self {
            principal,
            org_id: claims.org_id,
            scope: claims.scope,
            jti: claims.jti,
        }
    }
}

// =============================================================================
// Extraction and Validation
// =============================================================================

/// Extracts the raw token from the `Authorization: Bearer <token>` header.
///
/// ## Errors
///
/// - `ApiError::MissingAuth` - header absent
/// - `ApiError::TokenInvalid` - wrong scheme or empty token
pub fn extract_bearer_token(req: &HttpRequest) -> Result<String, ApiError> {
    let auth_header = req
        .headers()
        .get("Authorization")
        .ok_or(ApiError::MissingAuth)?
        .to_str()
        .map_err(|_| ApiError::TokenInvalid)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::TokenInvalid)?;

    if token.is_empty() {
        return Err(ApiError::TokenInvalid);
    }

    Ok(token.to_string())
}

/// Full bearer authentication: extract, decode as `access`, consult the
/// jti blacklist.
///
/// ## Errors
///
/// - `ApiError::MissingAuth` / `ApiError::TokenInvalid` - extraction
/// - `ApiError::TokenExpired` - `exp` passed
/// - `ApiError::TokenRevoked` - jti blacklisted
pub async fn authenticate(
    req: &HttpRequest,
    mint: &TokenMint,
    store: &EphemeralStore,
) -> Result<AuthenticatedUser, ApiError> {
    let token = extract_bearer_token(req)?;
    let claims = mint.decode(&token, TokenKind::Access)?;

    if store.is_jti_blacklisted(claims.jti).await? {
        return Err(ApiError::TokenRevoked);
    }

    Ok(claims.into())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JwtConfig;
    use actix_web::test::TestRequest;

    fn mint() -> TokenMint {
        TokenMint::new(JwtConfig {
            secret: "test_secret_key_minimum_32_chars_required".to_string(),
            access_token_ttl_seconds: 900,
            refresh_token_ttl_seconds: 2_592_000,
            pre_auth_ttl_seconds: 300,
            login_session_ttl_seconds: 900,
            oauth_access_ttl_seconds: 3600,
            issuer: "test".to_string(),
        })
    }

    #[test]
    fn test_extract_bearer_token_valid() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer my_token_123"))
            .to_http_request();

        assert_eq!(extract_bearer_token(&req).unwrap(), "my_token_123");
    }

    #[test]
    fn test_extract_bearer_token_missing_header() {
        let req = TestRequest::default().to_http_request();
        assert!(matches!(extract_bearer_token(&req), Err(ApiError::MissingAuth)));
    }

    #[test]
    fn test_extract_bearer_token_wrong_scheme() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Basic dXNlcjpwYXNz"))
            .to_http_request();

        assert!(matches!(extract_bearer_token(&req), Err(ApiError::TokenInvalid)));
    }

    #[test]
    fn test_extract_bearer_token_empty() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer "))
            .to_http_request();

        assert!(matches!(extract_bearer_token(&req), Err(ApiError::TokenInvalid)));
    }

    #[tokio::test]
    async fn test_authenticate_accepts_live_token() {
        let mint = mint();
        let store = EphemeralStore::in_memory();
        let user_id = Uuid::new_v4();
        let pair = mint.issue_pair(user_id, None).unwrap();

        let req = TestRequest::default()
            .insert_header(("Authorization", format!("Bearer {}", pair.access_token)))
            .to_http_request();

        let user = authenticate(&req, &mint, &store).await.unwrap();
        assert_eq!(user.principal, Principal::User(user_id));
    }

    #[tokio::test]
    async fn test_authenticate_rejects_blacklisted_jti() {
        let mint = mint();
        let store = EphemeralStore::in_memory();
        let pair = mint.issue_pair(Uuid::new_v4(), None).unwrap();

        let claims = mint
            .decode(&pair.access_token, TokenKind::Access)
            .unwrap();
        store
            .blacklist_jti(claims.jti, std::time::Duration::from_secs(900))
            .await
            .unwrap();

        let req = TestRequest::default()
            .insert_header(("Authorization", format!("Bearer {}", pair.access_token)))
            .to_http_request();

        assert!(matches!(
            authenticate(&req, &mint, &store).await,
            Err(ApiError::TokenRevoked)
        ));
    }

    #[tokio::test]
    async fn test_authenticate_rejects_refresh_token() {
        let mint = mint();
        let store = EphemeralStore::in_memory();
        let pair = mint.issue_pair(Uuid::new_v4(), None).unwrap();

        let req = TestRequest::default()
            .insert_header(("Authorization", format!("Bearer {}", pair.refresh_token)))
            .to_http_request();

        assert!(matches!(
            authenticate(&req, &mint, &store).await,
            Err(ApiError::TokenInvalid)
        ));
    }

    #[test]
    fn test_service_principal_from_client_credentials_claims() {
        let mint = mint();
        let token = mint
            .issue_oauth_access(None, None, "chat-api", "groups:read")
            .unwrap();
        let claims = mint.decode(&token, TokenKind::Access).unwrap();

        let user: AuthenticatedUser = claims.into();
        assert_eq!(user.principal, Principal::Service("chat-api".to_string()));
        assert!(user.require_user().is_err());
    }

    #[test]
    fn test_scope_gate() {
        let mint = mint();
        let token = mint
            .issue_oauth_access(Some(Uuid::new_v4()), None, "spa", "groups:read profile:read")
            .unwrap();
        let claims = mint.decode(&token, TokenKind::Access).unwrap();
        let user: AuthenticatedUser = claims.into();

        assert!(user.require_scope("groups:read").is_ok());
        assert!(user.require_scope("groups:write").is_err());
    }

    #[test]
    fn test_first_party_token_passes_scope_gate() {
        let mint = mint();
        let pair = mint.issue_pair(Uuid::new_v4(), None).unwrap();
        let claims = mint.decode(&pair.access_token, TokenKind::Access).unwrap();
        let user: AuthenticatedUser = claims.into();

        // First-party tokens carry no scope claim and are not scope-gated
        assert!(user.require_scope("anything:at_all").is_ok());
    }
}
