//! # Domain Entities
//!
//! Core domain entities for the authentication and authorization service.
//! Entities represent persistent business objects that map directly to
//! database tables; the ephemeral bindings that live only in the TTL store
//! are defined here too so their shape has one home.
//!
//! ## Entity Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                            Domain Entities                               │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │  ┌──────────────┐  N:M   ┌──────────────┐  N:M   ┌──────────────┐        │
//! │  │     User     │───────►│ Organization │◄───────│    Group     │        │
//! │  └──────┬───────┘ member └──────────────┘  owns  └──────┬───────┘        │
//! │         │                                               │ N:M            │
//! │         │ 1:N                                           ▼                │
//! │  ┌──────┴──────────────┐                        ┌──────────────┐         │
//! │  │ RefreshTokenRecord  │                        │  Permission  │         │
//! │  └─────────────────────┘                        └──────────────┘         │
//! │                                                                          │
//! │  ┌──────────────┐  1:N   ┌───────────────────┐  ┌──────────────────┐     │
//! │  │ OAuthClient  │───────►│   ConsentRecord   │  │ AuthorizationCode│     │
//! │  └──────────────┘        └───────────────────┘  │ (ephemeral only) │     │
//! │                                                 └──────────────────┘     │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariants
//!
//! | Entity | Invariant |
//! |--------|-----------|
//! | [`User`] | `verified ⇒ verified_at` set; created unverified; verified exactly once |
//! | [`Organization`] | slug globally unique among non-deleted |
//! | [`Membership`] | `(user_id, org_id)` unique; each org keeps ≥1 owner while non-empty |
//! | [`Group`] | `(org_id, name)` unique among non-deleted |
//! | [`Permission`] | `(resource, action)` unique; canonical form `resource:action` |
//! | [`OAuthClient`] | public ⇒ no secret + PKCE required; confidential ⇒ secret set |
//! | [`AuthorizationCode`] | consumable at most once (enforced by the ephemeral store) |
//!
//! ## Security Considerations
//!
//! - **Never expose `hashed_password`** or 2FA material: use [`UserProfile`]
//!   for API responses
//! - **TOTP secrets are sealed**: `totp_secret_enc` holds AES-256-GCM
//!   ciphertext, never the base32 secret
//! - **Backup codes are hashed**: SHA-256 digests only; `backup_used`
//!   counts total codes ever consumed
//! - **Soft deletes**: `deleted_at` preserves rows for the audit trail

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// =============================================================================
// USER
// =============================================================================

/// Complete user entity as stored in the database.
///
/// Contains sensitive fields (`hashed_password`, sealed 2FA material).
/// **Never serialize this struct into an API response** - convert to
/// [`UserProfile`] instead.
///
/// # Database Mapping
///
/// ```sql
/// SELECT * FROM users WHERE email = $1 AND deleted_at IS NULL;
/// ```
#[derive(Debug, Clone, FromRow)]
pub struct User {
    /// Unique identifier (UUID v4)
    pub user_id: Uuid,
    /// Lower-cased email address (unique, used for login)
    pub email: String,
    /// Argon2id password hash in PHC format
    pub hashed_password: String,
    /// Whether the email address has been confirmed
    pub verified: bool,
    /// When the email was confirmed; set exactly once, iff `verified`
    pub verified_at: Option<DateTime<Utc>>,
    /// Deactivated accounts keep their row but cannot authenticate
    pub active: bool,
    /// AES-256-GCM sealed TOTP secret (base64 of nonce || ciphertext)
    pub totp_secret_enc: Option<String>,
    /// When TOTP setup was confirmed; the secret is inert until then
    pub totp_verified_at: Option<DateTime<Utc>>,
    /// SHA-256 digests of unused backup codes
    pub backup_code_hashes: Option<Vec<String>>,
    /// Total backup codes ever consumed
    pub backup_used: i32,
    /// Timestamp of last successful login
    pub last_login_at: Option<DateTime<Utc>>,
    /// Account creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
    /// Soft delete timestamp (null = live account)
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    /// Whether two-factor authentication gates this user's login.
    ///
    /// True only once setup has been confirmed - a secret that was
    /// generated but never verified does not lock the user out.
    pub fn totp_active(&self) -> bool {
        self.totp_secret_enc.is_some() && self.totp_verified_at.is_some()
    }
}

/// Public user profile without sensitive data.
///
/// Serialized as camelCase for JavaScript clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Unique user identifier
    pub user_id: Uuid,
    /// User's email address
    pub email: String,
    /// Email verification status
    pub verified: bool,
    /// Whether 2FA is active on the account
    pub two_factor_enabled: bool,
    /// Last login timestamp
    pub last_login_at: Option<DateTime<Utc>>,
    /// Account creation timestamp
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        let two_factor_enabled = user.totp_active();
        Self {
            user_id: user.user_id,
            email: user.email,
            verified: user.verified,
            two_factor_enabled,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}

/// Data required to create a new user.
///
/// `hashed_password` must already be an Argon2id PHC string; the plain
/// password never reaches the repository layer.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Lower-cased email address (must be unique)
    pub email: String,
    /// Pre-hashed password (Argon2id)
    pub hashed_password: String,
}

// =============================================================================
// ORGANIZATION & MEMBERSHIP
// =============================================================================

/// Tenant boundary: every authorization decision is scoped to one org.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    /// Unique identifier
    pub org_id: Uuid,
    /// Display name
    pub name: String,
    /// URL-safe identifier, `[a-z0-9-]{2,50}`, unique among non-deleted
    pub slug: String,
    /// Optional description
    pub description: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
    /// Soft delete timestamp
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Data required to create an organization.
#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
}

/// Role a user holds inside an organization.
///
/// Management endpoints (group CRUD, membership changes) require
/// [`OrgRole::Admin`] or above; ownership transfer and org deletion
/// require [`OrgRole::Owner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrgRole {
    /// Full control including ownership transfer
    Owner,
    /// Can manage groups, members and permissions
    Admin,
    /// Plain membership
    Member,
}

impl OrgRole {
    /// Parses a role from its storage representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "owner" => Some(Self::Owner),
            "admin" => Some(Self::Admin),
            "member" => Some(Self::Member),
            _ => None,
        }
    }

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }

    /// Whether this role may administer the organization.
    pub fn can_manage(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

/// A user's membership in an organization.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    /// Member
    pub user_id: Uuid,
    /// Organization
    pub org_id: Uuid,
    /// Role: "owner", "admin" or "member"
    pub role: String,
    /// When the membership was created
    pub joined_at: DateTime<Utc>,
    /// Who created the membership, when known
    pub invited_by: Option<Uuid>,
}

impl Membership {
    /// Typed view of the stored role. Unknown strings degrade to `Member`.
    pub fn org_role(&self) -> OrgRole {
        OrgRole::parse(&self.role).unwrap_or(OrgRole::Member)
    }
}

/// Organization summary offered during login's org-selection step.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgSummary {
    pub org_id: Uuid,
    pub name: String,
    pub slug: String,
    pub role: String,
}

// =============================================================================
// GROUPS & PERMISSIONS
// =============================================================================

/// Named permission container inside one organization.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Unique identifier
    pub group_id: Uuid,
    /// Owning organization
    pub org_id: Uuid,
    /// Name, unique per org among non-deleted groups
    pub name: String,
    /// Optional description
    pub description: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Soft delete timestamp
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Catalog entry: one grantable capability.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    /// Unique identifier
    pub permission_id: Uuid,
    /// Resource half of the canonical string, `[a-z_]+`
    pub resource: String,
    /// Action half of the canonical string, `[a-z_]+`
    pub action: String,
}

impl Permission {
    /// Canonical `resource:action` form used in tokens, cache keys and the
    /// decision API.
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.resource, self.action)
    }
}

/// One row of the authorization resolution: a permission and the group
/// that granted it.
///
/// This is also the L2 cache payload, so it carries serde derives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    /// Canonical permission string
    pub permission: String,
    /// Name of the granting group
    pub group: String,
}

// =============================================================================
// REFRESH TOKEN RECORD
// =============================================================================

/// Persisted record of one issued refresh token, indexed by jti.
///
/// The token itself is never stored - the signed JWT is its own proof.
/// The record exists to make rotation single-use and revocation auditable:
///
/// ```text
/// refresh presented ──► decode ──► jti blacklisted? ──► record revoked?
///                                        │                    │
///                                     reject               reject + audit
/// ```
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    /// Token identifier, primary key
    pub jti: Uuid,
    /// Token owner
    pub user_id: Uuid,
    /// Organization scope, when one was selected
    pub org_id: Option<Uuid>,
    /// When the token was minted
    pub issued_at: DateTime<Utc>,
    /// Natural expiry
    pub expires_at: DateTime<Utc>,
    /// Revocation timestamp (rotation, logout, reset, replay response)
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    /// Whether the record has been revoked.
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Data required to persist a freshly minted refresh token.
#[derive(Debug, Clone)]
pub struct NewRefreshTokenRecord {
    pub jti: Uuid,
    pub user_id: Uuid,
    pub org_id: Option<Uuid>,
    pub expires_at: DateTime<Utc>,
}

// =============================================================================
// OAUTH
// =============================================================================

/// OAuth client confidentiality class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    /// Browser/mobile app; cannot keep a secret, PKCE mandatory
    Public,
    /// Server-side app; authenticates with an Argon2id-hashed secret
    Confidential,
}

impl ClientType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(Self::Public),
            "confidential" => Some(Self::Confidential),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Confidential => "confidential",
        }
    }
}

/// Registered OAuth client.
///
/// Invariant: `client_type = public ⇒ secret_hash = NULL ∧ require_pkce`;
/// `client_type = confidential ⇒ secret_hash` set. The repository enforces
/// it on registration.
#[derive(Debug, Clone, FromRow)]
pub struct OAuthClient {
    /// Public client identifier (slug-like, chosen at registration)
    pub client_id: String,
    /// Display name shown on the consent screen
    pub name: String,
    /// "public" or "confidential"
    pub client_type: String,
    /// Exact-match redirect URIs; no wildcards
    pub redirect_uris: Vec<String>,
    /// Scopes this client may request
    pub allowed_scopes: Vec<String>,
    /// Grant types this client may use
    pub grant_types: Vec<String>,
    /// Argon2id hash of the client secret (confidential clients only)
    pub secret_hash: Option<String>,
    /// Whether PKCE is mandatory (always true for public clients)
    pub require_pkce: bool,
    /// Whether the consent screen is shown
    pub require_consent: bool,
    /// First-party clients skip consent regardless of `require_consent`
    pub first_party: bool,
    /// Registration timestamp
    pub created_at: DateTime<Utc>,
}

impl OAuthClient {
    /// Typed view of the stored client type.
    pub fn typed(&self) -> ClientType {
        ClientType::parse(&self.client_type).unwrap_or(ClientType::Confidential)
    }

    /// Whether `uri` exactly matches a registered redirect URI.
    pub fn redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|registered| registered == uri)
    }

    /// Whether every requested scope is allowed for this client.
    pub fn scopes_allowed(&self, requested: &[String]) -> bool {
        requested
            .iter()
            .all(|scope| self.allowed_scopes.iter().any(|allowed| allowed == scope))
    }

    /// Whether the client may use the given grant type.
    pub fn grant_allowed(&self, grant_type: &str) -> bool {
        self.grant_types.iter().any(|g| g == grant_type)
    }
}

/// PKCE challenge method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkceMethod {
    /// `challenge = base64url_nopad(sha256(verifier))`
    S256,
    /// `challenge = verifier` (legacy clients only)
    Plain,
}

impl PkceMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "S256" => Some(Self::S256),
            "plain" => Some(Self::Plain),
            _ => None,
        }
    }
}

/// Everything an authorization code stands for, serialized as JSON into
/// `oauth_code:{code}` with a 60-second TTL.
///
/// The code itself never touches the database; single-use consumption is
/// the ephemeral store's atomic compare-and-delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    /// Client the code was issued to
    pub client_id: String,
    /// Resource owner
    pub user_id: Uuid,
    /// Organization scope carried into the issued tokens
    pub org_id: Option<Uuid>,
    /// Redirect URI the code is bound to; must match at redemption
    pub redirect_uri: String,
    /// Granted scopes
    pub scope: Vec<String>,
    /// PKCE challenge committed at authorization time
    pub pkce_challenge: Option<String>,
    /// PKCE method
    pub pkce_method: Option<PkceMethod>,
}

/// A user's recorded consent for a client and scope set.
#[derive(Debug, Clone, FromRow)]
pub struct ConsentRecord {
    pub user_id: Uuid,
    pub client_id: String,
    /// Scopes covered by this consent
    pub scopes: Vec<String>,
    pub granted_at: DateTime<Utc>,
}

impl ConsentRecord {
    /// Whether this consent already covers every requested scope.
    pub fn covers(&self, requested: &[String]) -> bool {
        requested
            .iter()
            .all(|scope| self.scopes.iter().any(|granted| granted == scope))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            user_id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            hashed_password: "$argon2id$...".to_string(),
            verified: true,
            verified_at: Some(Utc::now()),
            active: true,
            totp_secret_enc: None,
            totp_verified_at: None,
            backup_code_hashes: None,
            backup_used: 0,
            last_login_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_totp_active_requires_verified_setup() {
        let mut user = sample_user();
        assert!(!user.totp_active());

        // Secret generated but setup never confirmed: still inactive
        user.totp_secret_enc = Some("sealed".to_string());
        assert!(!user.totp_active());

        user.totp_verified_at = Some(Utc::now());
        assert!(user.totp_active());
    }

    #[test]
    fn test_profile_strips_sensitive_fields() {
        let user = sample_user();
        let email = user.email.clone();
        let profile: UserProfile = user.into();

        assert_eq!(profile.email, email);
        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("hashedPassword").is_none());
        assert!(json.get("totpSecretEnc").is_none());
    }

    #[test]
    fn test_org_role_parse_roundtrip() {
        for role in [OrgRole::Owner, OrgRole::Admin, OrgRole::Member] {
            assert_eq!(OrgRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(OrgRole::parse("superuser"), None);
    }

    #[test]
    fn test_org_role_management_rights() {
        assert!(OrgRole::Owner.can_manage());
        assert!(OrgRole::Admin.can_manage());
        assert!(!OrgRole::Member.can_manage());
    }

    #[test]
    fn test_permission_canonical_form() {
        let permission = Permission {
            permission_id: Uuid::new_v4(),
            resource: "image".to_string(),
            action: "write".to_string(),
        };
        assert_eq!(permission.canonical(), "image:write");
    }

    #[test]
    fn test_client_redirect_uri_exact_match_only() {
        let client = OAuthClient {
            client_id: "spa".to_string(),
            name: "SPA".to_string(),
            client_type: "public".to_string(),
            redirect_uris: vec!["https://app.example.com/callback".to_string()],
            allowed_scopes: vec!["groups:read".to_string()],
            grant_types: vec!["authorization_code".to_string()],
            secret_hash: None,
            require_pkce: true,
            require_consent: true,
            first_party: false,
            created_at: Utc::now(),
        };

        assert!(client.redirect_uri_allowed("https://app.example.com/callback"));
        // No path normalization, no prefixes, no wildcards
        assert!(!client.redirect_uri_allowed("https://app.example.com/callback/"));
        assert!(!client.redirect_uri_allowed("https://app.example.com/callback?x=1"));
        assert!(!client.redirect_uri_allowed("https://evil.example.com/callback"));
    }

    #[test]
    fn test_client_scope_subset_check() {
        let client = OAuthClient {
            client_id: "chat-api".to_string(),
            name: "Chat".to_string(),
            client_type: "confidential".to_string(),
            redirect_uris: vec![],
            allowed_scopes: vec!["groups:read".to_string(), "profile:read".to_string()],
            grant_types: vec!["client_credentials".to_string()],
            secret_hash: Some("$argon2id$...".to_string()),
            require_pkce: false,
            require_consent: false,
            first_party: true,
            created_at: Utc::now(),
        };

        assert!(client.scopes_allowed(&["groups:read".to_string()]));
        assert!(!client.scopes_allowed(&["groups:write".to_string()]));
        assert!(client.grant_allowed("client_credentials"));
        assert!(!client.grant_allowed("authorization_code"));
    }

    #[test]
    fn test_consent_coverage() {
        let consent = ConsentRecord {
            user_id: Uuid::new_v4(),
            client_id: "spa".to_string(),
            scopes: vec!["groups:read".to_string(), "profile:read".to_string()],
            granted_at: Utc::now(),
        };

        assert!(consent.covers(&["groups:read".to_string()]));
        assert!(consent.covers(&[]));
        assert!(!consent.covers(&["groups:write".to_string()]));
    }

    #[test]
    fn test_authorization_code_binding_roundtrips_as_json() {
        let binding = AuthorizationCode {
            client_id: "spa".to_string(),
            user_id: Uuid::new_v4(),
            org_id: None,
            redirect_uri: "https://app.example.com/callback".to_string(),
            scope: vec!["groups:read".to_string()],
            pkce_challenge: Some("challenge".to_string()),
            pkce_method: Some(PkceMethod::S256),
        };

        let json = serde_json::to_string(&binding).unwrap();
        let back: AuthorizationCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back.client_id, binding.client_id);
        assert_eq!(back.pkce_method, Some(PkceMethod::S256));
    }
}
