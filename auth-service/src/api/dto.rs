//! # Data Transfer Objects (DTOs)
//!
//! DTOs define the structure of data transferred between client and
//! server. They serve as the API contract and handle:
//!
//! - **Request validation**: via the `validator` crate
//! - **Deserialization**: JSON → Rust structs via `serde`
//! - **Serialization**: Rust structs → JSON for responses
//!
//! ## Conventions
//!
//! - JSON keys are `camelCase` for the JSON endpoints
//! - The OAuth endpoints speak `snake_case` form/query parameters and the
//!   RFC-shaped responses, as OAuth clients expect
//! - The login response is one tagged shape per outcome; "needs a code"
//!   is data, not an error
//!
//! ## Validation Rules
//!
//! | Field | Rules |
//! |-------|-------|
//! | `email` | valid format, max 255 chars |
//! | `password` | 1-4096 bytes (strength is the gate's job, length is DoS control) |
//! | `code` | six decimal digits |
//! | `slug` | `[a-z0-9-]`, 2-50, no edge hyphens |
//! | `permission` | `resource:action`, `[a-z_]` halves |

use serde::{Deserialize, Serialize};
use shared::validation::validators;
use uuid::Uuid;
use validator::Validate;

use crate::domain::OrgSummary;
use crate::service::{LoginOutcome, SessionTokens, TwoFactorSetup};

// =============================================================================
// REGISTRATION & VERIFICATION
// =============================================================================

/// Request body for user registration.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// User's email address
    #[validate(email(message = "Invalid email format"))]
    #[validate(length(max = 255, message = "Email too long"))]
    pub email: String,

    /// Plain text password; strength is judged by the gate, the length
    /// bound only stops oversized payloads
    #[validate(length(min = 1, max = 4096, message = "Password must be 1-4096 bytes"))]
    pub password: String,
}

/// Response body for registration.
///
/// `user_id` and `verification_token` are populated outside production
/// only (test hook); the message is identical whether or not the email
/// was already registered.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_token: Option<String>,
}

/// Request body for email verification.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct VerifyCodeRequest {
    /// Opaque token from the verification email
    #[validate(length(min = 1, message = "Verification token is required"))]
    pub verification_token: String,

    /// Six-digit code from the same email
    #[validate(custom(function = "validators::valid_numeric_code"))]
    pub code: String,
}

/// Request body for re-sending the verification email.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResendVerificationRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

// =============================================================================
// LOGIN
// =============================================================================

/// Request body for the multi-step login endpoint.
///
/// One endpoint, many shapes: the state machine advances on whichever
/// fields are present. All fields are optional at the DTO level; the
/// machine decides what a given combination means.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(min = 1, max = 4096, message = "Password must be 1-4096 bytes"))]
    pub password: Option<String>,

    /// Emailed six-digit login code
    pub code: Option<String>,

    /// TOTP (6 digits) or backup code (8 digits)
    pub totp_code: Option<String>,

    /// Organization to bind the session to
    pub org_id: Option<Uuid>,

    /// Carrier token from a previous step
    pub user_token: Option<String>,
}

/// Response body for the login endpoint, one shape per outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum LoginResponse {
    CodeRequired {
        requires_code: bool,
        user_id: Uuid,
        expires_in: u64,
    },
    TotpRequired {
        requires_totp: bool,
        user_token: String,
        expires_in: u64,
    },
    OrgSelectionRequired {
        requires_org_selection: bool,
        organizations: Vec<OrgSummary>,
        user_token: String,
        expires_in: u64,
    },
    Tokens(TokenPairResponse),
}

impl From<LoginOutcome> for LoginResponse {
    fn from(outcome: LoginOutcome) -> Self {
        match outcome {
            LoginOutcome::CodeRequired { user_id, expires_in } => Self::CodeRequired {
                requires_code: true,
                user_id,
                expires_in,
            },
            LoginOutcome::TotpRequired { user_token, expires_in } => Self::TotpRequired {
                requires_totp: true,
                user_token,
                expires_in,
            },
            LoginOutcome::OrgSelectionRequired { organizations, user_token, expires_in } => {
                Self::OrgSelectionRequired {
                    requires_org_selection: true,
                    organizations,
                    user_token,
                    expires_in,
                }
            }
            LoginOutcome::Success(session) => Self::Tokens(session.into()),
        }
    }
}

// =============================================================================
// TOKENS
// =============================================================================

/// Request body for token refresh.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

/// Request body for logout.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

/// A completed session's token pair.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub org_id: Option<Uuid>,
}

impl From<SessionTokens> for TokenPairResponse {
    fn from(session: SessionTokens) -> Self {
        Self {
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: session.expires_in,
            org_id: session.org_id,
        }
    }
}

// =============================================================================
// PASSWORD RESET
// =============================================================================

/// Request body for initiating password reset.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

/// Request body for completing password reset.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "Reset token is required"))]
    pub reset_token: String,

    #[validate(custom(function = "validators::valid_numeric_code"))]
    pub code: String,

    #[validate(length(min = 1, max = 4096, message = "Password must be 1-4096 bytes"))]
    pub new_password: String,
}

// =============================================================================
// TWO-FACTOR
// =============================================================================

/// Response body for 2FA setup; plaintext material, shown exactly once.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorSetupResponse {
    pub secret: String,
    pub qr_payload: String,
    pub backup_codes: Vec<String>,
}

impl From<TwoFactorSetup> for TwoFactorSetupResponse {
    fn from(setup: TwoFactorSetup) -> Self {
        Self {
            secret: setup.secret,
            qr_payload: setup.qr_payload,
            backup_codes: setup.backup_codes,
        }
    }
}

/// Request body for confirming 2FA setup.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorVerifyRequest {
    #[validate(custom(function = "validators::valid_numeric_code"))]
    pub code: String,
}

/// Request body for disabling 2FA.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorDisableRequest {
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,

    #[validate(custom(function = "validators::valid_numeric_code"))]
    pub code: String,
}

// =============================================================================
// AUTHORIZATION
// =============================================================================

/// Request body for the policy decision point.
///
/// Ids arrive as raw strings: parse failures are part of the decision
/// contract (`{allowed: false, reason: "Invalid ID format"}`), not a 400.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthzCheckRequest {
    pub user_id: String,
    pub org_id: String,
    pub permission: String,
}

// =============================================================================
// ORGANIZATIONS & GROUPS
// =============================================================================

/// Request body for creating an organization.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrgRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,

    #[validate(custom(function = "validators::valid_slug"))]
    pub slug: String,

    #[validate(length(max = 1000, message = "Description too long"))]
    pub description: Option<String>,
}

/// Request body for adding an organization member.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddMemberRequest {
    pub user_id: Uuid,

    /// "owner", "admin" or "member"
    #[validate(custom(function = "validate_role"))]
    pub role: String,
}

/// Request body for changing a member's role.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMemberRoleRequest {
    /// "owner", "admin" or "member"
    #[validate(custom(function = "validate_role"))]
    pub role: String,
}

/// Request body for creating a group.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,

    #[validate(length(max = 1000, message = "Description too long"))]
    pub description: Option<String>,
}

/// Request body for adding a user to a group.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddGroupMemberRequest {
    pub user_id: Uuid,
}

/// Request body for granting or revoking a group permission.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GroupPermissionRequest {
    /// Canonical `resource:action` string from the catalog
    #[validate(custom(function = "validators::valid_permission"))]
    pub permission: String,
}

fn validate_role(role: &str) -> Result<(), validator::ValidationError> {
    match role {
        "owner" | "admin" | "member" => Ok(()),
        _ => Err(validator::ValidationError::new("invalid_role")),
    }
}

// =============================================================================
// OAUTH (snake_case wire format)
// =============================================================================

/// Query/body parameters for `GET|POST /oauth/authorize`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizeRequestDto {
    pub client_id: String,
    pub redirect_uri: String,
    pub response_type: String,
    #[serde(default)]
    pub scope: String,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub org_id: Option<Uuid>,
    /// Consent approval flag on the POST
    #[serde(default)]
    pub approve: bool,
}

/// Consent-screen payload returned when approval is still needed.
#[derive(Debug, Clone, Serialize)]
pub struct ConsentRequiredResponse {
    pub consent_required: bool,
    pub client_name: String,
    pub scopes: Vec<String>,
}

/// Redirect payload carrying the authorization code.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizeRedirectResponse {
    pub redirect_uri: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Form body for `POST /oauth/token`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequestForm {
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Form body for `POST /oauth/revoke`.
#[derive(Debug, Clone, Deserialize)]
pub struct RevokeRequestForm {
    pub token: String,
    #[allow(dead_code)]
    pub token_type_hint: Option<String>,
}

/// Request body for registering an OAuth client (admin surface).
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterClientRequest {
    #[validate(custom(function = "validators::valid_slug"))]
    pub client_id: String,

    #[validate(length(min = 1, max = 200, message = "Name must be 1-200 characters"))]
    pub name: String,

    /// "public" or "confidential"
    pub client_type: String,

    pub redirect_uris: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub grant_types: Vec<String>,

    #[serde(default = "default_true")]
    pub require_pkce: bool,
    #[serde(default = "default_true")]
    pub require_consent: bool,
    #[serde(default)]
    pub first_party: bool,
}

fn default_true() -> bool {
    true
}

/// Response for client registration; the secret appears exactly once.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterClientResponse {
    pub client_id: String,
    pub client_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

// =============================================================================
// SYSTEM
// =============================================================================

/// Generic message response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Health check response with dependency states.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    pub service: String,
    pub database: String,
    pub ephemeral_store: String,
    pub timestamp: String,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use fake::faker::company::en::CompanyName;
    use fake::faker::internet::en::SafeEmail;
    use fake::Fake;
    use validator::Validate;

    #[test]
    fn test_register_request_accepts_generated_emails() {
        for _ in 0..25 {
            let request = RegisterRequest {
                email: SafeEmail().fake(),
                password: "Corr3ctHorseBatteryStaple!42".to_string(),
            };
            assert!(request.validate().is_ok());
        }
    }

    #[test]
    fn test_login_request_accepts_generated_emails() {
        for _ in 0..25 {
            let request = LoginRequest {
                email: Some(SafeEmail().fake()),
                password: Some("Corr3ctHorseBatteryStaple!42".to_string()),
                code: None,
                totp_code: None,
                org_id: None,
                user_token: None,
            };
            assert!(request.validate().is_ok());
        }
    }

    #[test]
    fn test_create_org_request_accepts_generated_names() {
        for i in 0..25 {
            let request = CreateOrgRequest {
                name: CompanyName().fake(),
                slug: format!("org-{i}"),
                description: None,
            };
            assert!(request.validate().is_ok());
        }
    }

    #[test]
    fn test_register_request_validation() {
        let good = RegisterRequest {
            email: "alice@example.com".to_string(),
            password: "Corr3ctHorseBatteryStaple!42".to_string(),
        };
        assert!(good.validate().is_ok());

        let bad_email = RegisterRequest {
            email: "not-an-email".to_string(),
            password: "Corr3ctHorseBatteryStaple!42".to_string(),
        };
        assert!(bad_email.validate().is_err());

        let oversized = RegisterRequest {
            email: "alice@example.com".to_string(),
            password: "x".repeat(5000),
        };
        assert!(oversized.validate().is_err());
    }

    #[test]
    fn test_verify_code_request_rejects_short_code() {
        let request = VerifyCodeRequest {
            verification_token: "token".to_string(),
            code: "123".to_string(),
        };
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_login_response_shapes() {
        let code = LoginResponse::CodeRequired {
            requires_code: true,
            user_id: Uuid::new_v4(),
            expires_in: 300,
        };
        let json = serde_json::to_value(&code).unwrap();
        assert_eq!(json["requiresCode"], true);
        assert!(json.get("accessToken").is_none());

        let tokens = LoginResponse::Tokens(TokenPairResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 900,
            org_id: None,
        });
        let json = serde_json::to_value(&tokens).unwrap();
        assert_eq!(json["tokenType"], "Bearer");
        assert!(json.get("requiresCode").is_none());
    }

    #[test]
    fn test_member_role_validation() {
        for role in ["owner", "admin", "member"] {
            let request = AddMemberRequest { user_id: Uuid::new_v4(), role: role.to_string() };
            assert!(request.validate().is_ok());
        }
        let bad = AddMemberRequest { user_id: Uuid::new_v4(), role: "root".to_string() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_group_permission_request_shape() {
        let good = GroupPermissionRequest { permission: "image:write".to_string() };
        assert!(good.validate().is_ok());

        let bad = GroupPermissionRequest { permission: "image/write".to_string() };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_register_response_hides_empty_token() {
        let response = RegisterResponse {
            message: "ok".to_string(),
            user_id: None,
            verification_token: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("verificationToken").is_none());
        assert!(json.get("userId").is_none());
    }
}
