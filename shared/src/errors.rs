//! # Application Error Types
//!
//! Unified error handling with automatic HTTP conversion.
//!
//! ## Design Philosophy
//!
//! Each error variant maps to a specific HTTP status code and a stable error
//! code, ensuring consistent API responses across the service.
//!
//! Two rules shape the variants:
//!
//! - **Pre-authentication propagation is lossy.** Every failure surface an
//!   unauthenticated caller can reach collapses to [`ApiError::InvalidCredentials`]
//!   so that user, org and token existence cannot be enumerated. The only
//!   exceptions are [`ApiError::RateLimited`] (the client must back off) and
//!   [`ApiError::AccountNotVerified`], which is emitted strictly *after* the
//!   password has been verified.
//! - **Authorization decisions are not errors.** The policy decision point
//!   answers with HTTP 200 and `{allowed: false, reason}`; 401/403 are
//!   reserved for failures of authentication itself (missing/invalid bearer,
//!   insufficient scope on service tokens).
//!
//! ## Error Categories
//!
//! ```text
//! ┌──────────────────────────┬────────────────────┬──────────────────────────┐
//! │ Authentication (401)     │ Authorization (403)│ Validation (400)         │
//! ├──────────────────────────┼────────────────────┼──────────────────────────┤
//! │ InvalidCredentials       │ AccountNotVerified │ ValidationError          │
//! │ TokenExpired             │ AccountInactive    │ BadRequest               │
//! │ TokenInvalid             │ PermissionDenied   │ InvalidUuid              │
//! │ TokenRevoked             │                    │                          │
//! │ ReplayDetected           │                    │                          │
//! │ MissingAuth              │                    │                          │
//! ├──────────────────────────┴────────────────────┴──────────────────────────┤
//! │ Resources (404, 409)     │ Rate Limit (429)   │ Server (500, 503)        │
//! ├──────────────────────────┼────────────────────┼──────────────────────────┤
//! │ NotFound                 │ RateLimited        │ DatabaseError            │
//! │ Conflict                 │                    │ StoreError               │
//! │                          │                    │ InternalError            │
//! │                          │                    │ DependencyUnavailable    │
//! └──────────────────────────┴────────────────────┴──────────────────────────┘
//! ```
//!
//! ## HTTP Response Format
//!
//! All errors are serialized to a consistent JSON format:
//!
//! ```json
//! {
//!   "code": "TOKEN_REVOKED",
//!   "message": "Token revoked",
//!   "request_id": "550e8400-e29b-41d4-a716-446655440000",
//!   "details": { ... },
//!   "timestamp": "2026-01-15T10:30:00Z"
//! }
//! ```

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for handlers and services.
pub type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Main Error Enum
// =============================================================================

/// Application error type with automatic HTTP status mapping.
///
/// ## Adding New Variants
///
/// When adding new error types:
/// 1. Choose the appropriate HTTP status code
/// 2. Add the variant with `#[error("...")]` for message format
/// 3. Update `status_code()` and `error_code()`
/// 4. Update `is_server_error()` if applicable
/// 5. Add tests
#[derive(Debug, Error)]
pub enum ApiError {
    // =========================================================================
    // Authentication Errors (401 Unauthorized)
    // =========================================================================
    // The generic failure for every pre-authentication surface. Wrong
    // password, unknown user, unknown org, inactive account before the
    // password check - all of them collapse here.

    /// Wrong or unknowable credentials. Returns 401 Unauthorized.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Token has passed its `exp` claim. Returns 401 Unauthorized.
    #[error("Token expired")]
    TokenExpired,

    /// Token is malformed, unsigned, of the wrong kind, or tampered with.
    /// Returns 401 Unauthorized.
    #[error("Invalid token")]
    TokenInvalid,

    /// Token's jti is on the blacklist (logout, rotation, revocation).
    /// Returns 401 Unauthorized.
    #[error("Token revoked")]
    TokenRevoked,

    /// A single-use credential was presented a second time. The replay is
    /// audit-logged before this error is returned. Returns 401 Unauthorized.
    #[error("Replay detected")]
    ReplayDetected,

    /// Request doesn't include required authentication header.
    /// Returns 401 Unauthorized.
    #[error("Missing authentication")]
    MissingAuth,

    // =========================================================================
    // Authorization Errors (403 Forbidden)
    // =========================================================================
    // Authentication succeeded, but the account or token cannot proceed.
    // Emitted only post-authentication, so they may be specific.

    /// Password verified, but the email address has not been confirmed.
    /// Strictly post-authentication - the caller already proved they know
    /// the password. Returns 403 Forbidden.
    #[error("Account not verified")]
    AccountNotVerified,

    /// Account has been deactivated. Returns 403 Forbidden.
    #[error("Account inactive")]
    AccountInactive,

    /// Service token lacks the required scope, or a management endpoint was
    /// called without the needed org role. Returns 403 Forbidden.
    #[error("Permission denied")]
    PermissionDenied,

    // =========================================================================
    // Validation Errors (400 Bad Request)
    // =========================================================================

    /// Request body failed validation rules.
    /// Contains field-level errors from the `validator` crate.
    /// Returns 400 Bad Request with details.
    #[error("Validation error")]
    ValidationError(#[from] ValidationErrors),

    /// Generic bad request with custom message.
    /// Returns 400 Bad Request.
    #[error("Invalid input: {message}")]
    BadRequest {
        /// Human-readable description of what's wrong
        message: String,
    },

    /// UUID parsing failed. Returns 400 Bad Request.
    #[error("Invalid UUID format")]
    InvalidUuid,

    // =========================================================================
    // Resource Errors (404 Not Found, 409 Conflict)
    // =========================================================================

    /// Requested resource doesn't exist. Returns 404 Not Found.
    #[error("Resource not found: {resource}")]
    NotFound {
        /// Resource identifier (e.g., "organization:abc", "group:123")
        resource: String,
    },

    /// Action would violate a uniqueness constraint (duplicate email, slug,
    /// group name). Returns 409 Conflict.
    #[error("Resource already exists: {resource}")]
    Conflict {
        /// Description of the conflict (e.g., "slug already in use")
        resource: String,
    },

    // =========================================================================
    // Rate Limiting (429 Too Many Requests)
    // =========================================================================

    /// Client has exceeded a rate limit window, or an attempt counter has
    /// triggered a lockout. Returns 429 with a `Retry-After` header.
    #[error("Too many requests")]
    RateLimited {
        /// Seconds until the client can retry
        retry_after_seconds: u64,
    },

    // =========================================================================
    // Server Errors (500 Internal Server Error, 503 Service Unavailable)
    // =========================================================================
    // Logged as errors and monitored. Details are NOT exposed to clients.

    /// PostgreSQL query failed. Wraps `sqlx::Error`.
    /// Returns 500 Internal Server Error.
    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    /// Ephemeral store operation failed. Wraps `redis::RedisError`.
    /// Returns 500 Internal Server Error.
    #[error("Ephemeral store error")]
    StoreError(#[from] redis::RedisError),

    /// Unspecified internal error. Use as last resort.
    /// Returns 500 Internal Server Error.
    #[error("Internal server error")]
    InternalError {
        /// Internal message for logging (not exposed to client)
        message: String,
    },

    /// A collaborator (persistent store, ephemeral store, mailer) is down
    /// in a way the caller may retry. Returns 503 Service Unavailable.
    #[error("Dependency unavailable")]
    DependencyUnavailable {
        /// Name of the unavailable dependency
        dependency: String,
    },
}

// =============================================================================
// Error Methods
// =============================================================================

impl ApiError {
    /// Returns a machine-readable error code.
    ///
    /// These codes are stable and can be used by API clients for
    /// programmatic error handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            // Authentication
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenInvalid => "TOKEN_INVALID",
            Self::TokenRevoked => "TOKEN_REVOKED",
            Self::ReplayDetected => "REPLAY_DETECTED",
            Self::MissingAuth => "MISSING_AUTH",
            // Authorization
            Self::AccountNotVerified => "ACCOUNT_NOT_VERIFIED",
            Self::AccountInactive => "ACCOUNT_INACTIVE",
            Self::PermissionDenied => "PERMISSION_DENIED",
            // Validation
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::BadRequest { .. } => "BAD_REQUEST",
            Self::InvalidUuid => "INVALID_UUID",
            // Resources
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict { .. } => "CONFLICT",
            // Rate limiting
            Self::RateLimited { .. } => "RATE_LIMITED",
            // Server
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::StoreError(_) => "STORE_ERROR",
            Self::InternalError { .. } => "INTERNAL_ERROR",
            Self::DependencyUnavailable { .. } => "DEPENDENCY_UNAVAILABLE",
        }
    }

    /// Returns the HTTP status code for this error.
    ///
    /// This is the source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 401 Unauthorized - Authentication required or failed
            Self::InvalidCredentials
            | Self::TokenExpired
            | Self::TokenInvalid
            | Self::TokenRevoked
            | Self::ReplayDetected
            | Self::MissingAuth => StatusCode::UNAUTHORIZED,

            // 403 Forbidden - Authenticated but cannot proceed
            Self::AccountNotVerified | Self::AccountInactive | Self::PermissionDenied => {
                StatusCode::FORBIDDEN
            }

            // 400 Bad Request - Client sent invalid data
            Self::ValidationError(_) | Self::BadRequest { .. } | Self::InvalidUuid => {
                StatusCode::BAD_REQUEST
            }

            // 404 Not Found
            Self::NotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            Self::Conflict { .. } => StatusCode::CONFLICT,

            // 429 Too Many Requests
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            Self::DatabaseError(_) | Self::StoreError(_) | Self::InternalError { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }

            // 503 Service Unavailable
            Self::DependencyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Returns `true` if this is a server-side error (5xx).
    ///
    /// Server errors are logged at ERROR level and never expose internal
    /// details to clients. Client errors (4xx) are logged at WARN level.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::DatabaseError(_)
                | Self::StoreError(_)
                | Self::InternalError { .. }
                | Self::DependencyUnavailable { .. }
        )
    }
}

// =============================================================================
// Response Structure
// =============================================================================

/// Standard error response body for the API.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code for programmatic handling
    pub code: String,

    /// Human-readable message (for debugging, not for user display)
    pub message: String,

    /// Request ID for tracing across services.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Additional error details (varies by error type).
    /// - ValidationError: field-level errors
    /// - RateLimited: `retry_after_seconds`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,

    /// When the error occurred (ISO 8601 format)
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorResponse {
    /// Creates a new error response from an `ApiError`.
    pub fn new(error: &ApiError) -> Self {
        // Extract type-specific details
        let details = match error {
            ApiError::ValidationError(errors) => {
                Some(serde_json::to_value(errors).unwrap_or_default())
            }
            ApiError::RateLimited { retry_after_seconds } => {
                Some(serde_json::json!({ "retry_after_seconds": retry_after_seconds }))
            }
            // Server errors: never expose internals to the client
            ApiError::DatabaseError(_)
            | ApiError::StoreError(_)
            | ApiError::InternalError { .. } => None,
            _ => None,
        };

        Self {
            code: error.error_code().to_string(),
            message: error.to_string(),
            request_id: None,
            details,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Adds a request ID for tracing.
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = Some(request_id.to_string());
        self
    }
}

// =============================================================================
// Actix-web Integration
// =============================================================================

/// Implements Actix-web's `ResponseError` trait so handlers can return
/// `ApiError` directly.
///
/// Rate-limited responses additionally carry a `Retry-After` header, which
/// is the standard back-off signal for 429s.
impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        // Delegate to our implementation
        self.status_code()
    }

    fn error_response(&self) -> HttpResponse {
        let response = ErrorResponse::new(self);
        let mut builder = HttpResponse::build(self.status_code());
        if let ApiError::RateLimited { retry_after_seconds } = self {
            builder.insert_header(("Retry-After", retry_after_seconds.to_string()));
        }
        builder.json(response)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authentication_errors_return_401() {
        assert_eq!(ApiError::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::TokenExpired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::TokenInvalid.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::TokenRevoked.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::ReplayDetected.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::MissingAuth.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_post_authentication_errors_return_403() {
        assert_eq!(ApiError::AccountNotVerified.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::AccountInactive.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::PermissionDenied.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_resource_errors() {
        assert_eq!(
            ApiError::NotFound { resource: "organization".to_string() }.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Conflict { resource: "slug".to_string() }.status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_rate_limited_returns_429() {
        assert_eq!(
            ApiError::RateLimited { retry_after_seconds: 60 }.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_error_codes_are_screaming_snake_case() {
        assert_eq!(ApiError::InvalidCredentials.error_code(), "INVALID_CREDENTIALS");
        assert_eq!(ApiError::TokenRevoked.error_code(), "TOKEN_REVOKED");
        assert_eq!(ApiError::ReplayDetected.error_code(), "REPLAY_DETECTED");
        assert_eq!(
            ApiError::RateLimited { retry_after_seconds: 60 }.error_code(),
            "RATE_LIMITED"
        );
    }

    #[test]
    fn test_server_errors_are_flagged() {
        assert!(ApiError::InternalError { message: "test".to_string() }.is_server_error());
        assert!(
            ApiError::DependencyUnavailable { dependency: "redis".to_string() }.is_server_error()
        );
        assert!(!ApiError::InvalidCredentials.is_server_error());
        assert!(!ApiError::AccountNotVerified.is_server_error());
    }

    #[test]
    fn test_rate_limited_response_has_retry_after_header() {
        let error = ApiError::RateLimited { retry_after_seconds: 42 };
        let response = error.error_response();
        let header = response.headers().get("Retry-After").unwrap();
        assert_eq!(header.to_str().unwrap(), "42");
    }

    #[test]
    fn test_error_response_includes_timestamp() {
        let error = ApiError::InvalidCredentials;
        let response = ErrorResponse::new(&error);

        let now = chrono::Utc::now();
        let diff = now - response.timestamp;
        assert!(diff.num_seconds() < 60);
    }

    #[test]
    fn test_error_response_with_request_id() {
        let error = ApiError::TokenRevoked;
        let request_id = Uuid::new_v4();
        let response = ErrorResponse::new(&error).with_request_id(request_id);

        assert_eq!(response.request_id, Some(request_id.to_string()));
    }
}
