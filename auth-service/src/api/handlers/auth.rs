//! # Login, Refresh & Logout Handlers
//!
//! The `/login` endpoint is the single door into the multi-step state
//! machine: the same route accepts the password step, the emailed code,
//! the TOTP code, and the org-selection follow-up, and answers with the
//! outcome shape that matches how far the attempt got.

use actix_web::{web, HttpRequest, HttpResponse};
use shared::{errors::ApiError, validation};

use crate::api::dto::{
    LoginRequest, LoginResponse, LogoutRequest, MessageResponse, RefreshRequest,
    TokenPairResponse,
};
use crate::api::handlers::client_identifier;
use crate::service::LoginAttempt;
use crate::AppState;

/// Drives one step of the multi-step login.
///
/// # Route
///
/// `POST /api/v1/auth/login`
///
/// # Request Body
///
/// Any meaningful combination of:
///
/// ```json
/// {
///   "email": "alice@example.com",
///   "password": "...",
///   "code": "123456",
///   "totpCode": "654321",
///   "orgId": "550e8400-...",
///   "userToken": "eyJhbGci..."
/// }
/// ```
///
/// # Responses
///
/// - **200 OK** with one of:
///   - `{requiresCode, userId, expiresIn}` - six-digit code emailed
///   - `{requiresTotp, userToken, expiresIn}` - 2FA code needed
///   - `{requiresOrgSelection, organizations, userToken, expiresIn}`
///   - `{accessToken, refreshToken, tokenType, expiresIn, orgId}`
/// - **401 Unauthorized**: any pre-authentication failure (generic)
/// - **403 Forbidden**: password verified but account not verified
/// - **429 Too Many Requests**: rate limit or attempt lockout
pub async fn login(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    let identifier = client_identifier(&req);
    state
        .rate_limiter
        .check("login", &identifier, state.rate_limits.login)
        .await?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    let attempt = LoginAttempt {
        email: body.email,
        password: body.password,
        code: body.code,
        totp_code: body.totp_code,
        org_id: body.org_id,
        user_token: body.user_token,
    };

    let outcome = state.auth_service.login(attempt).await?;
    Ok(HttpResponse::Ok().json(LoginResponse::from(outcome)))
}

/// Rotates a refresh token for a new pair.
///
/// # Route
///
/// `POST /api/v1/auth/refresh`
///
/// # Responses
///
/// - **200 OK**: new `{accessToken, refreshToken, ...}` pair
/// - **401 Unauthorized**: invalid, expired or revoked token; a replay
///   is audit-logged before the rejection
pub async fn refresh(
    state: web::Data<AppState>,
    body: web::Json<RefreshRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    let session = state.auth_service.refresh(&body.refresh_token).await?;
    Ok(HttpResponse::Ok().json(TokenPairResponse::from(session)))
}

/// Revokes one refresh token.
///
/// # Route
///
/// `POST /api/v1/auth/logout`
///
/// # Responses
///
/// - **200 OK**: revoked (idempotent; repeat calls also succeed)
pub async fn logout(
    state: web::Data<AppState>,
    body: web::Json<LogoutRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    state.auth_service.logout(&body.refresh_token).await?;
    Ok(HttpResponse::Ok().json(MessageResponse::new("Logged out successfully")))
}
