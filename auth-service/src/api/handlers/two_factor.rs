//! # Two-Factor Handlers
//!
//! All three endpoints require an authenticated user bearer. Setup
//! material (secret, QR payload, backup codes) crosses the wire exactly
//! once, in the setup response.

use actix_web::{web, HttpRequest, HttpResponse};
use shared::auth::authenticate;
use shared::{errors::ApiError, validation};

use crate::api::dto::{
    MessageResponse, TwoFactorDisableRequest, TwoFactorSetupResponse, TwoFactorVerifyRequest,
};
use crate::AppState;

/// Generates 2FA material for the authenticated user.
///
/// # Route
///
/// `POST /api/v1/auth/2fa/setup`
///
/// # Responses
///
/// - **200 OK**: `{secret, qrPayload, backupCodes}` - shown exactly once;
///   the secret stays inert until `/2fa/verify` confirms it
/// - **401 Unauthorized**: missing/invalid bearer
/// - **409 Conflict**: 2FA already active
pub async fn setup(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let bearer = authenticate(&req, &state.mint, &state.store).await?;
    let user_id = bearer.require_user()?;

    let material = state.two_factor_service.setup(user_id).await?;
    Ok(HttpResponse::Ok().json(TwoFactorSetupResponse::from(material)))
}

/// Confirms a pending setup with a fresh TOTP.
///
/// # Route
///
/// `POST /api/v1/auth/2fa/verify`
///
/// # Responses
///
/// - **200 OK**: 2FA is now active; login requires a TOTP from here on
/// - **401 Unauthorized**: wrong code
/// - **429 Too Many Requests**: 3 wrong codes / 5 minutes
pub async fn verify(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<TwoFactorVerifyRequest>,
) -> Result<HttpResponse, ApiError> {
    let bearer = authenticate(&req, &state.mint, &state.store).await?;
    let user_id = bearer.require_user()?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    state
        .two_factor_service
        .confirm_setup(user_id, &body.code)
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Two-factor authentication enabled")))
}

/// Disables 2FA; requires the password and a current TOTP.
///
/// # Route
///
/// `POST /api/v1/auth/2fa/disable`
///
/// # Responses
///
/// - **200 OK**: 2FA material removed
/// - **401 Unauthorized**: wrong password or code
pub async fn disable(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<TwoFactorDisableRequest>,
) -> Result<HttpResponse, ApiError> {
    let bearer = authenticate(&req, &state.mint, &state.store).await?;
    let user_id = bearer.require_user()?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    state
        .two_factor_service
        .disable(user_id, &body.password, &body.code)
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Two-factor authentication disabled")))
}
