//! # Registration, Verification & Reset Handlers
//!
//! Every endpoint here serves unauthenticated callers, so responses are
//! enumeration-safe: registration, resend and reset requests answer the
//! same way whether or not the email exists.

use actix_web::{web, HttpRequest, HttpResponse};
use shared::auth::authenticate;
use shared::{errors::ApiError, validation};

use crate::api::dto::{
    ForgotPasswordRequest, MessageResponse, RegisterRequest, RegisterResponse,
    ResendVerificationRequest, ResetPasswordRequest, VerifyCodeRequest,
};
use crate::api::handlers::client_identifier;
use crate::AppState;

/// Registers a new account.
///
/// # Route
///
/// `POST /api/v1/auth/register`
///
/// # Responses
///
/// - **201 Created**: generic acknowledgement. Outside production the
///   body additionally carries `userId` and `verificationToken` so test
///   suites can complete the verification loop without an inbox.
/// - **400 Bad Request**: weak or breached password
/// - **429 Too Many Requests**: more than 3 registrations/hour per IP
///
/// A taken email is **not** a 409 here: the response is identical to
/// success, minus the verification email.
pub async fn register(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    let identifier = client_identifier(&req);
    state
        .rate_limiter
        .check("register", &identifier, state.rate_limits.register)
        .await?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    let result = state
        .account_service
        .register(&body.email, &body.password)
        .await?;

    let mut response = RegisterResponse {
        message: "Registration received; check your email for a verification code".to_string(),
        user_id: None,
        verification_token: None,
    };
    if state.expose_registration_token {
        response.user_id = result.user_id;
        response.verification_token = result.verification_token;
    }

    Ok(HttpResponse::Created().json(response))
}

/// Redeems a verification token and code.
///
/// # Route
///
/// `POST /api/v1/auth/verify-code`
///
/// # Responses
///
/// - **200 OK**: email verified
/// - **401 Unauthorized**: unknown token or wrong code (generic)
/// - **429 Too Many Requests**: attempt lockout
pub async fn verify_code(
    state: web::Data<AppState>,
    body: web::Json<VerifyCodeRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    state
        .account_service
        .verify(&body.verification_token, &body.code)
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Email verified successfully")))
}

/// Re-sends the verification email.
///
/// # Route
///
/// `POST /api/v1/auth/resend-verification`
///
/// # Responses
///
/// - **200 OK**: always (generic)
/// - **429 Too Many Requests**: more than 1 resend / 5 minutes
pub async fn resend_verification(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<ResendVerificationRequest>,
) -> Result<HttpResponse, ApiError> {
    let identifier = client_identifier(&req);
    state
        .rate_limiter
        .check(
            "resend_verification",
            &identifier,
            state.rate_limits.resend_verification,
        )
        .await?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    state.account_service.resend_verification(&body.email).await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new(
        "If the account exists and is unverified, a new code has been sent",
    )))
}

/// Deactivates the authenticated account.
///
/// # Route
///
/// `POST /api/v1/auth/deactivate`
///
/// # Responses
///
/// - **200 OK**: account deactivated; every session revoked
/// - **401 Unauthorized**: missing/invalid bearer
pub async fn deactivate(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let bearer = authenticate(&req, &state.mint, &state.store).await?;
    let user_id = bearer.require_user()?;

    state.account_service.deactivate(user_id).await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new("Account deactivated")))
}

/// Starts a password reset.
///
/// # Route
///
/// `POST /api/v1/auth/request-password-reset`
///
/// # Responses
///
/// - **200 OK**: always (generic, prevents email enumeration)
/// - **429 Too Many Requests**: more than 1 request / 5 minutes
pub async fn forgot_password(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<ForgotPasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    let identifier = client_identifier(&req);
    state
        .rate_limiter
        .check(
            "request_password_reset",
            &identifier,
            state.rate_limits.request_password_reset,
        )
        .await?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    state.account_service.request_reset(&body.email).await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new(
        "If an account exists with this email, a reset code has been sent",
    )))
}

/// Completes a password reset.
///
/// # Route
///
/// `POST /api/v1/auth/reset-password`
///
/// # Responses
///
/// - **200 OK**: password replaced; every session revoked
/// - **400 Bad Request**: replacement password fails the strength gate
/// - **401 Unauthorized**: unknown token or wrong code (generic)
pub async fn reset_password(
    state: web::Data<AppState>,
    body: web::Json<ResetPasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    validation::validate_request(&body)?;

    state
        .account_service
        .reset(&body.reset_token, &body.code, &body.new_password)
        .await?;

    Ok(HttpResponse::Ok().json(MessageResponse::new(
        "Password reset successfully. Please log in with your new password.",
    )))
}
