//! # Policy Decision Point Handlers
//!
//! `/authorization/check` is the single location where a permission
//! question is answered. Decisions are **always HTTP 200**: the caller
//! asked a question and got an answer. 401 is reserved for callers whose
//! own authentication failed.

use actix_web::{web, HttpRequest, HttpResponse};
use shared::auth::authenticate;
use shared::errors::ApiError;
use uuid::Uuid;

use crate::api::dto::AuthzCheckRequest;
use crate::domain::AuditEvent;
use crate::AppState;

/// Answers one authorization question.
///
/// # Route
///
/// `POST /api/v1/authorization/check`
///
/// # Request Body
///
/// ```json
/// {
///   "userId": "550e8400-...",
///   "orgId": "660e8400-...",
///   "permission": "image:write"
/// }
/// ```
///
/// # Responses
///
/// Always **200 OK** with `{allowed, reason, groups}`:
///
/// - `{"allowed": true, "reason": null, "groups": ["editors"]}`
/// - `{"allowed": true, "reason": null, "groups": null}` - served from the
///   per-decision cache, where group attribution is not recoverable
/// - `{"allowed": false, "reason": "Not a member of the organization", ...}`
/// - `{"allowed": false, "reason": "Invalid ID format", ...}`
///
/// **401 Unauthorized** only when the *caller's* bearer is missing,
/// invalid or revoked. Both first-party and client-credentials service
/// tokens are accepted.
pub async fn check(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<AuthzCheckRequest>,
) -> Result<HttpResponse, ApiError> {
    authenticate(&req, &state.mint, &state.store).await?;

    let body = body.into_inner();
    let decision = state
        .authz_service
        .authorize(&body.user_id, &body.org_id, &body.permission)
        .await?;

    state
        .metrics
        .authz_decisions_total
        .with_label_values(&[if decision.allowed { "allow" } else { "deny" }])
        .inc();

    // Decisions about well-formed principals land in the audit trail,
    // allow and deny alike; malformed input has nothing to attribute
    if let (Ok(user_id), Ok(org_id)) =
        (Uuid::parse_str(&body.user_id), Uuid::parse_str(&body.org_id))
    {
        state.audit_log.record(AuditEvent::authz_decision(
            user_id,
            org_id,
            &body.permission,
            decision.allowed,
        ));
    }

    Ok(HttpResponse::Ok().json(decision))
}

/// Lists the permission catalog.
///
/// # Route
///
/// `GET /api/v1/permissions`
pub async fn list_permissions(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    authenticate(&req, &state.mint, &state.store).await?;

    let permissions = state.org_repository.list_permissions().await?;
    Ok(HttpResponse::Ok().json(permissions))
}
