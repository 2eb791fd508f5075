//! # OAuth Endpoint Handlers
//!
//! The OAuth surface speaks the wire formats its clients expect:
//! snake_case query/form parameters, RFC 6749 token responses, RFC 8414
//! discovery metadata, and a 302 redirect carrying the authorization
//! code.
//!
//! The authorization endpoint requires an authenticated **user** bearer -
//! the resource owner approves from a logged-in session (obtained through
//! the ordinary multi-step login).

use actix_web::{web, HttpRequest, HttpResponse};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use shared::auth::authenticate;
use shared::{errors::ApiError, validation};

use crate::api::dto::{
    AuthorizeRequestDto, ConsentRequiredResponse, RegisterClientRequest, RegisterClientResponse,
    RevokeRequestForm, TokenRequestForm,
};
use crate::domain::ClientType;
use crate::repository::NewOAuthClient;
use crate::service::{AuthorizeOutcome, AuthorizeParams, TokenParams};
use crate::AppState;

/// Server metadata.
///
/// # Route
///
/// `GET /.well-known/oauth-authorization-server`
pub async fn discovery(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let metadata = state.oauth_service.discovery(&state.public_base_url).await?;
    Ok(HttpResponse::Ok().json(metadata))
}

/// Authorization endpoint, GET form: validate and mint, or ask consent.
///
/// # Route
///
/// `GET /oauth/authorize?client_id=...&redirect_uri=...&response_type=code
/// &scope=...&state=...&code_challenge=...&code_challenge_method=S256`
///
/// # Responses
///
/// - **302 Found**: `Location: {redirect_uri}?code={code}&state={state}`
/// - **200 OK**: `{consentRequired, clientName, scopes}` - the client
///   renders consent and re-submits via POST with `approve=true`
/// - **400 Bad Request**: unknown client, unregistered redirect_uri,
///   bad response_type, missing PKCE for a public client
/// - **401 Unauthorized**: no authenticated resource owner
pub async fn authorize_get(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<AuthorizeRequestDto>,
) -> Result<HttpResponse, ApiError> {
    let mut params = query.into_inner();
    // GET can never approve consent
    params.approve = false;
    authorize_common(req, state, params).await
}

/// Authorization endpoint, POST form: consent approval.
///
/// # Route
///
/// `POST /oauth/authorize` with the same fields plus `approve=true`.
pub async fn authorize_post(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<AuthorizeRequestDto>,
) -> Result<HttpResponse, ApiError> {
    authorize_common(req, state, body.into_inner()).await
}

async fn authorize_common(
    req: HttpRequest,
    state: web::Data<AppState>,
    dto: AuthorizeRequestDto,
) -> Result<HttpResponse, ApiError> {
    let bearer = authenticate(&req, &state.mint, &state.store).await?;
    let user_id = bearer.require_user()?;

    let params = AuthorizeParams {
        client_id: dto.client_id,
        redirect_uri: dto.redirect_uri,
        response_type: dto.response_type,
        scope: dto.scope,
        state: dto.state,
        code_challenge: dto.code_challenge,
        code_challenge_method: dto.code_challenge_method,
        org_id: dto.org_id,
        approved: dto.approve,
    };

    match state.oauth_service.authorize(user_id, params).await? {
        AuthorizeOutcome::ConsentRequired { client_name, scopes } => {
            Ok(HttpResponse::Ok().json(ConsentRequiredResponse {
                consent_required: true,
                client_name,
                scopes,
            }))
        }
        AuthorizeOutcome::Redirect { redirect_uri, code, state } => {
            let mut location = format!("{}?code={}", redirect_uri, urlencoding::encode(&code));
            if let Some(state) = state {
                location.push_str("&state=");
                location.push_str(&urlencoding::encode(&state));
            }
            Ok(HttpResponse::Found()
                .insert_header(("Location", location))
                .finish())
        }
    }
}

/// Token endpoint: the three grant types, form-encoded.
///
/// # Route
///
/// `POST /oauth/token` (`application/x-www-form-urlencoded`)
///
/// Client authentication: HTTP Basic (`client_id:client_secret`) or
/// `client_id`/`client_secret` form fields; public clients send
/// `client_id` only.
///
/// # Responses
///
/// - **200 OK**: `{access_token, token_type, expires_in, refresh_token?, scope}`
/// - **400 Bad Request**: unknown grant type, scope violation
/// - **401 Unauthorized**: client authentication failed, bad code,
///   PKCE mismatch, replayed code or refresh token
pub async fn token(
    req: HttpRequest,
    state: web::Data<AppState>,
    form: web::Form<TokenRequestForm>,
) -> Result<HttpResponse, ApiError> {
    let form = form.into_inner();
    let basic = basic_credentials(&req);

    let params = TokenParams {
        grant_type: form.grant_type,
        code: form.code,
        redirect_uri: form.redirect_uri,
        code_verifier: form.code_verifier,
        refresh_token: form.refresh_token,
        scope: form.scope,
        client_id: form.client_id,
        client_secret: form.client_secret,
    };

    let grant = state.oauth_service.token(params, basic).await?;
    Ok(HttpResponse::Ok().json(grant))
}

/// Revocation endpoint (RFC 7009): always 200.
///
/// # Route
///
/// `POST /oauth/revoke` (`application/x-www-form-urlencoded`)
pub async fn revoke(
    state: web::Data<AppState>,
    form: web::Form<RevokeRequestForm>,
) -> Result<HttpResponse, ApiError> {
    state.oauth_service.revoke(&form.token).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({})))
}

/// Registers an OAuth client (first-party admin surface).
///
/// # Route
///
/// `POST /api/v1/oauth/clients`
///
/// # Responses
///
/// - **201 Created**: `{clientId, clientType, clientSecret?}` - the
///   secret appears exactly once, for confidential clients only
pub async fn register_client(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<RegisterClientRequest>,
) -> Result<HttpResponse, ApiError> {
    let bearer = authenticate(&req, &state.mint, &state.store).await?;
    bearer.require_user()?;

    let body = body.into_inner();
    validation::validate_request(&body)?;

    let client_type = ClientType::parse(&body.client_type).ok_or(ApiError::BadRequest {
        message: "client_type must be public or confidential".to_string(),
    })?;

    let (client, secret) = state
        .oauth_service
        .register_client(NewOAuthClient {
            client_id: body.client_id,
            name: body.name,
            client_type,
            redirect_uris: body.redirect_uris,
            allowed_scopes: body.allowed_scopes,
            grant_types: body.grant_types,
            secret_hash: None, // generated by the service
            require_pkce: body.require_pkce,
            require_consent: body.require_consent,
            first_party: body.first_party,
        })
        .await?;

    Ok(HttpResponse::Created().json(RegisterClientResponse {
        client_id: client.client_id,
        client_type: client.client_type,
        client_secret: secret,
    }))
}

/// Decodes HTTP Basic credentials from the Authorization header.
fn basic_credentials(req: &HttpRequest) -> Option<(String, String)> {
    let header = req.headers().get("Authorization")?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (client_id, secret) = decoded.split_once(':')?;
    Some((client_id.to_string(), secret.to_string()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_basic_credentials_roundtrip() {
        let encoded = BASE64.encode("chat-api:s3cret");
        let req = TestRequest::default()
            .insert_header(("Authorization", format!("Basic {}", encoded)))
            .to_http_request();

        let (id, secret) = basic_credentials(&req).unwrap();
        assert_eq!(id, "chat-api");
        assert_eq!(secret, "s3cret");
    }

    #[test]
    fn test_basic_credentials_rejects_bearer() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer token"))
            .to_http_request();
        assert!(basic_credentials(&req).is_none());
    }

    #[test]
    fn test_basic_credentials_requires_separator() {
        let encoded = BASE64.encode("no-separator");
        let req = TestRequest::default()
            .insert_header(("Authorization", format!("Basic {}", encoded)))
            .to_http_request();
        assert!(basic_credentials(&req).is_none());
    }
}
