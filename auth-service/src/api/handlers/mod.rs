//! # Request Handlers
//!
//! HTTP request handlers bridging the API layer with the service layer.
//! Each handler follows the same pattern:
//!
//! 1. **Extract** request data using Actix extractors
//! 2. **Rate-limit** where the endpoint is on the limiter table
//! 3. **Validate** input using the `validator` crate
//! 4. **Authenticate** where the endpoint is protected
//! 5. **Call** the service layer
//! 6. **Transform** and return the HTTP response
//!
//! ## Handler Groups
//!
//! | Module | Endpoints |
//! |--------|-----------|
//! | `account` | register, verify-code, resend-verification, password reset |
//! | `auth` | login (multi-step), refresh, logout |
//! | `two_factor` | 2fa setup / verify / disable |
//! | `authz` | authorization/check, permission catalog |
//! | `orgs` | organization, membership, group and grant management |
//! | `oauth` | discovery, authorize, token, revoke, client registry |
//! | `system` | health, metrics |
//!
//! ## Rate-Limit Identifiers
//!
//! Authenticated endpoints use the user id; everything else falls back to
//! the client IP ([`client_identifier`]).

use actix_web::HttpRequest;

pub mod account;
pub mod auth;
pub mod authz;
pub mod oauth;
pub mod orgs;
pub mod system;
pub mod two_factor;

/// Rate-limit identifier for unauthenticated callers: the client IP.
///
/// `realip_remote_addr` honours `Forwarded`/`X-Forwarded-For` from a
/// trusted proxy; the raw peer address is the fallback.
pub(crate) fn client_identifier(req: &HttpRequest) -> String {
    req.connection_info()
        .realip_remote_addr()
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}
