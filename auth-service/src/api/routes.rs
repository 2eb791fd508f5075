//! # Route Configuration
//!
//! URL patterns mapped to handler functions.
//!
//! ## Route Structure
//!
//! ```text
//! /
//! ├── health                                    GET    → system::health
//! ├── metrics                                   GET    → system::metrics
//! ├── .well-known/oauth-authorization-server    GET    → oauth::discovery
//! │
//! ├── oauth/
//! │   ├── authorize                             GET    → oauth::authorize_get
//! │   ├── authorize                             POST   → oauth::authorize_post
//! │   ├── token                                 POST   → oauth::token
//! │   └── revoke                                POST   → oauth::revoke
//! │
//! └── api/v1/
//!     ├── auth/
//!     │   ├── register                          POST   → account::register
//!     │   ├── verify-code                       POST   → account::verify_code
//!     │   ├── resend-verification               POST   → account::resend_verification
//!     │   ├── login                             POST   → auth::login
//!     │   ├── refresh                           POST   → auth::refresh
//!     │   ├── logout                            POST   → auth::logout
//!     │   ├── request-password-reset            POST   → account::forgot_password
//!     │   ├── reset-password                    POST   → account::reset_password
//!     │   ├── deactivate                        POST   → account::deactivate
//!     │   └── 2fa/{setup,verify,disable}        POST   → two_factor::*
//!     │
//!     ├── authorization/check                   POST   → authz::check
//!     ├── permissions                           GET    → authz::list_permissions
//!     │
//!     ├── organizations                         GET/POST → orgs::*
//!     ├── organizations/{org}                   GET    → orgs::get_org
//!     ├── organizations/{org}/members           POST   → orgs::add_member
//!     ├── organizations/{org}/members/{user}    PUT/DELETE → orgs::*
//!     ├── organizations/{org}/groups            GET/POST → orgs::*
//!     ├── groups/{id}                           DELETE → orgs::delete_group
//!     ├── groups/{id}/members[/{user}]          POST/DELETE → orgs::*
//!     ├── groups/{id}/permissions[/{perm}]      POST/DELETE → orgs::*
//!     │
//!     └── oauth/clients                         POST   → oauth::register_client
//! ```
//!
//! ## Authentication
//!
//! Public: registration, verification, login, refresh, logout, reset,
//! health, metrics, discovery, token, revoke. Everything else requires a
//! bearer; the OAuth authorize endpoint requires a **user** bearer.

use actix_web::web;

use super::handlers::{account, auth, authz, oauth, orgs, system, two_factor};

/// Configures all routes for the service.
///
/// Called from `main.rs` during app initialization:
///
/// ```rust,ignore
/// App::new().configure(routes::configure)
/// ```
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // ─────────────────────────────────────────────────────────────────
        // System
        // ─────────────────────────────────────────────────────────────────
        .route("/health", web::get().to(system::health))
        .route("/metrics", web::get().to(system::metrics))
        // ─────────────────────────────────────────────────────────────────
        // OAuth 2.0 (wire formats per RFC; outside the /api/v1 prefix)
        // ─────────────────────────────────────────────────────────────────
        .route(
            "/.well-known/oauth-authorization-server",
            web::get().to(oauth::discovery),
        )
        .service(
            web::scope("/oauth")
                .route("/authorize", web::get().to(oauth::authorize_get))
                .route("/authorize", web::post().to(oauth::authorize_post))
                .route("/token", web::post().to(oauth::token))
                .route("/revoke", web::post().to(oauth::revoke)),
        )
        // ─────────────────────────────────────────────────────────────────
        // Auth API v1
        // ─────────────────────────────────────────────────────────────────
        .service(
            web::scope("/api/v1")
                .service(
                    web::scope("/auth")
                        // Account lifecycle (public)
                        .route("/register", web::post().to(account::register))
                        .route("/verify-code", web::post().to(account::verify_code))
                        .route(
                            "/resend-verification",
                            web::post().to(account::resend_verification),
                        )
                        .route(
                            "/request-password-reset",
                            web::post().to(account::forgot_password),
                        )
                        .route("/reset-password", web::post().to(account::reset_password))
                        .route("/deactivate", web::post().to(account::deactivate))
                        // Sessions (public; the machine gates internally)
                        .route("/login", web::post().to(auth::login))
                        .route("/refresh", web::post().to(auth::refresh))
                        .route("/logout", web::post().to(auth::logout))
                        // Two-factor (bearer required)
                        .route("/2fa/setup", web::post().to(two_factor::setup))
                        .route("/2fa/verify", web::post().to(two_factor::verify))
                        .route("/2fa/disable", web::post().to(two_factor::disable)),
                )
                // Policy decision point (bearer required; always 200)
                .route("/authorization/check", web::post().to(authz::check))
                .route("/permissions", web::get().to(authz::list_permissions))
                // Organizations & memberships (bearer required)
                .route("/organizations", web::post().to(orgs::create_org))
                .route("/organizations", web::get().to(orgs::list_orgs))
                .route("/organizations/{org_id}", web::get().to(orgs::get_org))
                .route(
                    "/organizations/{org_id}/members",
                    web::post().to(orgs::add_member),
                )
                .route(
                    "/organizations/{org_id}/members/{user_id}",
                    web::put().to(orgs::update_member_role),
                )
                .route(
                    "/organizations/{org_id}/members/{user_id}",
                    web::delete().to(orgs::remove_member),
                )
                .route(
                    "/organizations/{org_id}/groups",
                    web::post().to(orgs::create_group),
                )
                .route(
                    "/organizations/{org_id}/groups",
                    web::get().to(orgs::list_groups),
                )
                // Groups & grants (bearer required)
                .route("/groups/{group_id}", web::delete().to(orgs::delete_group))
                .route(
                    "/groups/{group_id}/members",
                    web::post().to(orgs::add_group_member),
                )
                .route(
                    "/groups/{group_id}/members/{user_id}",
                    web::delete().to(orgs::remove_group_member),
                )
                .route(
                    "/groups/{group_id}/permissions",
                    web::post().to(orgs::grant_permission),
                )
                .route(
                    "/groups/{group_id}/permissions/{permission}",
                    web::delete().to(orgs::revoke_permission),
                )
                // OAuth client registry (first-party admin surface)
                .route("/oauth/clients", web::post().to(oauth::register_client)),
        );
}
