//! # Signet - Authentication & Authorization Service
//!
//! The **auth-service** is a token factory and policy decision point: it
//! issues, rotates and validates bearer credentials, and answers "may
//! principal P perform action A in organization O?". It persists nothing
//! beyond credential material and the role graph.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        HTTP Layer (api/)                        │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────────┐  │
//! │  │   routes    │  │  handlers   │  │    DTOs (Request/Res)   │  │
//! │  └──────┬──────┘  └──────┬──────┘  └────────────┬────────────┘  │
//! └─────────┼────────────────┼─────────────────────┼────────────────┘
//!           ▼                ▼                      ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Service Layer (service/)                     │
//! │   Login FSM │ Accounts │ 2FA │ Authz engine │ OAuth │ Limiter   │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │   Repositories (repository/)     │   EphemeralStore (shared)    │
//! │   users, role graph, clients,    │   codes, carriers, caches,   │
//! │   audit trail  → PostgreSQL      │   blacklist → Redis/memory   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Subsystems
//!
//! | Subsystem | Where |
//! |-----------|-------|
//! | Multi-step login state machine | `service::auth_service` |
//! | Refresh-token rotation & blacklist | `service::auth_service` + shared store |
//! | RBAC engine with two-level cache | `service::authz_service` |
//! | OAuth 2.0 server (code+PKCE, refresh, client-credentials) | `service::oauth_service` |
//!
//! ## Configuration
//!
//! Environment variables are loaded via [`shared::config::AppConfig`].
//! `JWT_SECRET` (≥32 bytes) and `ENCRYPTION_KEY` (64 hex chars) are
//! mandatory; the service refuses to start without them.

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use shared::auth::{PasswordHasher, TokenMint};
use shared::config::{AppConfig, RateLimitConfig};
use shared::ephemeral::EphemeralStore;
use shared::metrics::Metrics;
use shared::{database, tracing_config};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod api;
mod domain;
mod repository;
mod service;

use api::routes;
use repository::{AuditRepository, OAuthRepository, OrgRepository, UserRepository};
use service::{
    AccountService, AuditLog, AuthService, AuthzService, BreachClient, EmailClient, OAuthService,
    RateLimiter, TwoFactorService,
};

/// Shared application state injected into all request handlers.
///
/// Built once in `main` (explicit construction, no injection framework,
/// no globals) and cloned into every worker via [`actix_web::web::Data`].
pub struct AppState {
    /// Login state machine, refresh rotation, logout
    pub auth_service: AuthService,
    /// Registration, verification, password reset
    pub account_service: AccountService,
    /// TOTP lifecycle and backup codes
    pub two_factor_service: TwoFactorService,
    /// Policy decision point with the two-level cache
    pub authz_service: AuthzService,
    /// OAuth 2.0 authorization server
    pub oauth_service: OAuthService,
    /// Sliding-window limiter
    pub rate_limiter: RateLimiter,
    /// Fire-and-forget audit writer
    pub audit_log: AuditLog,
    /// Token mint, shared with handlers for bearer validation
    pub mint: Arc<TokenMint>,
    /// Ephemeral store, shared with handlers for blacklist consults
    pub store: EphemeralStore,
    /// Role-graph repository, used directly by management handlers
    pub org_repository: OrgRepository,
    /// Database pool, used by the health endpoint
    pub db_pool: PgPool,
    /// Prometheus counters
    pub metrics: Metrics,
    /// Per-endpoint limiter table
    pub rate_limits: RateLimitConfig,
    /// Surface `verification_token` in registration responses (non-prod)
    pub expose_registration_token: bool,
    /// Externally visible base URL for discovery metadata
    pub public_base_url: String,
    /// Service name for the health endpoint
    pub service_name: String,
}

/// Application entry point and server initialization.
///
/// # Initialization Sequence
///
/// 1. Load configuration (fails fast on missing/short key material)
/// 2. Initialize structured logging
/// 3. Connect the PostgreSQL pool and the ephemeral store
/// 4. Construct services with their dependencies, explicitly
/// 5. Configure and start the HTTP server
///
/// # Graceful Shutdown
///
/// Actix-web handles SIGTERM/SIGINT: stops accepting connections, drains
/// in-flight requests, then drops the pools.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // ─────────────────────────────────────────────────────────────────────
    // Step 1: Configuration
    // ─────────────────────────────────────────────────────────────────────
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // ─────────────────────────────────────────────────────────────────────
    // Step 2: Structured logging
    // ─────────────────────────────────────────────────────────────────────
    tracing_config::init_tracing(&config.service_name, config.is_production());

    info!(
        service = %config.service_name,
        host = %config.server.host,
        port = %config.server.port,
        "Starting auth service"
    );

    // ─────────────────────────────────────────────────────────────────────
    // Step 3: Stores
    // ─────────────────────────────────────────────────────────────────────
    let db_pool = database::create_pool(&config.database)
        .await
        .expect("Failed to create database pool");

    let store = EphemeralStore::connect(&config.redis)
        .await
        .expect("Failed to connect the ephemeral store");

    // ─────────────────────────────────────────────────────────────────────
    // Step 4: Services (explicit construction, dependencies passed down)
    // ─────────────────────────────────────────────────────────────────────
    let metrics = Metrics::new();
    let mint = Arc::new(TokenMint::new(config.jwt.clone()));
    let hasher = Arc::new(PasswordHasher::new());
    let encryption_key = config
        .security
        .encryption_key_bytes()
        .expect("Invalid encryption key");

    let user_repository = UserRepository::new(db_pool.clone());
    let org_repository = OrgRepository::new(db_pool.clone());
    let oauth_repository = OAuthRepository::new(db_pool.clone());
    let audit_log = AuditLog::new(AuditRepository::new(db_pool.clone()));

    let email_client = EmailClient::new(&config.email);
    let breach_client = BreachClient::new(&config.security);

    let two_factor_service = TwoFactorService::new(
        user_repository.clone(),
        store.clone(),
        audit_log.clone(),
        hasher.clone(),
        encryption_key,
        config.jwt.issuer.clone(),
    );

    let authz_service = AuthzService::new(
        Arc::new(org_repository.clone()),
        store.clone(),
        metrics.clone(),
        Duration::from_secs(config.ephemeral_ttl.authz_l1_seconds),
        Duration::from_secs(config.ephemeral_ttl.authz_l2_seconds),
    );

    let auth_service = AuthService::new(
        user_repository.clone(),
        org_repository.clone(),
        mint.clone(),
        hasher.clone(),
        store.clone(),
        audit_log.clone(),
        email_client.clone(),
        two_factor_service.clone(),
        metrics.clone(),
        config.security.skip_login_code,
        Duration::from_secs(config.ephemeral_ttl.login_code_seconds),
    );

    let account_service = AccountService::new(
        user_repository.clone(),
        store.clone(),
        hasher.clone(),
        breach_client,
        email_client,
        audit_log.clone(),
        authz_service.clone(),
        Duration::from_secs(config.ephemeral_ttl.verification_seconds),
        Duration::from_secs(config.ephemeral_ttl.reset_seconds),
    );

    let oauth_service = OAuthService::new(
        oauth_repository,
        org_repository.clone(),
        mint.clone(),
        hasher,
        store.clone(),
        audit_log.clone(),
        metrics.clone(),
        config.jwt.oauth_access_ttl_seconds,
    );

    let rate_limiter = RateLimiter::new(store.clone(), metrics.clone());

    // Housekeeping: prune long-expired refresh records once an hour.
    // Correctness never depends on this; expiry is enforced by the token
    // signature and the revocation checks.
    {
        let users = user_repository.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3600));
            loop {
                interval.tick().await;
                let cutoff = chrono::Utc::now() - chrono::Duration::days(1);
                match users.delete_expired_refresh_records(cutoff).await {
                    Ok(pruned) if pruned > 0 => {
                        info!(pruned, "Pruned expired refresh records");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Refresh-record pruning failed");
                    }
                }
            }
        });
    }

    let app_state = web::Data::new(AppState {
        auth_service,
        account_service,
        two_factor_service,
        authz_service,
        oauth_service,
        rate_limiter,
        audit_log,
        mint,
        store,
        org_repository,
        db_pool,
        metrics,
        rate_limits: config.rate_limits.clone(),
        expose_registration_token: !config.is_production(),
        public_base_url: config.server.public_url.clone(),
        service_name: config.service_name.clone(),
    });

    // ─────────────────────────────────────────────────────────────────────
    // Step 5: HTTP server
    // ─────────────────────────────────────────────────────────────────────
    let server_host = config.server.host.clone();
    let server_port = config.server.port;
    let allowed_origins = config.cors.allowed_origins.clone();
    let workers = config.server.workers;

    info!("Server listening on {}:{}", server_host, server_port);

    let mut server = HttpServer::new(move || {
        // Origins come from configuration; an empty list means
        // same-origin only (no CORS headers at all)
        let mut cors = Cors::default()
            .allowed_methods(["GET", "POST", "PUT", "DELETE"])
            .allow_any_header()
            .max_age(3600);
        for origin in &allowed_origins {
            cors = cors.allowed_origin(origin);
        }

        App::new()
            // Middleware stack (first added = last executed)
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            // Shared state
            .app_data(app_state.clone())
            // Routes
            .configure(routes::configure)
    })
    .bind((server_host, server_port))?;

    if workers > 0 {
        server = server.workers(workers);
    }

    server.run().await
}
