//! # Service Layer
//!
//! Business logic for every operation the service exposes. Each service
//! orchestrates the repositories (persistent state), the ephemeral store
//! (short-lived single-use state), and the shared auth primitives.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            API Layer                                    │
//! └───────────────────────────────┬─────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Service Layer                                  │
//! │                                                                         │
//! │  AuthService        login FSM, refresh rotation, logout                 │
//! │  AccountService     registration, verification, password reset          │
//! │  TwoFactorService   TOTP lifecycle, backup codes                        │
//! │  AuthzService       policy decision point, two-level cache              │
//! │  OAuthService       auth-code + PKCE, refresh, client-credentials       │
//! │  RateLimiter        sliding-window counters                             │
//! │  AuditLog           fire-and-forget security trail                      │
//! │  EmailClient        outbound mail (fire-and-forget, 10 s deadline)      │
//! │  BreachClient       k-anonymity corpus lookup (2 s deadline, degrades   │
//! │                     open)                                               │
//! │  Lockout            shared 3-per-5-minutes failure policy               │
//! └───────────────────────────────┬─────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │   Repositories (PostgreSQL)  │  EphemeralStore  │  shared::auth          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Deadlines
//!
//! | Call | Deadline |
//! |------|----------|
//! | persistent store | 60 s (pool acquire) |
//! | ephemeral store | 1 s |
//! | breach lookup | 2 s |
//! | email dispatch | 10 s |
//! | password verify | 5 s (off-thread) |

pub mod account_service;
pub mod audit_log;
pub mod auth_service;
pub mod authz_service;
pub mod breach_client;
pub mod email_client;
pub mod lockout;
pub mod oauth_service;
pub mod rate_limiter;
pub mod two_factor_service;

pub use account_service::{AccountService, RegistrationResult};
pub use audit_log::AuditLog;
pub use auth_service::{AuthService, LoginAttempt, LoginOutcome, SessionTokens};
pub use authz_service::{AuthzService, Decision, RoleGraph};
pub use breach_client::BreachClient;
pub use email_client::{EmailClient, EmailTemplate};
pub use oauth_service::{
    AuthorizeOutcome, AuthorizeParams, DiscoveryMetadata, OAuthService, TokenGrant, TokenParams,
};
pub use rate_limiter::RateLimiter;
pub use two_factor_service::{TwoFactorService, TwoFactorSetup};
