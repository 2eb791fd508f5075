//! # Signet - Shared Library
//!
//! Cross-cutting functionality for the Signet authentication platform.
//!
//! This crate carries everything the service binary needs but that is not
//! business logic: configuration, error types, the persistent-store pool,
//! the ephemeral store, token and password primitives, logging and metrics.
//!
//! ## Modules
//!
//! | Module | Purpose | Key Types |
//! |--------|---------|-----------|
//! | [`config`] | Environment-based configuration | [`AppConfig`] |
//! | [`errors`] | Standardized error handling | [`ApiError`], [`ApiResult`] |
//! | [`auth`] | Token mint, password hashing, bearer validation | [`auth::TokenMint`], [`auth::PasswordHasher`] |
//! | [`database`] | PostgreSQL connection pool | [`create_pool`](database::create_pool) |
//! | [`ephemeral`] | TTL store with atomic single-use consume | [`ephemeral::EphemeralStore`] |
//! | [`tracing_config`] | Structured logging setup | [`init_tracing`](tracing_config::init_tracing) |
//! | [`validation`] | Request validation helpers | Custom validators |
//! | [`metrics`] | Prometheus counters + text exposition | [`metrics::Metrics`] |
//!
//! ## Design Decisions
//!
//! 1. **Single source of truth**: the ephemeral key layout, error codes and
//!    token claims are defined once here and used everywhere
//! 2. **No process-wide singletons**: config and keys are read once and
//!    passed into a composition root
//! 3. **Security first**: auth and crypto follow OWASP guidelines
//! 4. **Observable by default**: structured logging and metrics built-in

pub mod auth;
pub mod config;
pub mod database;
pub mod ephemeral;
pub mod errors;
pub mod metrics;
pub mod tracing_config;
pub mod validation;

// Re-exports for convenience - import commonly used types directly from `shared`
pub use config::AppConfig;
pub use errors::{ApiError, ApiResult};
