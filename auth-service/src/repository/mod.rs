//! # Repository Layer
//!
//! Data access abstractions over the persistent store. Every mutation is
//! one round trip - invariants that must hold under concurrency (verify
//! exactly once, last-owner protection, backup-code consumption) are
//! guarded statements the database arbitrates, never read-modify-write
//! sequences in the service.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Service Layer                                  │
//! └───────────────────────────────┬─────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Repository Layer                                 │
//! │  UserRepository │ OrgRepository │ OAuthRepository │ AuditRepository     │
//! └───────────────────────────────┬─────────────────────────────────────────┘
//!                                 │ sqlx queries
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         PostgreSQL Database                             │
//! │  users │ refresh_tokens │ organizations │ memberships │ groups │        │
//! │  group_members │ group_permissions │ permissions │ oauth_clients │      │
//! │  oauth_consents │ audit_events                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Decisions
//!
//! 1. **Concrete structs**: repositories are plain structs over `PgPool`;
//!    services that need doubles wrap them behind their own traits.
//!
//! 2. **Error mapping**: constraint violations become `ApiError::Conflict`,
//!    everything else `ApiError::InternalError`; messages never reach
//!    clients.
//!
//! 3. **Soft deletes**: user/org/group queries filter `deleted_at IS NULL`.

pub mod audit_repository;
pub mod oauth_repository;
pub mod org_repository;
pub mod user_repository;

pub use audit_repository::AuditRepository;
pub use oauth_repository::{NewOAuthClient, OAuthRepository};
pub use org_repository::OrgRepository;
pub use user_repository::UserRepository;
