//! # Domain Layer
//!
//! Core business entities and audit events for the authentication and
//! authorization service. This layer is framework-agnostic.
//!
//! ## Module Structure
//!
//! | Module     | Purpose                                                  |
//! |------------|----------------------------------------------------------|
//! | `entities` | Persistent entities + ephemeral bindings with one shape  |
//! | `events`   | Audit events for the append-only trail                   |
//!
//! ## Design Decisions
//!
//! 1. **Entities vs DTOs**: entities carry all stored fields including
//!    secrets; the API layer converts to dedicated response DTOs.
//!
//! 2. **`FromRow` derive**: sqlx maps rows automatically; the insert-side
//!    `New*` structs keep generated columns out of caller hands.
//!
//! 3. **Soft deletes**: `deleted_at` preserves rows for the audit trail;
//!    uniqueness invariants apply among non-deleted rows only.

pub mod entities;
pub mod events;

pub use entities::*;
pub use events::{AuditEvent, AuditEventKind};
