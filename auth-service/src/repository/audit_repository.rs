//! # Audit Repository
//!
//! Append-only persistence for [`AuditEvent`]s.
//!
//! There is exactly one write operation and no update or delete: the table
//! is the tamper-evident record of authorization decisions and security
//! events. Reads happen out-of-band (reporting, incident response), not
//! through this service.

use shared::errors::ApiError;
use sqlx::PgPool;

use crate::domain::AuditEvent;

/// Repository for the append-only audit trail.
#[derive(Debug, Clone)]
pub struct AuditRepository {
    /// PostgreSQL connection pool
    pool: PgPool,
}

impl AuditRepository {
    /// Creates a new repository instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Appends one event.
    ///
    /// Callers go through the fire-and-forget writer in
    /// `service::audit_log`, which detaches this insert from the request
    /// path.
    pub async fn append(&self, event: &AuditEvent) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (kind, user_id, org_id, client_id, detail, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.kind.as_str())
        .bind(event.user_id)
        .bind(event.org_id)
        .bind(&event.client_id)
        .bind(&event.detail)
        .bind(event.occurred_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(())
    }
}
