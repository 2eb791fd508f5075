//! # Audit Log Writer
//!
//! Fire-and-forget bridge between the request path and the append-only
//! audit trail.
//!
//! ## Failure Model
//!
//! An audit insert must never block or fail the primary operation: the
//! write runs on a detached task, and a failure logs a warning carrying
//! the event kind. The warning is the required trace that an event was
//! dropped.
//!
//! ```text
//! request path ──record()──► tokio::spawn ──► AuditRepository::append
//!      │                                            │
//!      └── returns immediately                  warn! on failure
//! ```

use crate::domain::AuditEvent;
use crate::repository::AuditRepository;
use tracing::warn;

/// Detached writer for audit events.
#[derive(Clone)]
pub struct AuditLog {
    repository: AuditRepository,
}

impl AuditLog {
    /// Creates a writer over the audit repository.
    pub fn new(repository: AuditRepository) -> Self {
        Self { repository }
    }

    /// Records one event without waiting for the insert.
    pub fn record(&self, event: AuditEvent) {
        let repository = self.repository.clone();
        tokio::spawn(async move {
            if let Err(e) = repository.append(&event).await {
                warn!(
                    kind = event.kind.as_str(),
                    error = %e,
                    "Failed to write audit event"
                );
            }
        });
    }
}
