//! # User Repository
//!
//! Data access layer for users, their 2FA material, and refresh-token
//! records.
//!
//! ## Query Patterns
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────────────────────────┐
//! │ Pattern          │ Example                                          │
//! ├──────────────────┼──────────────────────────────────────────────────┤
//! │ Soft Delete      │ WHERE deleted_at IS NULL                         │
//! │ Live Tokens      │ WHERE revoked_at IS NULL AND expires_at > NOW()  │
//! │ Returning        │ INSERT ... RETURNING * (generated fields)        │
//! │ One Round Trip   │ Guarded UPDATEs instead of read-modify-write     │
//! │ Parameterized    │ Always $1, $2 (never string interpolation)       │
//! └──────────────────┴──────────────────────────────────────────────────┘
//! ```
//!
//! Invariant-bearing mutations (verify-exactly-once, backup-code
//! consumption) are single guarded statements so the database arbitrates
//! races, not the service.

use chrono::{DateTime, Utc};
use shared::errors::ApiError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{NewRefreshTokenRecord, NewUser, RefreshTokenRecord, User};

/// Repository for user-related database operations.
///
/// # Thread Safety
///
/// `Send + Sync`; `PgPool` is `Arc`-based and cloning is cheap.
#[derive(Debug, Clone)]
pub struct UserRepository {
    /// PostgreSQL connection pool
    pool: PgPool,
}

impl UserRepository {
    /// Creates a new repository instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // USER OPERATIONS
    // =========================================================================

    /// Creates a new, unverified user.
    ///
    /// # Errors
    ///
    /// - `ApiError::Conflict` if the email already exists
    /// - `ApiError::InternalError` for other database errors
    pub async fn create(&self, new_user: NewUser) -> Result<User, ApiError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, hashed_password)
            VALUES ($1, $2)
            RETURNING *
            "#,
        )
        .bind(&new_user.email)
        .bind(&new_user.hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("users_email_key") {
                    return ApiError::Conflict { resource: "email".to_string() };
                }
            }
            ApiError::InternalError { message: format!("Database error: {}", e) }
        })?;

        Ok(user)
    }

    /// Finds a live user by lower-cased email address.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE email = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(user)
    }

    /// Finds a live user by their unique ID.
    pub async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE user_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(user)
    }

    /// Marks a user's email as verified.
    ///
    /// Verification happens exactly once: the guard `verified = FALSE`
    /// makes a second call a no-op that reports `false`.
    pub async fn mark_verified(&self, user_id: Uuid) -> Result<bool, ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET verified = TRUE,
                verified_at = NOW(),
                updated_at = NOW()
            WHERE user_id = $1 AND verified = FALSE AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(result.rows_affected() > 0)
    }

    /// Updates the last login timestamp.
    pub async fn update_last_login(&self, user_id: Uuid) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE users
            SET last_login_at = NOW()
            WHERE user_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(())
    }

    /// Replaces a user's password hash.
    ///
    /// Used by the reset flow and by transparent rehash-on-login when the
    /// stored parameters fall behind the current policy.
    pub async fn update_password(
        &self,
        user_id: Uuid,
        new_password_hash: &str,
    ) -> Result<(), ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET hashed_password = $1,
                updated_at = NOW()
            WHERE user_id = $2 AND deleted_at IS NULL
            "#,
        )
        .bind(new_password_hash)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        if result.rows_affected() == 0 {
            return Err(ApiError::NotFound { resource: format!("user:{}", user_id) });
        }

        Ok(())
    }

    /// Deactivates an account. The row survives; authentication stops.
    pub async fn deactivate(&self, user_id: Uuid) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE users
            SET active = FALSE,
                updated_at = NOW()
            WHERE user_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(())
    }

    // =========================================================================
    // TWO-FACTOR MATERIAL
    // =========================================================================

    /// Stores freshly generated (still unconfirmed) 2FA material.
    ///
    /// Overwrites any previous pending setup and clears the confirmation
    /// timestamp; the secret stays inert until [`confirm_totp`] succeeds.
    ///
    /// [`confirm_totp`]: UserRepository::confirm_totp
    pub async fn store_totp_material(
        &self,
        user_id: Uuid,
        secret_enc: &str,
        backup_hashes: &[String],
    ) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE users
            SET totp_secret_enc = $1,
                totp_verified_at = NULL,
                backup_code_hashes = $2,
                backup_used = 0,
                updated_at = NOW()
            WHERE user_id = $3 AND deleted_at IS NULL
            "#,
        )
        .bind(secret_enc)
        .bind(backup_hashes)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(())
    }

    /// Activates a pending TOTP secret after the user proved possession.
    pub async fn confirm_totp(&self, user_id: Uuid) -> Result<bool, ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET totp_verified_at = NOW(),
                updated_at = NOW()
            WHERE user_id = $1
              AND totp_secret_enc IS NOT NULL
              AND totp_verified_at IS NULL
              AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(result.rows_affected() > 0)
    }

    /// Removes all 2FA material (disable flow).
    pub async fn clear_totp(&self, user_id: Uuid) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE users
            SET totp_secret_enc = NULL,
                totp_verified_at = NULL,
                backup_code_hashes = NULL,
                backup_used = 0,
                updated_at = NOW()
            WHERE user_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(())
    }

    /// Consumes one backup code by its SHA-256 digest.
    ///
    /// Single guarded statement: the `ANY` check and the `array_remove` run
    /// in one round trip, so two concurrent presentations of the same code
    /// cannot both succeed. Returns `true` iff the code was live.
    pub async fn consume_backup_code(
        &self,
        user_id: Uuid,
        code_hash: &str,
    ) -> Result<bool, ApiError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET backup_code_hashes = array_remove(backup_code_hashes, $2),
                backup_used = backup_used + 1,
                updated_at = NOW()
            WHERE user_id = $1
              AND $2 = ANY(backup_code_hashes)
              AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(code_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // REFRESH TOKEN RECORDS
    // =========================================================================

    /// Persists the record of a freshly minted refresh token.
    pub async fn create_refresh_record(
        &self,
        record: NewRefreshTokenRecord,
    ) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (jti, user_id, org_id, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.jti)
        .bind(record.user_id)
        .bind(record.org_id)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(())
    }

    /// Looks up a refresh-token record by jti.
    pub async fn find_refresh_record(
        &self,
        jti: Uuid,
    ) -> Result<Option<RefreshTokenRecord>, ApiError> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            SELECT * FROM refresh_tokens
            WHERE jti = $1
            "#,
        )
        .bind(jti)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(record)
    }

    /// Revokes a single refresh-token record. Idempotent.
    pub async fn revoke_refresh_record(&self, jti: Uuid) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = NOW()
            WHERE jti = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(jti)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(())
    }

    /// Revokes every live refresh record for a user, returning the revoked
    /// rows so the caller can blacklist each jti.
    ///
    /// Used by the password-reset flow.
    pub async fn revoke_all_refresh_records(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<RefreshTokenRecord>, ApiError> {
        let revoked = sqlx::query_as::<_, RefreshTokenRecord>(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = NOW()
            WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > NOW()
            RETURNING *
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(revoked)
    }

    /// Prunes expired refresh records.
    ///
    /// Housekeeping for a periodic task; correctness never depends on it
    /// because expiry is enforced by the token signature.
    pub async fn delete_expired_refresh_records(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, ApiError> {
        let result = sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE expires_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(result.rows_affected())
    }
}
