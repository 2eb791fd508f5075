//! # OAuth Repository
//!
//! Data access layer for the OAuth client registry and consent records.
//!
//! Authorization codes never appear here: they live exclusively in the
//! ephemeral store under `oauth_code:{code}` with a 60-second TTL, where
//! single-use consumption is atomic.
//!
//! ## Client Invariants
//!
//! | Type | secret_hash | require_pkce |
//! |------|-------------|--------------|
//! | public | NULL | always true |
//! | confidential | set | configurable |
//!
//! [`OAuthRepository::register_client`] enforces the pairing before the
//! insert; the database's check constraint backs it up.

use shared::errors::ApiError;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{ClientType, ConsentRecord, OAuthClient};

/// Data required to register an OAuth client.
#[derive(Debug, Clone)]
pub struct NewOAuthClient {
    pub client_id: String,
    pub name: String,
    pub client_type: ClientType,
    pub redirect_uris: Vec<String>,
    pub allowed_scopes: Vec<String>,
    pub grant_types: Vec<String>,
    /// Argon2id hash; required iff confidential
    pub secret_hash: Option<String>,
    pub require_pkce: bool,
    pub require_consent: bool,
    pub first_party: bool,
}

/// Repository for OAuth clients and consents.
#[derive(Debug, Clone)]
pub struct OAuthRepository {
    /// PostgreSQL connection pool
    pool: PgPool,
}

impl OAuthRepository {
    /// Creates a new repository instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // CLIENTS
    // =========================================================================

    /// Registers an OAuth client.
    ///
    /// # Errors
    ///
    /// - `ApiError::BadRequest` when the type/secret/PKCE pairing is invalid
    /// - `ApiError::Conflict` when the client id is taken
    pub async fn register_client(&self, new_client: NewOAuthClient) -> Result<OAuthClient, ApiError> {
        // Type invariants hold before the row exists
        match new_client.client_type {
            ClientType::Public => {
                if new_client.secret_hash.is_some() {
                    return Err(ApiError::BadRequest {
                        message: "Public clients cannot have a secret".to_string(),
                    });
                }
                if !new_client.require_pkce {
                    return Err(ApiError::BadRequest {
                        message: "Public clients must require PKCE".to_string(),
                    });
                }
            }
            ClientType::Confidential => {
                if new_client.secret_hash.is_none() {
                    return Err(ApiError::BadRequest {
                        message: "Confidential clients must have a secret".to_string(),
                    });
                }
            }
        }

        let client = sqlx::query_as::<_, OAuthClient>(
            r#"
            INSERT INTO oauth_clients (
                client_id, name, client_type, redirect_uris, allowed_scopes,
                grant_types, secret_hash, require_pkce, require_consent, first_party
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(&new_client.client_id)
        .bind(&new_client.name)
        .bind(new_client.client_type.as_str())
        .bind(&new_client.redirect_uris)
        .bind(&new_client.allowed_scopes)
        .bind(&new_client.grant_types)
        .bind(&new_client.secret_hash)
        .bind(new_client.require_pkce)
        .bind(new_client.require_consent)
        .bind(new_client.first_party)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("oauth_clients_pkey") {
                    return ApiError::Conflict { resource: "client_id".to_string() };
                }
            }
            ApiError::InternalError { message: format!("Database error: {}", e) }
        })?;

        Ok(client)
    }

    /// Looks up a client by id.
    pub async fn find_client(&self, client_id: &str) -> Result<Option<OAuthClient>, ApiError> {
        let client = sqlx::query_as::<_, OAuthClient>(
            r#"
            SELECT * FROM oauth_clients
            WHERE client_id = $1
            "#,
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(client)
    }

    // =========================================================================
    // CONSENTS
    // =========================================================================

    /// Finds the consent record for one (user, client) pair.
    pub async fn find_consent(
        &self,
        user_id: Uuid,
        client_id: &str,
    ) -> Result<Option<ConsentRecord>, ApiError> {
        let consent = sqlx::query_as::<_, ConsentRecord>(
            r#"
            SELECT * FROM oauth_consents
            WHERE user_id = $1 AND client_id = $2
            "#,
        )
        .bind(user_id)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(consent)
    }

    /// Records (or widens) a user's consent for a client.
    ///
    /// Upsert keeps one row per (user, client); scopes replace the previous
    /// set because the consent screen always shows the full request.
    pub async fn upsert_consent(
        &self,
        user_id: Uuid,
        client_id: &str,
        scopes: &[String],
    ) -> Result<(), ApiError> {
        sqlx::query(
            r#"
            INSERT INTO oauth_consents (user_id, client_id, scopes, granted_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (user_id, client_id)
            DO UPDATE SET scopes = EXCLUDED.scopes, granted_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(client_id)
        .bind(scopes)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::InternalError { message: format!("Database error: {}", e) })?;

        Ok(())
    }
}
