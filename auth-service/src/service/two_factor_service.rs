//! # Two-Factor Engine
//!
//! TOTP secret lifecycle, backup codes, and the verification used by the
//! login state machine.
//!
//! ## Setup Handshake
//!
//! ```text
//! POST /2fa/setup            POST /2fa/verify
//!     │                           │
//!     ▼                           ▼
//! generate 160-bit secret    user proves possession
//! seal with AES-256-GCM      (fresh TOTP from the app)
//! store sealed + inert   ──► totp_verified_at = NOW()
//! return secret/QR/backup        secret becomes active
//! codes exactly once
//! ```
//!
//! Until the verify step succeeds the secret is inert: login does not
//! require TOTP from a user whose setup was never confirmed, and a
//! replacement setup overwrites the pending material.
//!
//! ## Material at Rest
//!
//! | Material | Storage |
//! |----------|---------|
//! | TOTP secret | AES-256-GCM, `base64(nonce ‖ ciphertext)`, key from config |
//! | Backup codes | SHA-256 digests; plaintext returned exactly once |
//!
//! Backup codes are 8 random 8-digit decimal codes; each is single-use
//! (consumption is a guarded UPDATE) and `backup_used` counts total codes
//! ever consumed.
//!
//! ## Verification
//!
//! TOTP codes are checked against the current 30-second window ±1 step.
//! An 8-digit code is treated as a backup code. Failures feed the
//! 3-per-5-minutes lockout shared with the rest of the login pipeline.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::Rng;
use sha2::{Digest, Sha256};
use shared::auth::{verify_bounded, PasswordHasher};
use shared::ephemeral::EphemeralStore;
use shared::errors::ApiError;
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{AuditEvent, User};
use crate::repository::UserRepository;
use crate::service::audit_log::AuditLog;
use crate::service::lockout::Lockout;

/// Number of backup codes issued per setup.
const BACKUP_CODE_COUNT: usize = 8;

/// Attempt-counter purpose for 2FA verification.
const TOTP_PURPOSE: &str = "totp";

/// Plaintext material returned from setup, exactly once.
#[derive(Debug, Clone)]
pub struct TwoFactorSetup {
    /// Base32 TOTP secret for manual entry
    pub secret: String,
    /// `otpauth://` URI for QR rendering
    pub qr_payload: String,
    /// Backup codes; shown once, stored only as digests
    pub backup_codes: Vec<String>,
}

/// Two-factor engine.
#[derive(Clone)]
pub struct TwoFactorService {
    users: UserRepository,
    lockout: Lockout,
    audit: AuditLog,
    hasher: Arc<PasswordHasher>,
    cipher_key: [u8; 32],
    issuer: String,
}

impl TwoFactorService {
    /// Creates the engine.
    pub fn new(
        users: UserRepository,
        store: EphemeralStore,
        audit: AuditLog,
        hasher: Arc<PasswordHasher>,
        cipher_key: [u8; 32],
        issuer: String,
    ) -> Self {
        Self {
            users,
            lockout: Lockout::new(store),
            audit,
            hasher,
            cipher_key,
            issuer,
        }
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Generates and stores (inert) 2FA material for a user.
    ///
    /// The response is the only time the plaintext secret and backup codes
    /// exist outside the authenticator app.
    ///
    /// ## Errors
    ///
    /// - `ApiError::Conflict` when 2FA is already active
    pub async fn setup(&self, user_id: Uuid) -> Result<TwoFactorSetup, ApiError> {
        let user = self.require_user(user_id).await?;
        if user.totp_active() {
            return Err(ApiError::Conflict {
                resource: "two-factor authentication".to_string(),
            });
        }

        // 160-bit secret, per RFC 4226's recommendation for SHA-1
        let raw_secret = Secret::generate_secret()
            .to_bytes()
            .map_err(|_| ApiError::InternalError {
                message: "Secret generation failed".to_string(),
            })?;
        let probe = TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            raw_secret,
            Some(self.issuer.clone()),
            user.email.clone(),
        )
        .map_err(|e| ApiError::InternalError {
            message: format!("TOTP construction failed: {}", e),
        })?;
        let secret_b32 = probe.get_secret_base32();

        let sealed = self.seal(&secret_b32)?;

        let backup_codes: Vec<String> = (0..BACKUP_CODE_COUNT)
            .map(|_| format!("{:08}", rand::thread_rng().gen_range(0..100_000_000u64)))
            .collect();
        let backup_hashes: Vec<String> = backup_codes.iter().map(|c| hash_backup_code(c)).collect();

        self.users
            .store_totp_material(user_id, &sealed, &backup_hashes)
            .await?;

        let qr_payload = format!(
            "otpauth://totp/{issuer}:{email}?secret={secret}&issuer={issuer}",
            issuer = self.issuer,
            email = user.email,
            secret = secret_b32,
        );

        info!(user_id = %user_id, "Two-factor setup material generated");

        Ok(TwoFactorSetup {
            secret: secret_b32,
            qr_payload,
            backup_codes,
        })
    }

    /// Activates a pending secret once the user supplies a fresh TOTP.
    ///
    /// ## Errors
    ///
    /// - `ApiError::BadRequest` when no setup is pending
    /// - `ApiError::InvalidCredentials` on a wrong code
    pub async fn confirm_setup(&self, user_id: Uuid, code: &str) -> Result<(), ApiError> {
        let user = self.require_user(user_id).await?;
        let Some(sealed) = user.totp_secret_enc.as_deref() else {
            return Err(ApiError::BadRequest {
                message: "No two-factor setup is pending".to_string(),
            });
        };
        if user.totp_verified_at.is_some() {
            return Err(ApiError::Conflict {
                resource: "two-factor authentication".to_string(),
            });
        }

        self.lockout.ensure_clear(user_id, TOTP_PURPOSE).await?;

        if !self.check_totp(sealed, &user.email, code)? {
            self.note_failure(user_id).await?;
            return Err(ApiError::InvalidCredentials);
        }

        self.lockout.clear(user_id, TOTP_PURPOSE).await?;

        if !self.users.confirm_totp(user_id).await? {
            // Lost a race with another confirmation or a disable
            return Err(ApiError::BadRequest {
                message: "No two-factor setup is pending".to_string(),
            });
        }

        info!(user_id = %user_id, "Two-factor authentication enabled");
        Ok(())
    }

    /// Disables 2FA; requires the password and a current TOTP.
    pub async fn disable(&self, user_id: Uuid, password: &str, code: &str) -> Result<(), ApiError> {
        let user = self.require_user(user_id).await?;
        if !user.totp_active() {
            return Err(ApiError::BadRequest {
                message: "Two-factor authentication is not enabled".to_string(),
            });
        }

        let password_ok = verify_bounded(
            self.hasher.clone(),
            password.to_string(),
            user.hashed_password.clone(),
        )
        .await?;
        if !password_ok {
            return Err(ApiError::InvalidCredentials);
        }

        self.lockout.ensure_clear(user_id, TOTP_PURPOSE).await?;
        let sealed = user.totp_secret_enc.as_deref().unwrap_or_default();
        if !self.check_totp(sealed, &user.email, code)? {
            self.note_failure(user_id).await?;
            return Err(ApiError::InvalidCredentials);
        }

        self.lockout.clear(user_id, TOTP_PURPOSE).await?;
        self.users.clear_totp(user_id).await?;

        info!(user_id = %user_id, "Two-factor authentication disabled");
        Ok(())
    }

    // =========================================================================
    // Login-Time Verification
    // =========================================================================

    /// Verifies a TOTP or backup code during login.
    ///
    /// Applies the shared lockout; a failed code counts toward it. Backup
    /// codes (8 digits) are consumed on success and never accepted again.
    pub async fn verify_login_code(&self, user: &User, code: &str) -> Result<(), ApiError> {
        self.lockout.ensure_clear(user.user_id, TOTP_PURPOSE).await?;

        let ok = if code.len() == BACKUP_CODE_LEN {
            // Single-use: the guarded UPDATE removes the digest atomically
            self.users
                .consume_backup_code(user.user_id, &hash_backup_code(code))
                .await?
        } else {
            let sealed = user.totp_secret_enc.as_deref().unwrap_or_default();
            self.check_totp(sealed, &user.email, code)?
        };

        if !ok {
            self.note_failure(user.user_id).await?;
            return Err(ApiError::InvalidCredentials);
        }

        self.lockout.clear(user.user_id, TOTP_PURPOSE).await?;
        Ok(())
    }

    async fn note_failure(&self, user_id: Uuid) -> Result<(), ApiError> {
        if self.lockout.record_failure(user_id, TOTP_PURPOSE).await? {
            warn!(user_id = %user_id, "Two-factor lockout triggered");
            self.audit
                .record(AuditEvent::two_factor_lockout(user_id, TOTP_PURPOSE));
        }
        Ok(())
    }

    // =========================================================================
    // Crypto Helpers
    // =========================================================================

    /// Checks a code against the sealed secret, current window ±1 step.
    fn check_totp(&self, sealed: &str, account: &str, code: &str) -> Result<bool, ApiError> {
        let secret_b32 = self.open(sealed)?;
        let secret_bytes = Secret::Encoded(secret_b32)
            .to_bytes()
            .map_err(|_| ApiError::InternalError {
                message: "Stored TOTP secret is not valid base32".to_string(),
            })?;

        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            1, // skew: accept the neighbouring 30-second windows
            30,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| ApiError::InternalError {
            message: format!("TOTP construction failed: {}", e),
        })?;

        totp.check_current(code).map_err(|e| ApiError::InternalError {
            message: format!("System clock error: {}", e),
        })
    }

    /// Seals the base32 secret: AES-256-GCM, `base64(nonce ‖ ciphertext)`.
    fn seal(&self, plaintext: &str) -> Result<String, ApiError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.cipher_key));
        let nonce_bytes: [u8; 12] = rand::thread_rng().gen();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| ApiError::InternalError {
                message: "Secret sealing failed".to_string(),
            })?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(combined))
    }

    /// Opens a sealed secret. Tampered material fails authentication.
    fn open(&self, sealed: &str) -> Result<String, ApiError> {
        let combined = BASE64.decode(sealed).map_err(|_| ApiError::InternalError {
            message: "Sealed secret is not valid base64".to_string(),
        })?;
        if combined.len() < 12 {
            return Err(ApiError::InternalError {
                message: "Sealed secret is truncated".to_string(),
            });
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.cipher_key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| ApiError::InternalError {
                message: "Secret unsealing failed".to_string(),
            })?;

        String::from_utf8(plaintext).map_err(|_| ApiError::InternalError {
            message: "Unsealed secret is not UTF-8".to_string(),
        })
    }

    async fn require_user(&self, user_id: Uuid) -> Result<User, ApiError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound { resource: format!("user:{}", user_id) })
    }
}

/// Backup codes are 8-digit decimal.
const BACKUP_CODE_LEN: usize = 8;

/// SHA-256 digest of a backup code, hex encoded.
fn hash_backup_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn service_for_crypto() -> TwoFactorService {
        // Repository-facing paths are not exercised here; the pool-backed
        // fields are irrelevant to the crypto helpers under test.
        let pool = sqlx::postgres::PgPoolOptions::new().connect_lazy("postgres://test").unwrap();
        TwoFactorService::new(
            UserRepository::new(pool.clone()),
            EphemeralStore::in_memory(),
            AuditLog::new(crate::repository::AuditRepository::new(pool)),
            Arc::new(PasswordHasher::new()),
            [7u8; 32],
            "signet".to_string(),
        )
    }

    #[tokio::test]
    async fn test_seal_open_roundtrip() {
        let service = service_for_crypto();
        let sealed = service.seal("JBSWY3DPEHPK3PXP").unwrap();

        assert_ne!(sealed, "JBSWY3DPEHPK3PXP");
        assert_eq!(service.open(&sealed).unwrap(), "JBSWY3DPEHPK3PXP");
    }

    #[tokio::test]
    async fn test_seal_uses_fresh_nonces() {
        let service = service_for_crypto();
        let a = service.seal("JBSWY3DPEHPK3PXP").unwrap();
        let b = service.seal("JBSWY3DPEHPK3PXP").unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_tampered_seal_rejected() {
        let service = service_for_crypto();
        let sealed = service.seal("JBSWY3DPEHPK3PXP").unwrap();

        let mut raw = BASE64.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = BASE64.encode(raw);

        assert!(service.open(&tampered).is_err());
    }

    #[tokio::test]
    async fn test_wrong_key_cannot_open() {
        let service = service_for_crypto();
        let sealed = service.seal("JBSWY3DPEHPK3PXP").unwrap();

        let mut other = service_for_crypto();
        other.cipher_key = [9u8; 32];
        assert!(other.open(&sealed).is_err());
    }

    #[tokio::test]
    async fn test_check_totp_accepts_current_code() {
        let service = service_for_crypto();
        let raw_secret = Secret::generate_secret().to_bytes().unwrap();

        // Generate the expected code with an identical TOTP instance
        let totp = TOTP::new(
            Algorithm::SHA1,
            6,
            1,
            30,
            raw_secret,
            Some("signet".to_string()),
            "alice@example.com".to_string(),
        )
        .unwrap();
        let sealed = service.seal(&totp.get_secret_base32()).unwrap();
        let code = totp.generate_current().unwrap();

        assert!(service.check_totp(&sealed, "alice@example.com", &code).unwrap());
        assert!(!service.check_totp(&sealed, "alice@example.com", "000000").unwrap());
    }

    #[test]
    fn test_backup_code_hashing_is_stable() {
        assert_eq!(hash_backup_code("12345678"), hash_backup_code("12345678"));
        assert_ne!(hash_backup_code("12345678"), hash_backup_code("12345679"));
        // Digest, not plaintext
        assert_eq!(hash_backup_code("12345678").len(), 64);
    }

    #[test]
    fn test_qr_payload_shape() {
        let payload = format!(
            "otpauth://totp/{issuer}:{email}?secret={secret}&issuer={issuer}",
            issuer = "signet",
            email = "alice@example.com",
            secret = "JBSWY3DPEHPK3PXP",
        );
        assert!(payload.starts_with("otpauth://totp/signet:alice@example.com"));
        assert!(payload.contains("secret=JBSWY3DPEHPK3PXP"));
        assert!(payload.ends_with("issuer=signet"));
    }
}
