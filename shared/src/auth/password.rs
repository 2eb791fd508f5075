//! # Password Hashing and Strength Gate
//!
//! Secure password storage using the Argon2id algorithm, plus the strength
//! gate applied before any password is accepted.
//!
//! ## Hashing Parameters
//!
//! | Parameter | Value | Purpose |
//! |-----------|-------|---------|
//! | Memory | 64 MiB | Makes attacks expensive (GPU memory) |
//! | Iterations | 3 | Time cost (slows brute force) |
//! | Parallelism | 4 | CPU lanes |
//! | Output | 32 bytes | Hash length |
//!
//! The output is a self-describing PHC string:
//!
//! ```text
//! $argon2id$v=19$m=65536,t=3,p=4$<salt>$<hash>
//! ```
//!
//! Because the string carries its own parameters, old hashes keep verifying
//! after a policy change; [`PasswordHasher::needs_rehash`] detects them so
//! the login path can transparently upgrade on the next successful
//! verification.
//!
//! ## Strength Gate
//!
//! Before hashing, a candidate password must pass three checks:
//!
//! 1. **Length cap** - at most 4096 bytes. Argon2 cost scales with input
//!    size; the cap closes the oversized-password DoS vector.
//! 2. **Estimator** - `zxcvbn` score must be at least 3 of 4.
//! 3. **Breach corpus** - the k-anonymity lookup (done by the caller, it is
//!    I/O) must report zero occurrences. On lookup *failure* the gate
//!    degrades open with a warning; an unreachable corpus must not block
//!    sign-ups.
//!
//! ## Bounded Verification
//!
//! Verification is CPU-bound. [`verify_bounded`] moves it off the async
//! request thread (`spawn_blocking`) and applies a 5-second ceiling;
//! hitting the ceiling returns the same generic failure as a mismatch.

use crate::errors::ApiError;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Current cost policy: 64 MiB, 3 iterations, 4 lanes.
const MEMORY_COST_KIB: u32 = 64 * 1024;
const TIME_COST: u32 = 3;
const PARALLELISM: u32 = 4;

/// Ceiling for one verification, per the concurrency contract.
const VERIFY_DEADLINE: Duration = Duration::from_secs(5);

/// Candidate passwords above this size are rejected before hashing.
const MAX_PASSWORD_BYTES: usize = 4096;

/// Minimum acceptable zxcvbn score (0-4 scale).
const MIN_ZXCVBN_SCORE: zxcvbn::Score = zxcvbn::Score::Three;

// =============================================================================
// Password Hasher
// =============================================================================

/// Argon2id password hashing service.
///
/// ## Thread Safety
///
/// `Clone + Send + Sync`; each hash operation generates a fresh random
/// salt. Wrap in `Arc` and share across workers.
#[derive(Clone)]
pub struct PasswordHasher {
    argon2: Argon2<'static>,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl PasswordHasher {
    /// Creates a new hasher with the current cost policy.
    pub fn new() -> Self {
        let params = Params::new(MEMORY_COST_KIB, TIME_COST, PARALLELISM, None)
            .expect("Invalid Argon2 params"); // constants are always valid

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        Self { argon2 }
    }

    /// Hashes a password for storage.
    ///
    /// ## Returns
    ///
    /// A PHC-formatted string carrying algorithm, version, parameters, salt
    /// and hash.
    ///
    /// ## Errors
    ///
    /// Returns `ApiError::InternalError` if hashing fails (rare).
    pub fn hash(&self, password: &str) -> Result<String, ApiError> {
        let salt = SaltString::generate(&mut OsRng);

        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ApiError::InternalError {
                message: format!("Password hashing failed: {}", e),
            })
    }

    /// Verifies a password against a stored PHC hash.
    ///
    /// Comparison is constant-time; an attacker cannot learn how close a
    /// guess was.
    ///
    /// ## Returns
    ///
    /// - `Ok(true)` - password matches
    /// - `Ok(false)` - password doesn't match
    /// - `Err(...)` - stored hash is malformed
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, ApiError> {
        let parsed_hash = PasswordHash::new(hash).map_err(|e| ApiError::InternalError {
            message: format!("Invalid password hash format: {}", e),
        })?;

        match self.argon2.verify_password(password.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(ApiError::InternalError {
                message: format!("Password verification failed: {}", e),
            }),
        }
    }

    /// Burns one verification against a throwaway hash.
    ///
    /// Called on the login path when the user does not exist, so "unknown
    /// user" and "wrong password" take the same time (no timing oracle).
    pub fn verify_dummy(&self, password: &str) {
        // The hash of an unguessable sentinel; the result is discarded.
        let _ = self.verify(password, &self.dummy_hash());
    }

    fn dummy_hash(&self) -> String {
        // Computed once per process would be nicer, but login misses are
        // rare and this keeps the type free of interior state.
        self.hash("signet-dummy-password-for-constant-time")
            .unwrap_or_else(|_| String::new())
    }

    /// Reports whether a stored hash was produced under weaker parameters
    /// than the current policy (or a different algorithm entirely).
    ///
    /// A malformed hash reports `true` so the login path rewrites it.
    pub fn needs_rehash(&self, hash: &str) -> bool {
        let parsed = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(_) => return true,
        };

        if parsed.algorithm.as_str() != Algorithm::Argon2id.as_str() {
            return true;
        }

        match Params::try_from(&parsed) {
            Ok(params) => {
                params.m_cost() < MEMORY_COST_KIB
                    || params.t_cost() < TIME_COST
                    || params.p_cost() < PARALLELISM
            }
            Err(_) => true,
        }
    }
}

// Implement Debug manually to avoid exposing internal state
impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHasher").finish_non_exhaustive()
    }
}

// =============================================================================
// Bounded Verification
// =============================================================================

/// Verifies a password off the request thread with a 5-second ceiling.
///
/// On timeout the result is the generic `false` - indistinguishable from a
/// mismatch, as required for enumeration resistance.
pub async fn verify_bounded(
    hasher: Arc<PasswordHasher>,
    password: String,
    hash: String,
) -> Result<bool, ApiError> {
    let handle = tokio::task::spawn_blocking(move || hasher.verify(&password, &hash));

    match tokio::time::timeout(VERIFY_DEADLINE, handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(ApiError::InternalError {
            message: format!("Verification task failed: {}", join_err),
        }),
        Err(_) => {
            warn!("Password verification exceeded its deadline");
            Ok(false)
        }
    }
}

/// Hashes a password off the request thread.
///
/// Hashing shares verification's cost profile, so it gets the same
/// treatment; there is no ceiling because the caller already passed the
/// strength gate's length cap.
pub async fn hash_blocking(
    hasher: Arc<PasswordHasher>,
    password: String,
) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|e| ApiError::InternalError {
            message: format!("Hashing task failed: {}", e),
        })?
}

// =============================================================================
// Strength Gate
// =============================================================================

/// Local (non-I/O) half of the strength gate: length cap + estimator.
///
/// The breach-corpus half is asynchronous and owned by the caller; see the
/// module docs for the degrade-open rule.
pub struct StrengthPolicy;

impl StrengthPolicy {
    /// Checks a candidate password against the local policy.
    ///
    /// ## Errors
    ///
    /// `ApiError::BadRequest` naming the failed requirement. The message is
    /// safe to surface: at this point the caller has proven nothing, but
    /// password-quality feedback is not an enumeration vector.
    pub fn check(password: &str) -> Result<(), ApiError> {
        if password.len() > MAX_PASSWORD_BYTES {
            return Err(ApiError::BadRequest {
                message: "Password is too long".to_string(),
            });
        }

        let estimate = zxcvbn::zxcvbn(password, &[]);
        if estimate.score() < MIN_ZXCVBN_SCORE {
            return Err(ApiError::BadRequest {
                message: "Password is too weak; use a longer or less predictable phrase"
                    .to_string(),
            });
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_correct_password() {
        let hasher = PasswordHasher::new();
        let password = "Corr3ctHorseBatteryStaple!42";

        let hash = hasher.hash(password).unwrap();

        assert_ne!(hash, password);
        assert!(hasher.verify(password, &hash).unwrap());
    }

    #[test]
    fn test_verify_wrong_password() {
        let hasher = PasswordHasher::new();
        let hash = hasher.hash("Corr3ctHorseBatteryStaple!42").unwrap();

        assert!(!hasher.verify("wrong-guess", &hash).unwrap());
    }

    #[test]
    fn test_different_hashes_for_same_password() {
        let hasher = PasswordHasher::new();
        let password = "Corr3ctHorseBatteryStaple!42";

        let hash1 = hasher.hash(password).unwrap();
        let hash2 = hasher.hash(password).unwrap();

        // Unique salts
        assert_ne!(hash1, hash2);
        assert!(hasher.verify(password, &hash1).unwrap());
        assert!(hasher.verify(password, &hash2).unwrap());
    }

    #[test]
    fn test_hash_is_phc_format() {
        let hasher = PasswordHasher::new();
        let hash = hasher.hash("Corr3ctHorseBatteryStaple!42").unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hash.contains("m=65536,t=3,p=4"));
    }

    #[test]
    fn test_current_policy_hash_does_not_need_rehash() {
        let hasher = PasswordHasher::new();
        let hash = hasher.hash("Corr3ctHorseBatteryStaple!42").unwrap();
        assert!(!hasher.needs_rehash(&hash));
    }

    #[test]
    fn test_weaker_parameters_need_rehash() {
        // Hash produced under a cheaper historical policy
        let weak_params = Params::new(16 * 1024, 2, 1, None).unwrap();
        let weak = Argon2::new(Algorithm::Argon2id, Version::V0x13, weak_params);
        let salt = SaltString::generate(&mut OsRng);
        let hash = weak
            .hash_password(b"Corr3ctHorseBatteryStaple!42", &salt)
            .unwrap()
            .to_string();

        let hasher = PasswordHasher::new();
        assert!(hasher.needs_rehash(&hash));
        // Old hash still verifies - the PHC string is self-describing
        assert!(hasher.verify("Corr3ctHorseBatteryStaple!42", &hash).unwrap());
    }

    #[test]
    fn test_malformed_hash_needs_rehash() {
        let hasher = PasswordHasher::new();
        assert!(hasher.needs_rehash("not-a-phc-string"));
    }

    #[test]
    fn test_strength_gate_rejects_weak_passwords() {
        assert!(StrengthPolicy::check("password").is_err());
        assert!(StrengthPolicy::check("12345678").is_err());
        assert!(StrengthPolicy::check("qwerty123").is_err());
    }

    #[test]
    fn test_strength_gate_accepts_strong_passphrase() {
        assert!(StrengthPolicy::check("Corr3ctHorseBatteryStaple!42").is_ok());
    }

    #[test]
    fn test_strength_gate_caps_length() {
        let oversized = "aB3!".repeat(2000); // 8000 bytes
        assert!(StrengthPolicy::check(&oversized).is_err());
    }

    #[tokio::test]
    async fn test_verify_bounded_matches_sync_result() {
        let hasher = Arc::new(PasswordHasher::new());
        let hash = hasher.hash("Corr3ctHorseBatteryStaple!42").unwrap();

        let ok = verify_bounded(
            hasher.clone(),
            "Corr3ctHorseBatteryStaple!42".to_string(),
            hash.clone(),
        )
        .await
        .unwrap();
        assert!(ok);

        let bad = verify_bounded(hasher, "nope".to_string(), hash).await.unwrap();
        assert!(!bad);
    }
}
