//! # Request Validation Helpers
//!
//! Utilities for validating incoming request data using the `validator` crate.
//!
//! ## Overview
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`validate_request`] | Validate a struct implementing `Validate` |
//! | [`validators`] | Custom validation functions |
//!
//! ## Validation Flow
//!
//! ```text
//! ┌──────────────┐     ┌───────────────┐     ┌──────────────┐
//! │ JSON Request │────►│ Deserialize   │────►│   Validate   │
//! │              │     │ (serde)       │     │  (validator) │
//! └──────────────┘     └───────────────┘     └──────┬───────┘
//!                                                   │
//!         ┌─────────────────────────────────────────┴───────┐
//!         │                                                 │
//!         ▼                                                 ▼
//! ┌───────────────┐                               ┌─────────────────┐
//! │   Success     │                               │ ValidationError │
//! │ (continue)    │                               │  (400 + details)│
//! └───────────────┘                               └─────────────────┘
//! ```
//!
//! ## Custom Validators
//!
//! | Validator | Purpose |
//! |-----------|---------|
//! | `not_blank` | String is not empty after trimming |
//! | `valid_slug` | Organization slug: `[a-z0-9-]`, 2-50 chars |
//! | `valid_permission` | Permission string: `resource:action`, `[a-z_]` |
//! | `valid_numeric_code` | Six-digit decimal code |

use crate::errors::ApiError;
use validator::Validate;

// =============================================================================
// Core Validation Functions
// =============================================================================

/// Validates a request DTO that implements `Validate`.
///
/// Use it in handlers to validate incoming data before touching the service
/// layer:
///
/// ```rust,ignore
/// async fn register(body: Json<RegisterRequest>) -> Result<impl Responder, ApiError> {
///     validate_request(&body)?;  // Returns early if invalid
///     // Continue with validated data
/// }
/// ```
///
/// ## Errors
///
/// Returns `ApiError::ValidationError` with field-level details.
pub fn validate_request<T: Validate>(data: &T) -> Result<(), ApiError> {
    data.validate().map_err(ApiError::ValidationError)
}

// =============================================================================
// Custom Validators
// =============================================================================

/// Custom validation functions for use with `#[validate(custom)]`.
///
/// These functions follow the validator crate's signature:
/// `fn(&T) -> Result<(), ValidationError>`
pub mod validators {
    use validator::ValidationError;

    /// Validates that a string is not blank (empty or whitespace-only).
    pub fn not_blank(value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::new("blank"));
        }
        Ok(())
    }

    /// Validates an organization slug.
    ///
    /// ## Rules
    ///
    /// - 2 to 50 characters
    /// - Only lowercase letters, digits, and hyphens
    /// - Cannot start or end with hyphen
    ///
    /// ## Examples
    ///
    /// - `"acme"` ✓
    /// - `"acme-eu-west"` ✓
    /// - `"a"` ✗ (too short)
    /// - `"Acme"` ✗ (uppercase)
    /// - `"-acme"` ✗ (leading hyphen)
    pub fn valid_slug(value: &str) -> Result<(), ValidationError> {
        if value.len() < 2 || value.len() > 50 {
            return Err(ValidationError::new("invalid_slug"));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ValidationError::new("invalid_slug"));
        }
        if value.starts_with('-') || value.ends_with('-') {
            return Err(ValidationError::new("invalid_slug"));
        }
        Ok(())
    }

    /// Validates a permission string in `resource:action` form.
    ///
    /// Both halves are non-empty runs of `[a-z_]`. This is the same check
    /// the policy decision point applies before resolving a decision.
    ///
    /// ## Examples
    ///
    /// - `"image:write"` ✓
    /// - `"billing:read_only"` ✓
    /// - `"image"` ✗ (no action)
    /// - `"Image:Write"` ✗ (uppercase)
    /// - `"image:write:all"` ✗ (extra segment)
    pub fn valid_permission(value: &str) -> Result<(), ValidationError> {
        let mut parts = value.split(':');
        let (resource, action) = match (parts.next(), parts.next(), parts.next()) {
            (Some(r), Some(a), None) => (r, a),
            _ => return Err(ValidationError::new("invalid_permission")),
        };
        let well_formed =
            |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_lowercase() || c == '_');
        if !well_formed(resource) || !well_formed(action) {
            return Err(ValidationError::new("invalid_permission"));
        }
        Ok(())
    }

    /// Validates a six-digit decimal code (login, verification, reset codes).
    pub fn valid_numeric_code(value: &str) -> Result<(), ValidationError> {
        if value.len() != 6 || !value.chars().all(|c| c.is_ascii_digit()) {
            return Err(ValidationError::new("invalid_code"));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::validators::*;

    #[test]
    fn test_not_blank_valid() {
        assert!(not_blank("hello").is_ok());
        assert!(not_blank("  hello  ").is_ok());
    }

    #[test]
    fn test_not_blank_invalid() {
        assert!(not_blank("").is_err());
        assert!(not_blank("   ").is_err());
        assert!(not_blank("\t\n").is_err());
    }

    #[test]
    fn test_valid_slug_accepts_well_formed() {
        assert!(valid_slug("acme").is_ok());
        assert!(valid_slug("acme-eu-west-1").is_ok());
        assert!(valid_slug("a2").is_ok());
    }

    #[test]
    fn test_valid_slug_rejects_length() {
        assert!(valid_slug("a").is_err());
        assert!(valid_slug(&"a".repeat(51)).is_err());
    }

    #[test]
    fn test_valid_slug_rejects_characters() {
        assert!(valid_slug("Acme").is_err());
        assert!(valid_slug("acme corp").is_err());
        assert!(valid_slug("acme_corp").is_err());
        assert!(valid_slug("-acme").is_err());
        assert!(valid_slug("acme-").is_err());
    }

    #[test]
    fn test_valid_permission_accepts_resource_action() {
        assert!(valid_permission("image:write").is_ok());
        assert!(valid_permission("billing:read_only").is_ok());
        assert!(valid_permission("group_admin:manage").is_ok());
    }

    #[test]
    fn test_valid_permission_rejects_malformed() {
        assert!(valid_permission("image").is_err());
        assert!(valid_permission("image:").is_err());
        assert!(valid_permission(":write").is_err());
        assert!(valid_permission("image:write:all").is_err());
        assert!(valid_permission("Image:Write").is_err());
        assert!(valid_permission("image:write2").is_err());
        assert!(valid_permission("image-x:write").is_err());
    }

    #[test]
    fn test_valid_numeric_code() {
        assert!(valid_numeric_code("123456").is_ok());
        assert!(valid_numeric_code("000000").is_ok());
        assert!(valid_numeric_code("12345").is_err());
        assert!(valid_numeric_code("1234567").is_err());
        assert!(valid_numeric_code("12345a").is_err());
    }
}
