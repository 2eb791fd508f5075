//! # Authentication Primitives
//!
//! Token minting, password hashing, and bearer validation shared by every
//! entry point of the service.
//!
//! ## Module Structure
//!
//! ```text
//! auth/
//! ├── jwt.rs        - TokenMint: issue/verify all five token kinds
//! ├── password.rs   - Argon2id hashing, bounded verify, strength gate
//! └── middleware.rs - Bearer extraction + blacklist-aware validation
//! ```
//!
//! ## Overview
//!
//! | Component | Purpose | See Also |
//! |-----------|---------|----------|
//! | [`TokenMint`] | Sign and verify JWTs (HS256) | [RFC 7519](https://tools.ietf.org/html/rfc7519) |
//! | [`PasswordHasher`] | Argon2id password hashing | [OWASP Password Storage](https://cheatsheetseries.owasp.org/cheatsheets/Password_Storage_Cheat_Sheet.html) |
//! | [`StrengthPolicy`] | Length cap + zxcvbn estimator | [`password`] module docs |
//! | [`authenticate`] | Bearer validation with jti blacklist | [`middleware`] |
//!
//! The pieces compose into the token lifecycle:
//!
//! ```text
//! ┌────────┐  password   ┌──────────┐  mint   ┌───────────┐  bearer  ┌──────────┐
//! │ Client │────────────►│ CredStore│────────►│ TokenMint │─────────►│ Protected│
//! └────────┘   verify    └──────────┘  pair   └───────────┘  decode  │ endpoint │
//!                                                   ▲    + blacklist └──────────┘
//!                                                   │
//!                                            rotation / revocation
//!                                            (jti → blacklist_jti:{jti})
//! ```

pub mod jwt;
pub mod middleware;
pub mod password;

// Re-export main types for convenient access
pub use jwt::{Claims, IssuedPair, TokenKind, TokenMint};
pub use middleware::{authenticate, extract_bearer_token, AuthenticatedUser, Principal};
pub use password::{hash_blocking, verify_bounded, PasswordHasher, StrengthPolicy};
