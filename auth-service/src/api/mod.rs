//! # API Layer
//!
//! HTTP request/response processing: routes, handlers and DTOs.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Routes (routes.rs)                             │
//! │  URL patterns and HTTP methods, mapped to handlers                      │
//! └───────────────────────────────┬─────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Handlers (handlers/)                              │
//! │  extract → rate-limit → validate → authenticate → service → respond     │
//! └───────────────────────────────┬─────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           DTOs (dto.rs)                                 │
//! │  Request validation + response serialization (the API contract)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Two wire dialects coexist deliberately: the JSON API speaks camelCase,
//! the OAuth endpoints speak the snake_case form/query parameters and
//! RFC-shaped responses that OAuth client libraries expect.

pub mod dto;
pub mod handlers;
pub mod routes;
