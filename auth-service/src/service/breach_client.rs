//! # Breach Lookup Client
//!
//! k-anonymity query against a breached-password corpus.
//!
//! ## How k-Anonymity Works
//!
//! The password never leaves the service. Its SHA-1 digest is split into a
//! 5-character prefix and a 35-character suffix; only the prefix is sent:
//!
//! ```text
//! sha1("hunter2") = F3BBBD66A63D4BF1747940578EC3D0103530E21D
//!                   ├───┤└──────────────────────────────────┘
//!                  prefix              suffix
//!
//! GET {base}/range/F3BBB   →   "BD66A63D4BF1747940578EC3D0103530E21D:24230\n..."
//! ```
//!
//! The response lists every known suffix under that prefix with its breach
//! count; the match is found locally.
//!
//! ## Degradation
//!
//! The lookup carries a 2-second deadline and **degrades open**: a network
//! failure logs a warning and admits the password. A positive match (count
//! greater than zero) rejects it. The gate can be disabled entirely via
//! configuration.

use shared::config::SecurityConfig;
use shared::errors::ApiError;
use sha1::{Digest, Sha1};
use std::time::Duration;
use tracing::warn;

/// Public range API of the Have I Been Pwned corpus.
const DEFAULT_BASE_URL: &str = "https://api.pwnedpasswords.com";

/// Client for the breached-password range API.
#[derive(Clone)]
pub struct BreachClient {
    http: reqwest::Client,
    base_url: String,
    enabled: bool,
}

impl BreachClient {
    /// Builds a client with the configured deadline and switch.
    pub fn new(config: &SecurityConfig) -> Self {
        Self::with_base_url(config, DEFAULT_BASE_URL)
    }

    /// Builds a client against an explicit base URL (tests).
    pub fn with_base_url(config: &SecurityConfig, base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.breach_timeout_seconds))
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            enabled: config.enable_breach_check,
        }
    }

    /// Applies the breach half of the strength gate.
    ///
    /// ## Errors
    ///
    /// `ApiError::BadRequest` when the password appears in the corpus.
    /// Lookup failures admit the password with a warning.
    pub async fn gate(&self, password: &str) -> Result<(), ApiError> {
        if !self.enabled {
            return Ok(());
        }

        match self.breach_count(password).await {
            Some(0) | None => Ok(()),
            Some(_) => Err(ApiError::BadRequest {
                message: "Password appears in known data breaches; choose another".to_string(),
            }),
        }
    }

    /// Queries the corpus. `None` means the lookup failed (degrade open).
    async fn breach_count(&self, password: &str) -> Option<u64> {
        let digest = Sha1::digest(password.as_bytes());
        let digest_hex = hex::encode_upper(digest);
        let (prefix, suffix) = digest_hex.split_at(5);

        let url = format!("{}/range/{}", self.base_url, prefix);
        let response = match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!(status = %response.status(), "Breach lookup returned an error; gate degrades open");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Breach lookup failed; gate degrades open");
                return None;
            }
        };

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Breach lookup body unreadable; gate degrades open");
                return None;
            }
        };

        // Lines are "SUFFIX:COUNT"; absence from the list means zero hits
        for line in body.lines() {
            if let Some((candidate, count)) = line.trim().split_once(':') {
                if candidate.eq_ignore_ascii_case(suffix) {
                    return count.trim().parse::<u64>().ok().or(Some(1));
                }
            }
        }

        Some(0)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(enabled: bool) -> SecurityConfig {
        SecurityConfig {
            encryption_key: hex::encode([0u8; 32]),
            skip_login_code: false,
            enable_breach_check: enabled,
            breach_timeout_seconds: 2,
        }
    }

    /// Suffix of sha1("password") under its 5-char prefix.
    fn suffix_of(password: &str) -> String {
        let digest_hex = hex::encode_upper(Sha1::digest(password.as_bytes()));
        digest_hex[5..].to_string()
    }

    #[tokio::test]
    async fn test_breached_password_rejected() {
        let server = MockServer::start().await;
        let body = format!("{}:42\nAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA:1", suffix_of("hunter2"));
        Mock::given(method("GET"))
            .and(path_regex(r"^/range/[0-9A-F]{5}$"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let client = BreachClient::with_base_url(&config(true), &server.uri());
        assert!(client.gate("hunter2").await.is_err());
    }

    #[tokio::test]
    async fn test_clean_password_admitted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/range/[0-9A-F]{5}$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA:7"),
            )
            .mount(&server)
            .await;

        let client = BreachClient::with_base_url(&config(true), &server.uri());
        assert!(client.gate("Corr3ctHorseBatteryStaple!42").await.is_ok());
    }

    #[tokio::test]
    async fn test_lookup_failure_degrades_open() {
        // Nothing listening: network error, gate must admit
        let client = BreachClient::with_base_url(&config(true), "http://127.0.0.1:1");
        assert!(client.gate("hunter2").await.is_ok());
    }

    #[tokio::test]
    async fn test_server_error_degrades_open() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/range/[0-9A-F]{5}$"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = BreachClient::with_base_url(&config(true), &server.uri());
        assert!(client.gate("hunter2").await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_gate_skips_lookup() {
        // No server at all; disabled gate must not even try
        let client = BreachClient::with_base_url(&config(false), "http://127.0.0.1:1");
        assert!(client.gate("hunter2").await.is_ok());
    }
}
