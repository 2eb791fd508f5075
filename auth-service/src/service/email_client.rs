//! # Email Client
//!
//! Fire-and-forget dispatcher for the external email service.
//!
//! ## Contract
//!
//! `POST {base_url}/send` with a JSON body:
//!
//! ```json
//! {
//!   "to": "alice@example.com",
//!   "template": "login_code",
//!   "data": { "code": "123456", "expires_in": 300 }
//! }
//! ```
//!
//! Dispatch carries a 10-second deadline and never fails the primary
//! operation: the ephemeral code stays valid whether or not the email made
//! it out, and the user can request a resend. A failed or timed-out
//! dispatch logs a warning.

use shared::config::EmailConfig;
use std::time::Duration;
use tracing::warn;

/// Templates the email service renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTemplate {
    EmailVerification,
    PasswordReset,
    LoginCode,
    TwoFactorCode,
}

impl EmailTemplate {
    /// Wire name of the template.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmailVerification => "email_verification",
            Self::PasswordReset => "password_reset",
            Self::LoginCode => "login_code",
            Self::TwoFactorCode => "2fa_code",
        }
    }
}

/// Async HTTP client for the mailer.
#[derive(Clone)]
pub struct EmailClient {
    http: reqwest::Client,
    base_url: String,
}

impl EmailClient {
    /// Builds a client with the configured dispatch deadline.
    pub fn new(config: &EmailConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Dispatches one email without waiting for the mailer.
    ///
    /// The send runs on a detached task; errors and timeouts are logged
    /// and swallowed.
    pub fn dispatch(&self, to: &str, template: EmailTemplate, data: serde_json::Value) {
        let http = self.http.clone();
        let url = format!("{}/send", self.base_url);
        let body = serde_json::json!({
            "to": to,
            "template": template.as_str(),
            "data": data,
        });
        let to = to.to_string();

        tokio::spawn(async move {
            match http.post(&url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    warn!(
                        to = %to,
                        template = body["template"].as_str().unwrap_or(""),
                        status = %response.status(),
                        "Email service rejected dispatch"
                    );
                }
                Err(e) => {
                    warn!(
                        to = %to,
                        template = body["template"].as_str().unwrap_or(""),
                        error = %e,
                        "Email dispatch failed; code remains valid, resend available"
                    );
                }
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use shared::config::EmailConfig;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_template_wire_names() {
        assert_eq!(EmailTemplate::EmailVerification.as_str(), "email_verification");
        assert_eq!(EmailTemplate::PasswordReset.as_str(), "password_reset");
        assert_eq!(EmailTemplate::LoginCode.as_str(), "login_code");
        assert_eq!(EmailTemplate::TwoFactorCode.as_str(), "2fa_code");
    }

    #[tokio::test]
    async fn test_dispatch_posts_contract_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(body_partial_json(serde_json::json!({
                "to": "alice@example.com",
                "template": "login_code",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = EmailClient::new(&EmailConfig {
            base_url: server.uri(),
            timeout_seconds: 2,
        });

        client.dispatch(
            "alice@example.com",
            EmailTemplate::LoginCode,
            serde_json::json!({ "code": "123456" }),
        );

        // Dispatch is detached; give the task a moment to reach the mock
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        server.verify().await;
    }

    #[tokio::test]
    async fn test_dispatch_survives_mailer_outage() {
        // No server listening: dispatch must not panic or propagate
        let client = EmailClient::new(&EmailConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout_seconds: 1,
        });

        client.dispatch(
            "alice@example.com",
            EmailTemplate::PasswordReset,
            serde_json::json!({}),
        );
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}
