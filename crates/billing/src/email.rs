//! Transactional email for billing notifications
//!
//! Delivery goes through the Resend HTTP API. Without `RESEND_API_KEY` the
//! service stays usable but drops messages with a warning, so local and CI
//! environments never need credentials.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{BillingError, BillingResult};

const DEFAULT_FROM: &str = "Starter SaaS <noreply@startersaas.local>";
const DEFAULT_API_BASE_URL: &str = "https://api.resend.com";

/// Anything that can deliver a plain-text email
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> BillingResult<()>;
}

/// Email configuration
#[derive(Clone)]
pub struct EmailConfig {
    pub api_key: Option<String>,
    pub from: String,
    pub api_base_url: String,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("from", &self.from)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            from: DEFAULT_FROM.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

impl EmailConfig {
    /// Load from environment, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("RESEND_API_KEY")
                .ok()
                .filter(|key| !key.is_empty()),
            from: std::env::var("EMAIL_FROM").unwrap_or_else(|_| DEFAULT_FROM.to_string()),
            api_base_url: std::env::var("EMAIL_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

/// Resend-backed email service
#[derive(Clone, Debug)]
pub struct BillingEmailService {
    config: EmailConfig,
    http: reqwest::Client,
}

impl BillingEmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        let service = Self::new(EmailConfig::from_env());
        if !service.is_enabled() {
            tracing::warn!("RESEND_API_KEY not set - billing emails will not be delivered");
        }
        service
    }

    pub fn is_enabled(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Send a plain-text notification email
    pub async fn send_notification_email(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> BillingResult<()> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            tracing::warn!(to = %to, subject = %subject, "Email disabled, dropping notification");
            return Ok(());
        };

        let url = format!("{}/emails", self.config.api_base_url.trim_end_matches('/'));
        let payload = ResendEmail {
            from: &self.config.from,
            to: [to],
            subject,
            text: body,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BillingError::Email(format!("Failed to call email API: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BillingError::Email(format!(
                "Email API returned {}: {}",
                status, detail
            )));
        }

        tracing::info!(to = %to, subject = %subject, "Notification email sent");
        Ok(())
    }
}

#[async_trait]
impl NotificationSender for BillingEmailService {
    async fn send(&self, to: &str, subject: &str, body: &str) -> BillingResult<()> {
        self.send_notification_email(to, subject, body).await
    }
}
