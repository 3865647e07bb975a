//! Mail delivery through an HTTP mail API.
//!
//! The notifier posts a plain-text message to a transactional mail
//! endpoint (Mailtrap-style JSON body with a bearer token).

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::MailerConfig;

use super::Notifier;

/// Mail-API client
pub struct HttpMailer {
    endpoint: String,
    token: String,
    from: String,
    client: reqwest::Client,
}

impl HttpMailer {
    /// Create a mailer client
    pub fn new(endpoint: String, token: String, from: String) -> Self {
        Self {
            endpoint,
            token,
            from,
            client: reqwest::Client::new(),
        }
    }

    /// Create from config
    pub fn from_config(config: &MailerConfig) -> Self {
        Self::new(
            config.endpoint.clone(),
            config.token.clone(),
            config.from.clone(),
        )
    }
}

#[async_trait]
impl Notifier for HttpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({
                "from": { "email": self.from },
                "to": [ { "email": to } ],
                "subject": subject,
                "text": body,
            }))
            .send()
            .await
            .context("Failed to send mail request")?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("mail API returned {}: {}", status, detail.trim());
        }

        Ok(())
    }
}
