//! Outbound notification email.
//!
//! Lead and assessment notifications go through the [`Mailer`] trait.
//! Callers treat delivery as best effort: a failed send is logged and never
//! fails the request that triggered it.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::config::EmailConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Logs the message and reports success.
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        tracing::debug!(subject = %message.subject, "email disabled, notification dropped");
        Ok(())
    }
}

/// Resend-compatible HTTP mailer. Reads `RESEND_API_KEY` at send time.
pub struct ResendMailer {
    from: String,
    api_url: String,
    client: reqwest::Client,
}

impl ResendMailer {
    pub fn new(config: &EmailConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            from: config.from.clone(),
            api_url: config.api_url.clone(),
            client,
        })
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let api_key = std::env::var("RESEND_API_KEY")
            .map_err(|_| anyhow::anyhow!("RESEND_API_KEY not set"))?;
        let body = serde_json::json!({
            "from": self.from,
            "to": message.to,
            "subject": message.subject,
            "text": message.text,
        });
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Email API error {}: {}", status, body_text);
        }
        Ok(())
    }
}

pub fn create_mailer(config: &EmailConfig) -> Result<Box<dyn Mailer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledMailer)),
        "resend" => Ok(Box::new(ResendMailer::new(config)?)),
        other => bail!("Unknown email provider: {}", other),
    }
}

/// Send to the configured notification address, swallowing failures.
pub async fn notify(mailer: &dyn Mailer, config: &EmailConfig, subject: String, text: String) {
    let Some(to) = config.notify_to.clone() else {
        return;
    };
    let message = EmailMessage {
        to: vec![to],
        subject,
        text,
    };
    if let Err(e) = mailer.send(&message).await {
        tracing::warn!(error = %e, subject = %message.subject, "notification email failed");
    }
}
