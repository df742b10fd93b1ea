//! Chat-completion client.
//!
//! [`ChatModel`] is the seam the chat and assessment features call through.
//! [`OpenAiChat`] talks to `POST /v1/chat/completions`; [`DisabledChat`] is
//! installed when `[chat] provider = "disabled"`.
//!
//! Both OpenAI clients (chat and embeddings) share [`post_openai_with_retry`]:
//! 429 and 5xx responses and network errors are retried with exponential
//! backoff, any other non-success status fails immediately.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::ChatConfig;
use crate::models::ChatMessage;

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;
    fn is_enabled(&self) -> bool {
        true
    }
    /// Produce the assistant reply for a full message list (system first).
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn is_enabled(&self) -> bool {
        false
    }
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String> {
        bail!("Chat provider is disabled")
    }
}

pub struct OpenAiChat {
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: &ChatConfig) -> Result<Self> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });
        let json =
            post_openai_with_retry(&self.client, OPENAI_CHAT_URL, &api_key, &body, self.max_retries)
                .await?;
        parse_chat_response(&json)
    }
}

pub fn create_chat_model(config: &ChatConfig) -> Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledChat)),
        "openai" => Ok(Box::new(OpenAiChat::new(config)?)),
        other => bail!("Unknown chat provider: {}", other),
    }
}

/// POST a JSON body to an OpenAI endpoint with retry/backoff.
pub(crate) async fn post_openai_with_retry(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    tracing::warn!(%status, attempt, "OpenAI request failed, retrying");
                    last_err = Some(anyhow::anyhow!(
                        "OpenAI API error {}: {}",
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("OpenAI API error {}: {}", status, body_text);
            }
            Err(e) => {
                tracing::warn!(error = %e, attempt, "OpenAI request error, retrying");
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("OpenAI request failed after retries")))
}

/// Extract `choices[0].message.content` from a chat-completion response.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))?;
    let content = content.trim();
    if content.is_empty() {
        bail!("OpenAI returned an empty completion");
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_response() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "  Hello there.  " } }]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "Hello there.");
    }

    #[test]
    fn test_parse_chat_response_missing_choices() {
        assert!(parse_chat_response(&serde_json::json!({ "choices": [] })).is_err());
    }

    #[test]
    fn test_parse_chat_response_empty_content() {
        let json = serde_json::json!({ "choices": [{ "message": { "content": "" } }] });
        assert!(parse_chat_response(&json).is_err());
    }

    #[tokio::test]
    async fn test_disabled_chat_errors() {
        assert!(!DisabledChat.is_enabled());
        assert!(DisabledChat.complete(&[]).await.is_err());
    }
}
