use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub email: EmailConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default)]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: 0,
        }
    }
}

fn default_max_tokens() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
    #[serde(default = "default_match_count")]
    pub match_count: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            match_count: default_match_count(),
        }
    }
}

fn default_match_threshold() -> f64 {
    0.5
}
fn default_match_count() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_chat_max_tokens")]
    pub max_tokens: u32,
    /// Number of trailing conversation messages forwarded to the model.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default)]
    pub require_access: bool,
    #[serde(default = "default_message_limit")]
    pub default_message_limit: i64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_chat_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_chat_model(),
            temperature: default_temperature(),
            max_tokens: default_chat_max_tokens(),
            history_limit: default_history_limit(),
            require_access: false,
            default_message_limit: default_message_limit(),
            max_retries: default_max_retries(),
            timeout_secs: default_chat_timeout_secs(),
        }
    }
}

impl ChatConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.4
}
fn default_chat_max_tokens() -> u32 {
    800
}
fn default_history_limit() -> usize {
    20
}
fn default_message_limit() -> i64 {
    50
}
fn default_chat_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_admin_username")]
    pub username: String,
    /// Argon2 PHC string. Overridden by `FUNNEL_ADMIN_PASSWORD_HASH`.
    #[serde(default)]
    pub password_hash: Option<String>,
    /// HMAC secret for session tokens. Overridden by `FUNNEL_JWT_SECRET`.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default = "default_session_hours")]
    pub session_hours: i64,
    #[serde(default)]
    pub cookie_secure: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: default_admin_username(),
            password_hash: None,
            jwt_secret: None,
            session_hours: default_session_hours(),
            cookie_secure: false,
        }
    }
}

fn default_admin_username() -> String {
    "admin".to_string()
}
fn default_session_hours() -> i64 {
    24
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmailConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_email_from")]
    pub from: String,
    #[serde(default)]
    pub notify_to: Option<String>,
    #[serde(default = "default_email_api_url")]
    pub api_url: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            from: default_email_from(),
            notify_to: None,
            api_url: default_email_api_url(),
        }
    }
}

fn default_email_from() -> String {
    "noreply@example.com".to_string()
}
fn default_email_api_url() -> String {
    "https://api.resend.com/emails".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config = parse_config(&content)?;
    config.apply_env_overrides();
    Ok(config)
}

/// Parse and validate a TOML configuration document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    if !(0.0..=1.0).contains(&config.retrieval.match_threshold) {
        anyhow::bail!("retrieval.match_threshold must be in [0.0, 1.0]");
    }
    if config.retrieval.match_count < 1 {
        anyhow::bail!("retrieval.match_count must be >= 1");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.chat.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown chat provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.chat.history_limit == 0 {
        anyhow::bail!("chat.history_limit must be > 0");
    }
    if config.chat.default_message_limit < 1 {
        anyhow::bail!("chat.default_message_limit must be >= 1");
    }

    if config.auth.session_hours < 1 {
        anyhow::bail!("auth.session_hours must be >= 1");
    }

    match config.email.provider.as_str() {
        "disabled" | "resend" => {}
        other => anyhow::bail!(
            "Unknown email provider: '{}'. Must be disabled or resend.",
            other
        ),
    }

    Ok(config)
}

impl Config {
    /// Secrets from the environment take precedence over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(hash) = std::env::var("FUNNEL_ADMIN_PASSWORD_HASH") {
            if !hash.trim().is_empty() {
                self.auth.password_hash = Some(hash.trim().to_string());
            }
        }
        if let Ok(secret) = std::env::var("FUNNEL_JWT_SECRET") {
            if !secret.is_empty() {
                self.auth.jwt_secret = Some(secret);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/funnel.sqlite"

[server]
bind = "127.0.0.1:8080"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.chunking.max_tokens, 500);
        assert_eq!(cfg.retrieval.match_count, 5);
        assert!(!cfg.embedding.is_enabled());
        assert!(!cfg.chat.is_enabled());
        assert_eq!(cfg.auth.username, "admin");
        assert_eq!(cfg.auth.session_hours, 24);
        assert_eq!(cfg.server.max_upload_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let content = format!("{}\n[retrieval]\nmatch_threshold = 1.5\n", MINIMAL);
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("match_threshold"));
    }

    #[test]
    fn test_openai_embedding_requires_model_and_dims() {
        let content = format!("{}\n[embedding]\nprovider = \"openai\"\n", MINIMAL);
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn test_unknown_email_provider_rejected() {
        let content = format!("{}\n[email]\nprovider = \"carrier-pigeon\"\n", MINIMAL);
        assert!(parse_config(&content).is_err());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let content = format!(
            "{}\n[chunking]\nmax_tokens = 10\noverlap_tokens = 10\n",
            MINIMAL
        );
        assert!(parse_config(&content).is_err());
    }
}
