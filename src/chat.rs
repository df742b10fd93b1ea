//! Website chat assistant.
//!
//! One request carries the full visible history. The handler gates access,
//! pulls retrieval context for the latest user message, renders the system
//! prompt, calls the model and records the exchange as a conversation.

use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::access::{self, AccessStatus};
use crate::branding;
use crate::config::Config;
use crate::db;
use crate::documents;
use crate::embedding::EmbeddingProvider;
use crate::error::{AppError, FieldError};
use crate::leads;
use crate::llm::ChatModel;
use crate::models::{ChatMessage, Conversation, SearchMatch};
use crate::prompts;
use crate::validate::{normalize_email, Checker, Validate};

const MAX_MESSAGES: usize = 50;
const MAX_CONTENT_CHARS: usize = 4000;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default = "default_true")]
    pub use_documents: bool,
}

impl Validate for ChatRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut c = Checker::new();
        if self.messages.is_empty() || self.messages.len() > MAX_MESSAGES {
            c.add(
                "messages",
                format!("must contain between 1 and {} messages", MAX_MESSAGES),
            );
        }
        for (i, m) in self.messages.iter().enumerate() {
            let field = format!("messages[{}]", i);
            if m.role != "user" && m.role != "assistant" {
                c.add(&format!("{}.role", field), "must be one of: user, assistant");
            }
            c.required(&format!("{}.content", field), &m.content, MAX_CONTENT_CHARS);
        }
        if self.messages.last().is_some_and(|m| m.role != "user") {
            c.add("messages", "last message must be from the user");
        }
        if let Some(email) = self.email.as_deref().filter(|e| !e.trim().is_empty()) {
            c.email("email", email);
        }
        if let Some(id) = &self.conversation_id {
            c.max_len("conversationId", id, 64);
        }
        c.finish()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub document_id: String,
    pub title: String,
    pub similarity: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub reply: String,
    pub conversation_id: Option<String>,
    pub sources: Vec<Source>,
}

/// Answer one chat turn.
///
/// With `require_access`, one message of the caller's quota is reserved
/// before the model runs and given back if the turn fails.
pub async fn handle_chat(
    pool: &SqlitePool,
    config: &Config,
    embedder: &dyn EmbeddingProvider,
    model: &dyn ChatModel,
    req: &ChatRequest,
) -> Result<ChatResponse, AppError> {
    let email = req
        .email
        .as_deref()
        .map(normalize_email)
        .filter(|e| !e.is_empty());

    if !config.chat.require_access {
        return answer(pool, config, embedder, model, req, email.as_deref()).await;
    }

    let Some(email) = email.as_deref() else {
        return Err(AppError::access_denied("an email address is required to chat"));
    };
    let status = access::reserve(pool, email, db::now_ts()).await?;
    if status != AccessStatus::Allowed {
        tracing::info!(email = %email, reason = status.reason(), "chat access denied");
        return Err(AppError::access_denied(status.reason()));
    }

    let result = answer(pool, config, embedder, model, req, Some(email)).await;
    if result.is_err() {
        if let Err(e) = access::refund_use(pool, email).await {
            tracing::warn!(error = %e, email = %email, "chat usage refund failed");
        }
    }
    result
}

async fn answer(
    pool: &SqlitePool,
    config: &Config,
    embedder: &dyn EmbeddingProvider,
    model: &dyn ChatModel,
    req: &ChatRequest,
    email: Option<&str>,
) -> Result<ChatResponse, AppError> {
    if !model.is_enabled() {
        return Err(AppError::unavailable("chat is not configured"));
    }

    let question = req
        .messages
        .last()
        .map(|m| m.content.as_str())
        .unwrap_or_default();
    let matches = if req.use_documents && embedder.is_enabled() {
        retrieval_context(pool, config, embedder, question).await
    } else {
        Vec::new()
    };

    let system = system_prompt(pool, &matches).await?;
    let mut messages = Vec::with_capacity(config.chat.history_limit + 1);
    messages.push(ChatMessage::new("system", system));
    messages.extend(truncate_history(&req.messages, config.chat.history_limit).iter().cloned());

    let reply = model.complete(&messages).await.map_err(|e| {
        tracing::error!(error = %e, model = model.model_name(), "chat completion failed");
        AppError::internal()
    })?;

    let mut transcript = req.messages.clone();
    transcript.push(ChatMessage::new("assistant", reply.clone()));
    let conversation_id =
        match save_conversation(pool, req.conversation_id.as_deref(), email, &transcript).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "conversation persistence failed");
                None
            }
        };

    Ok(ChatResponse {
        reply,
        conversation_id,
        sources: sources_of(&matches),
    })
}

async fn retrieval_context(
    pool: &SqlitePool,
    config: &Config,
    embedder: &dyn EmbeddingProvider,
    question: &str,
) -> Vec<SearchMatch> {
    match documents::search(
        pool,
        embedder,
        question,
        config.retrieval.match_threshold,
        config.retrieval.match_count,
    )
    .await
    {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "retrieval context lookup failed");
            Vec::new()
        }
    }
}

async fn system_prompt(pool: &SqlitePool, matches: &[SearchMatch]) -> Result<String> {
    let template = prompts::get_prompt(pool, prompts::CHAT_SYSTEM).await?;
    let company = branding::get_branding(pool).await?.company_name;
    let mut vars = HashMap::new();
    vars.insert("company_name", company);
    vars.insert("context", format_context(matches));
    Ok(prompts::render(&template, &vars))
}

fn format_context(matches: &[SearchMatch]) -> String {
    if matches.is_empty() {
        return "(no reference material)".to_string();
    }
    matches
        .iter()
        .map(|m| format!("[{}]\n{}", m.title, m.text))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

/// Last `limit` messages of the history.
fn truncate_history(messages: &[ChatMessage], limit: usize) -> &[ChatMessage] {
    let start = messages.len().saturating_sub(limit.max(1));
    &messages[start..]
}

/// One source per document, keeping its best similarity.
fn sources_of(matches: &[SearchMatch]) -> Vec<Source> {
    let mut sources: Vec<Source> = Vec::new();
    for m in matches {
        if sources.iter().any(|s| s.document_id == m.document_id) {
            continue;
        }
        sources.push(Source {
            document_id: m.document_id.clone(),
            title: m.title.clone(),
            similarity: m.similarity,
        });
    }
    sources
}

/// Store the transcript, recording the email as a `chat` lead. An unknown
/// `conversation_id` starts a new conversation rather than failing the
/// request.
async fn save_conversation(
    pool: &SqlitePool,
    conversation_id: Option<&str>,
    email: Option<&str>,
    transcript: &[ChatMessage],
) -> Result<String> {
    let now = db::now_ts();
    let lead_id = match email {
        Some(e) => Some(
            leads::upsert_lead(
                pool,
                &leads::LeadInput {
                    email: e.to_string(),
                    source: "chat".to_string(),
                    ..Default::default()
                },
            )
            .await?,
        ),
        None => None,
    };

    if let Some(id) = conversation_id {
        let updated = sqlx::query(
            r#"
            UPDATE conversations SET
                messages = ?,
                email = COALESCE(?, email),
                lead_id = COALESCE(?, lead_id),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(Json(transcript.to_vec()))
        .bind(email)
        .bind(&lead_id)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await?;
        if updated.rows_affected() > 0 {
            return Ok(id.to_string());
        }
    }

    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO conversations (id, lead_id, email, messages, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&lead_id)
    .bind(email)
    .bind(Json(transcript.to_vec()))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn list_conversations(
    pool: &SqlitePool,
    limit: i64,
    offset: i64,
) -> Result<Vec<Conversation>> {
    let rows = sqlx::query_as::<_, Conversation>(
        "SELECT * FROM conversations ORDER BY updated_at DESC, id ASC LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn get_conversation(pool: &SqlitePool, id: &str) -> Result<Option<Conversation>> {
    let row = sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}
