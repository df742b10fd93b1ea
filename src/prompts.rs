//! Editable system prompts.
//!
//! Prompts live in the `prompts` table so admins can tune wording without a
//! deploy. Built-in defaults are seeded by the migrations and also serve as a
//! fallback when a row has been removed.

use anyhow::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::db;
use crate::models::Prompt;

pub const CHAT_SYSTEM: &str = "chat_system";
pub const ASSESSMENT_SUMMARY: &str = "assessment_summary";

/// `(name, description, content)` for every built-in prompt.
pub const DEFAULT_PROMPTS: &[(&str, &str, &str)] = &[
    (
        CHAT_SYSTEM,
        "System prompt for the website chat assistant",
        "You are the AI assistant for {{company_name}}, a consulting firm that helps \
         organisations adopt AI responsibly. Answer concisely and professionally. When the \
         visitor asks about services, pricing or next steps, suggest booking a consultation. \
         Use the reference material below when it is relevant and say so when you do not know.\n\n\
         Reference material:\n{{context}}",
    ),
    (
        ASSESSMENT_SUMMARY,
        "Prompt used to summarise an AI readiness assessment",
        "Write a short, encouraging summary (at most 120 words) of an AI readiness assessment \
         for {{name}} at {{company}}. Overall score: {{overall_score}}/100, readiness level: \
         {{readiness_level}}. Category scores: {{category_breakdown}}. Close with the single \
         most valuable next step.",
    ),
];

pub fn default_prompt(name: &str) -> Option<&'static str> {
    DEFAULT_PROMPTS
        .iter()
        .find(|(n, _, _)| *n == name)
        .map(|(_, _, content)| *content)
}

/// Replace `{{key}}` placeholders. Unknown placeholders are left intact.
pub fn render(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match vars.get(key) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Prompt content by name, falling back to the built-in default.
pub async fn get_prompt(pool: &SqlitePool, name: &str) -> Result<String> {
    let content: Option<String> = sqlx::query_scalar("SELECT content FROM prompts WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    match content.or_else(|| default_prompt(name).map(str::to_string)) {
        Some(c) => Ok(c),
        None => anyhow::bail!("prompt not found: {}", name),
    }
}

pub async fn list_prompts(pool: &SqlitePool) -> Result<Vec<Prompt>> {
    let prompts = sqlx::query_as::<_, Prompt>(
        "SELECT name, description, content, updated_at FROM prompts ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    Ok(prompts)
}

pub async fn upsert_prompt(
    pool: &SqlitePool,
    name: &str,
    content: &str,
    description: Option<&str>,
) -> Result<Prompt> {
    let now = db::now_ts();
    sqlx::query(
        r#"
        INSERT INTO prompts (name, description, content, updated_at)
        VALUES (?, COALESCE(?, ''), ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            description = COALESCE(excluded.description, prompts.description),
            content = excluded.content,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(name)
    .bind(description)
    .bind(content)
    .bind(now)
    .execute(pool)
    .await?;

    let prompt = sqlx::query_as::<_, Prompt>(
        "SELECT name, description, content, updated_at FROM prompts WHERE name = ?",
    )
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(prompt)
}

/// Prompt names are lowercase identifiers.
pub fn is_valid_prompt_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
