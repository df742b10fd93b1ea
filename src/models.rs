//! Persisted records and the JSON shapes they are served as.
//!
//! Rows are decoded with `sqlx::FromRow`. JSON-array columns are typed as
//! [`Json`] so they round-trip through SQLite `TEXT` and serialize
//! transparently. Timestamps are stored as Unix seconds and rendered as
//! RFC 3339 strings.

use serde::{Deserialize, Serialize, Serializer};
use sqlx::types::Json;

/// Format a Unix timestamp as RFC 3339 (UTC).
pub fn ts_to_rfc3339(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

fn serialize_ts<S: Serializer>(ts: &i64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts_to_rfc3339(*ts))
}

pub(crate) fn serialize_opt_ts<S: Serializer>(ts: &Option<i64>, s: S) -> Result<S::Ok, S::Error> {
    match ts {
        Some(ts) => s.serialize_str(&ts_to_rfc3339(*ts)),
        None => s.serialize_none(),
    }
}

/// A prospective customer captured by one of the funnel forms.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub role: Option<String>,
    pub source: String,
    pub interests: Json<Vec<String>>,
    pub message: Option<String>,
    #[serde(serialize_with = "serialize_ts")]
    pub created_at: i64,
    #[serde(serialize_with = "serialize_ts")]
    pub updated_at: i64,
}

/// One questionnaire answer (Likert value 1..=5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub question_id: String,
    pub value: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryScore {
    pub category: String,
    pub label: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: String,
    pub lead_id: Option<String>,
    pub answers: Json<Vec<Answer>>,
    pub category_scores: Json<Vec<CategoryScore>>,
    pub overall_score: f64,
    pub readiness_level: String,
    pub recommendations: Json<Vec<String>>,
    pub summary: String,
    #[serde(serialize_with = "serialize_ts")]
    pub created_at: i64,
}

/// A single chat turn as exchanged with the client and the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub lead_id: Option<String>,
    pub email: Option<String>,
    pub messages: Json<Vec<ChatMessage>>,
    #[serde(serialize_with = "serialize_ts")]
    pub created_at: i64,
    #[serde(serialize_with = "serialize_ts")]
    pub updated_at: i64,
}

/// Uploaded document metadata (body omitted).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub filename: Option<String>,
    pub content_type: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub chunk_count: i64,
    pub uploaded_by: String,
    #[serde(serialize_with = "serialize_ts")]
    pub created_at: i64,
}

/// A chunk of a document's body text.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub document: Document,
    pub body: String,
    pub chunks: Vec<Chunk>,
}

/// A chunk matched by similarity search.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMatch {
    pub chunk_id: String,
    pub document_id: String,
    pub title: String,
    pub chunk_index: i64,
    pub text: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub name: String,
    pub description: String,
    pub content: String,
    #[serde(serialize_with = "serialize_ts")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatAccess {
    pub email: String,
    pub granted_by: String,
    pub message_limit: i64,
    pub messages_used: i64,
    #[serde(serialize_with = "serialize_opt_ts")]
    pub expires_at: Option<i64>,
    pub active: bool,
    #[serde(serialize_with = "serialize_ts")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Branding {
    pub company_name: String,
    pub tagline: String,
    pub logo_url: Option<String>,
    pub primary_color: String,
    pub secondary_color: String,
    pub contact_email: Option<String>,
    #[serde(serialize_with = "serialize_ts")]
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ts_to_rfc3339() {
        assert_eq!(ts_to_rfc3339(0), "1970-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_lead_serializes_camel_case_and_iso_dates() {
        let lead = Lead {
            id: "l1".into(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            company: None,
            phone: None,
            role: None,
            source: "contact".into(),
            interests: Json(vec!["strategy".into()]),
            message: None,
            created_at: 86_400,
            updated_at: 86_400,
        };
        let v = serde_json::to_value(&lead).unwrap();
        assert_eq!(v["createdAt"], "1970-01-02T00:00:00+00:00");
        assert_eq!(v["interests"][0], "strategy");
    }
}
