//! Lead capture.
//!
//! Every funnel entry point (contact form, assessment, chat) ends up calling
//! [`upsert_lead`], keyed by lower-cased email, so a visitor who fills in
//! several forms stays a single lead with the union of their interests.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;
use crate::error::FieldError;
use crate::models::Lead;
use crate::validate::{clean_opt, normalize_email, Checker, Validate};

pub const SERVICES: &[&str] = &[
    "ai-strategy",
    "data-foundations",
    "automation",
    "training",
    "custom-development",
    "other",
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContactRequest {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub service: Option<String>,
    pub message: String,
}

impl Validate for ContactRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut c = Checker::new();
        c.required("name", &self.name, 100);
        c.email("email", &self.email);
        c.optional("company", self.company.as_deref(), 200);
        c.optional("phone", self.phone.as_deref(), 40);
        if let Some(service) = clean_opt(&self.service) {
            c.one_of("service", &service, SERVICES);
        }
        c.required("message", &self.message, 5000);
        c.finish()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactResponse {
    pub success: bool,
    pub lead_id: String,
}

/// Fields written by one funnel touchpoint.
#[derive(Debug, Clone, Default)]
pub struct LeadInput {
    pub name: String,
    pub email: String,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub role: Option<String>,
    pub source: String,
    pub interest: Option<String>,
    pub message: Option<String>,
}

/// Insert or update the lead for `input.email`; returns the lead id.
///
/// One statement, so concurrent submissions for the same email converge on
/// a single row. Non-empty optional fields overwrite stored values, empty
/// ones keep them. `interest` is appended to the interests array if not
/// already present. `source` keeps the touchpoint that created the lead.
pub async fn upsert_lead(pool: &SqlitePool, input: &LeadInput) -> Result<String> {
    let email = normalize_email(&input.email);
    let now = db::now_ts();
    let name = Some(input.name.trim()).filter(|n| !n.is_empty());
    let interests: Vec<String> = input.interest.iter().cloned().collect();

    let id: String = sqlx::query_scalar(
        r#"
        INSERT INTO leads
            (id, name, email, company, phone, role, source, interests, message, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(email) DO UPDATE SET
            name = COALESCE(?, leads.name),
            company = COALESCE(excluded.company, leads.company),
            phone = COALESCE(excluded.phone, leads.phone),
            role = COALESCE(excluded.role, leads.role),
            interests = CASE
                WHEN json_array_length(excluded.interests) = 0 THEN leads.interests
                WHEN EXISTS (
                    SELECT 1 FROM json_each(leads.interests)
                    WHERE json_each.value = json_extract(excluded.interests, '$[0]')
                ) THEN leads.interests
                ELSE json_insert(leads.interests, '$[#]', json_extract(excluded.interests, '$[0]'))
            END,
            message = COALESCE(excluded.message, leads.message),
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name.map(str::to_string).unwrap_or_else(|| display_name(&email)))
    .bind(&email)
    .bind(&input.company)
    .bind(&input.phone)
    .bind(&input.role)
    .bind(&input.source)
    .bind(Json(&interests))
    .bind(&input.message)
    .bind(now)
    .bind(now)
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Name for a lead first seen without one: the local part of the email.
fn display_name(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

/// Persist a contact form submission.
pub async fn submit_contact(pool: &SqlitePool, req: &ContactRequest) -> Result<String> {
    let input = LeadInput {
        name: req.name.trim().to_string(),
        email: req.email.clone(),
        company: clean_opt(&req.company),
        phone: clean_opt(&req.phone),
        role: None,
        source: "contact".to_string(),
        interest: clean_opt(&req.service),
        message: Some(req.message.trim().to_string()),
    };
    upsert_lead(pool, &input).await
}

pub fn contact_notification(req: &ContactRequest) -> (String, String) {
    let subject = format!("New contact request from {}", req.name.trim());
    let text = format!(
        "Name: {}\nEmail: {}\nCompany: {}\nPhone: {}\nService: {}\n\n{}",
        req.name.trim(),
        normalize_email(&req.email),
        clean_opt(&req.company).unwrap_or_else(|| "-".into()),
        clean_opt(&req.phone).unwrap_or_else(|| "-".into()),
        clean_opt(&req.service).unwrap_or_else(|| "-".into()),
        req.message.trim()
    );
    (subject, text)
}

pub async fn list_leads(pool: &SqlitePool, limit: i64, offset: i64) -> Result<Vec<Lead>> {
    let leads = sqlx::query_as::<_, Lead>(
        "SELECT * FROM leads ORDER BY created_at DESC, id ASC LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(leads)
}

pub async fn get_lead(pool: &SqlitePool, id: &str) -> Result<Option<Lead>> {
    let lead = sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(lead)
}

/// Delete a lead; assessments and conversations go with it via FK cascade.
pub async fn delete_lead(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM leads WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ContactRequest {
        ContactRequest {
            name: "Ada Lovelace".into(),
            email: "ada@example.com".into(),
            company: Some("Analytical Engines".into()),
            phone: None,
            service: Some("ai-strategy".into()),
            message: "We want to explore AI.".into(),
        }
    }

    #[test]
    fn test_valid_contact_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_invalid_contact_reports_each_field() {
        let req = ContactRequest {
            name: "".into(),
            email: "not-an-email".into(),
            service: Some("astrology".into()),
            message: " ".into(),
            ..Default::default()
        };
        let errors = req.validate().unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["name", "email", "service", "message"]);
    }

    #[test]
    fn test_blank_service_is_ignored() {
        let req = ContactRequest {
            service: Some("  ".into()),
            ..valid()
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_display_name_is_local_part() {
        assert_eq!(display_name("ada@example.com"), "ada");
        assert_eq!(display_name("nobody"), "nobody");
    }

    #[test]
    fn test_notification_mentions_lead() {
        let (subject, text) = contact_notification(&valid());
        assert!(subject.contains("Ada Lovelace"));
        assert!(text.contains("ada@example.com"));
        assert!(text.contains("Phone: -"));
    }
}
