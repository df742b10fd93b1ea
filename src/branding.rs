//! Site branding settings (single row, id = 1).

use anyhow::Result;
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::db;
use crate::error::FieldError;
use crate::models::Branding;
use crate::validate::{is_valid_email, Checker, Validate};

/// Partial update; absent fields keep their stored value. An empty string
/// clears the nullable fields (`logoUrl`, `contactEmail`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrandingUpdate {
    pub company_name: Option<String>,
    pub tagline: Option<String>,
    pub logo_url: Option<String>,
    pub primary_color: Option<String>,
    pub secondary_color: Option<String>,
    pub contact_email: Option<String>,
}

impl Validate for BrandingUpdate {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut c = Checker::new();
        if let Some(name) = &self.company_name {
            c.required("companyName", name, 120);
        }
        c.optional("tagline", self.tagline.as_deref(), 240);
        if let Some(url) = self.logo_url.as_deref().filter(|u| !u.is_empty()) {
            if !is_valid_url(url) {
                c.add("logoUrl", "must start with http://, https:// or /");
            }
            c.max_len("logoUrl", url, 2048);
        }
        for (field, value) in [
            ("primaryColor", &self.primary_color),
            ("secondaryColor", &self.secondary_color),
        ] {
            if let Some(color) = value {
                if !is_hex_color(color) {
                    c.add(field, "must be a #RRGGBB color");
                }
            }
        }
        if let Some(email) = self.contact_email.as_deref().filter(|e| !e.is_empty()) {
            if !is_valid_email(email) {
                c.add("contactEmail", "must be a valid email address");
            }
        }
        c.finish()
    }
}

pub fn is_hex_color(value: &str) -> bool {
    value.len() == 7
        && value.starts_with('#')
        && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

fn is_valid_url(value: &str) -> bool {
    value.starts_with("https://") || value.starts_with("http://") || value.starts_with('/')
}

pub async fn get_branding(pool: &SqlitePool) -> Result<Branding> {
    let branding = sqlx::query_as::<_, Branding>(
        r#"
        SELECT company_name, tagline, logo_url, primary_color, secondary_color, contact_email, updated_at
        FROM branding WHERE id = 1
        "#,
    )
    .fetch_one(pool)
    .await?;
    Ok(branding)
}

pub async fn update_branding(pool: &SqlitePool, update: &BrandingUpdate) -> Result<Branding> {
    let mut current = get_branding(pool).await?;

    if let Some(v) = &update.company_name {
        current.company_name = v.trim().to_string();
    }
    if let Some(v) = &update.tagline {
        current.tagline = v.trim().to_string();
    }
    if let Some(v) = &update.logo_url {
        current.logo_url = Some(v.trim().to_string()).filter(|s| !s.is_empty());
    }
    if let Some(v) = &update.primary_color {
        current.primary_color = v.to_uppercase();
    }
    if let Some(v) = &update.secondary_color {
        current.secondary_color = v.to_uppercase();
    }
    if let Some(v) = &update.contact_email {
        current.contact_email = Some(v.trim().to_lowercase()).filter(|s| !s.is_empty());
    }

    sqlx::query(
        r#"
        UPDATE branding SET
            company_name = ?, tagline = ?, logo_url = ?, primary_color = ?,
            secondary_color = ?, contact_email = ?, updated_at = ?
        WHERE id = 1
        "#,
    )
    .bind(&current.company_name)
    .bind(&current.tagline)
    .bind(&current.logo_url)
    .bind(&current.primary_color)
    .bind(&current.secondary_color)
    .bind(&current.contact_email)
    .bind(db::now_ts())
    .execute(pool)
    .await?;

    get_branding(pool).await
}
