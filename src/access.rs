//! Chat access grants.
//!
//! When `[chat] require_access` is on, only emails with an active, unexpired
//! grant that still has message quota may use the chat endpoint.

use anyhow::Result;
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::db;
use crate::error::FieldError;
use crate::models::ChatAccess;
use crate::validate::{normalize_email, Checker, Validate};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GrantRequest {
    pub email: String,
    pub message_limit: Option<i64>,
    /// RFC 3339 timestamp.
    pub expires_at: Option<String>,
}

impl Validate for GrantRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut c = Checker::new();
        c.email("email", &self.email);
        if let Some(limit) = self.message_limit {
            c.range("messageLimit", limit, 1, 100_000);
        }
        if let Some(expires) = &self.expires_at {
            if chrono::DateTime::parse_from_rfc3339(expires).is_err() {
                c.add("expiresAt", "must be an RFC 3339 timestamp");
            }
        }
        c.finish()
    }
}

impl GrantRequest {
    pub fn expires_ts(&self) -> Option<i64> {
        self.expires_at
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp())
    }
}

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    Allowed,
    NoGrant,
    Inactive,
    Expired,
    QuotaExhausted,
}

impl AccessStatus {
    pub fn reason(&self) -> &'static str {
        match self {
            AccessStatus::Allowed => "allowed",
            AccessStatus::NoGrant => "no chat access has been granted for this email",
            AccessStatus::Inactive => "chat access has been revoked",
            AccessStatus::Expired => "chat access has expired",
            AccessStatus::QuotaExhausted => "chat message limit reached",
        }
    }
}

/// Create or replace a grant; usage is reset.
pub async fn grant(
    pool: &SqlitePool,
    email: &str,
    message_limit: i64,
    expires_at: Option<i64>,
    granted_by: &str,
) -> Result<ChatAccess> {
    let email = normalize_email(email);
    sqlx::query(
        r#"
        INSERT INTO ai_chat_access (email, granted_by, message_limit, messages_used, expires_at, active, created_at)
        VALUES (?, ?, ?, 0, ?, 1, ?)
        ON CONFLICT(email) DO UPDATE SET
            granted_by = excluded.granted_by,
            message_limit = excluded.message_limit,
            messages_used = 0,
            expires_at = excluded.expires_at,
            active = 1
        "#,
    )
    .bind(&email)
    .bind(granted_by)
    .bind(message_limit)
    .bind(expires_at)
    .bind(db::now_ts())
    .execute(pool)
    .await?;

    let row = sqlx::query_as::<_, ChatAccess>("SELECT * FROM ai_chat_access WHERE email = ?")
        .bind(&email)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

/// Deactivate a grant. Returns false when no grant exists.
pub async fn revoke(pool: &SqlitePool, email: &str) -> Result<bool> {
    let result = sqlx::query("UPDATE ai_chat_access SET active = 0 WHERE email = ?")
        .bind(normalize_email(email))
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<ChatAccess>> {
    let rows = sqlx::query_as::<_, ChatAccess>(
        "SELECT * FROM ai_chat_access ORDER BY created_at DESC, email ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn check(pool: &SqlitePool, email: &str, now: i64) -> Result<AccessStatus> {
    let row = sqlx::query_as::<_, ChatAccess>("SELECT * FROM ai_chat_access WHERE email = ?")
        .bind(normalize_email(email))
        .fetch_optional(pool)
        .await?;
    Ok(status_of(row.as_ref(), now))
}

fn status_of(row: Option<&ChatAccess>, now: i64) -> AccessStatus {
    match row {
        None => AccessStatus::NoGrant,
        Some(a) if !a.active => AccessStatus::Inactive,
        Some(a) if a.expires_at.is_some_and(|exp| exp <= now) => AccessStatus::Expired,
        Some(a) if a.messages_used >= a.message_limit => AccessStatus::QuotaExhausted,
        Some(_) => AccessStatus::Allowed,
    }
}

/// Consume one message of `email`'s quota.
///
/// The guard and the increment are a single statement, so concurrent
/// requests can never push `messages_used` past `message_limit`. Returns
/// false when nothing was consumed; [`check`] then tells why.
pub async fn record_use(pool: &SqlitePool, email: &str, now: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE ai_chat_access SET messages_used = messages_used + 1
        WHERE email = ?
          AND active = 1
          AND (expires_at IS NULL OR expires_at > ?)
          AND messages_used < message_limit
        "#,
    )
    .bind(normalize_email(email))
    .bind(now)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Give back a message consumed by [`record_use`] for a turn that failed.
pub async fn refund_use(pool: &SqlitePool, email: &str) -> Result<()> {
    sqlx::query(
        "UPDATE ai_chat_access SET messages_used = messages_used - 1 WHERE email = ? AND messages_used > 0",
    )
    .bind(normalize_email(email))
    .execute(pool)
    .await?;
    Ok(())
}

/// Consume one message or explain why access is denied.
pub async fn reserve(pool: &SqlitePool, email: &str, now: i64) -> Result<AccessStatus> {
    if record_use(pool, email, now).await? {
        return Ok(AccessStatus::Allowed);
    }
    // Another request may have taken the last message between the two queries.
    match check(pool, email, now).await? {
        AccessStatus::Allowed => Ok(AccessStatus::QuotaExhausted),
        denied => Ok(denied),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(active: bool, used: i64, limit: i64, expires_at: Option<i64>) -> ChatAccess {
        ChatAccess {
            email: "ada@example.com".into(),
            granted_by: "admin".into(),
            message_limit: limit,
            messages_used: used,
            expires_at,
            active,
            created_at: 0,
        }
    }

    #[test]
    fn test_status_of() {
        assert_eq!(status_of(None, 100), AccessStatus::NoGrant);
        assert_eq!(
            status_of(Some(&access(false, 0, 10, None)), 100),
            AccessStatus::Inactive
        );
        assert_eq!(
            status_of(Some(&access(true, 0, 10, Some(100))), 100),
            AccessStatus::Expired
        );
        assert_eq!(
            status_of(Some(&access(true, 10, 10, Some(200))), 100),
            AccessStatus::QuotaExhausted
        );
        assert_eq!(
            status_of(Some(&access(true, 9, 10, None)), 100),
            AccessStatus::Allowed
        );
    }

    #[test]
    fn test_grant_request_validation() {
        let req = GrantRequest {
            email: "ada@example.com".into(),
            message_limit: Some(0),
            expires_at: Some("tomorrow".into()),
        };
        let errors = req.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_expires_ts_parses_rfc3339() {
        let req = GrantRequest {
            email: "ada@example.com".into(),
            message_limit: None,
            expires_at: Some("1970-01-02T00:00:00Z".into()),
        };
        assert_eq!(req.expires_ts(), Some(86_400));
    }
}
