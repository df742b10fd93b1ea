//! Funnel statistics.
//!
//! Counts of captured leads, assessments, conversations and the document
//! corpus. Printed by `funnel stats` and served at `/api/admin/stats`.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCount {
    pub source: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub leads: i64,
    pub leads_by_source: Vec<SourceCount>,
    pub assessments: i64,
    pub average_score: Option<f64>,
    pub conversations: i64,
    pub documents: i64,
    pub chunks: i64,
    pub embedded_chunks: i64,
    #[serde(serialize_with = "crate::models::serialize_opt_ts")]
    pub last_lead_at: Option<i64>,
}

async fn count(pool: &SqlitePool, table: &str) -> Result<i64> {
    let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await?;
    Ok(n)
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<Stats> {
    let by_source: Vec<SourceCount> = sqlx::query(
        "SELECT source, COUNT(*) AS n FROM leads GROUP BY source ORDER BY n DESC, source ASC",
    )
    .fetch_all(pool)
    .await?
    .iter()
    .map(|row| SourceCount {
        source: row.get("source"),
        count: row.get("n"),
    })
    .collect();

    let average_score: Option<f64> =
        sqlx::query_scalar("SELECT AVG(overall_score) FROM assessments")
            .fetch_one(pool)
            .await?;
    let last_lead_at: Option<i64> = sqlx::query_scalar("SELECT MAX(created_at) FROM leads")
        .fetch_one(pool)
        .await?;
    let embedded_chunks: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks WHERE embedding IS NOT NULL")
            .fetch_one(pool)
            .await?;

    Ok(Stats {
        leads: count(pool, "leads").await?,
        leads_by_source: by_source,
        assessments: count(pool, "assessments").await?,
        average_score: average_score.map(|s| (s * 10.0).round() / 10.0),
        conversations: count(pool, "conversations").await?,
        documents: count(pool, "documents").await?,
        chunks: count(pool, "document_chunks").await?,
        embedded_chunks,
        last_lead_at,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Lead Funnel Stats");
    println!("=================");
    println!();
    println!("  Database:      {}", config.db.path.display());
    println!("  Size:          {}", format_bytes(db_size));
    println!();
    println!(
        "  Leads:         {} (last: {})",
        stats.leads,
        stats
            .last_lead_at
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );
    for s in &stats.leads_by_source {
        println!("    {:<12} {:>6}", s.source, s.count);
    }
    println!(
        "  Assessments:   {} (avg score: {})",
        stats.assessments,
        stats
            .average_score
            .map(|s| format!("{:.1}", s))
            .unwrap_or_else(|| "-".to_string())
    );
    println!("  Conversations: {}", stats.conversations);
    println!();
    println!("  Documents:     {}", stats.documents);
    println!("  Chunks:        {}", stats.chunks);
    println!(
        "  Embedded:      {} / {} ({}%)",
        stats.embedded_chunks,
        stats.chunks,
        if stats.chunks > 0 {
            (stats.embedded_chunks * 100) / stats.chunks
        } else {
            0
        }
    );
    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Relative time for recent timestamps, a date for older ones.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 || delta >= 86400 * 30 {
        return chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| ts.to_string());
    }
    let (n, unit) = match delta {
        d if d < 60 => return "just now".to_string(),
        d if d < 3600 => (d / 60, "min"),
        d if d < 86400 => (d / 3600, "hour"),
        d => (d / 86400, "day"),
    };
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_last_lead_at_serializes_as_rfc3339() {
        let stats = Stats {
            leads: 1,
            leads_by_source: Vec::new(),
            assessments: 0,
            average_score: None,
            conversations: 0,
            documents: 0,
            chunks: 0,
            embedded_chunks: 0,
            last_lead_at: Some(86_400),
        };
        let v = serde_json::to_value(&stats).unwrap();
        assert_eq!(v["lastLeadAt"], "1970-01-02T00:00:00+00:00");

        let empty = Stats {
            last_lead_at: None,
            ..stats
        };
        assert!(serde_json::to_value(&empty).unwrap()["lastLeadAt"].is_null());
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
        assert_eq!(format_ts_relative(0), "1970-01-01 00:00");
    }
}
