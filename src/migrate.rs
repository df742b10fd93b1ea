use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::prompts::DEFAULT_PROMPTS;

/// Connect, migrate and close. Backs the `funnel init` command.
pub async fn init_database(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    run_migrations(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and seed default rows. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS leads (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            company TEXT,
            phone TEXT,
            role TEXT,
            source TEXT NOT NULL,
            interests TEXT NOT NULL DEFAULT '[]',
            message TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assessments (
            id TEXT PRIMARY KEY,
            lead_id TEXT,
            answers TEXT NOT NULL DEFAULT '[]',
            category_scores TEXT NOT NULL DEFAULT '[]',
            overall_score REAL NOT NULL,
            readiness_level TEXT NOT NULL,
            recommendations TEXT NOT NULL DEFAULT '[]',
            summary TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (lead_id) REFERENCES leads(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            lead_id TEXT,
            email TEXT,
            messages TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            FOREIGN KEY (lead_id) REFERENCES leads(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            filename TEXT,
            content_type TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            content_hash TEXT NOT NULL UNIQUE,
            body TEXT NOT NULL,
            chunk_count INTEGER NOT NULL,
            uploaded_by TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB,
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS prompts (
            name TEXT PRIMARY KEY,
            description TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ai_chat_access (
            email TEXT PRIMARY KEY,
            granted_by TEXT NOT NULL,
            message_limit INTEGER NOT NULL,
            messages_used INTEGER NOT NULL DEFAULT 0,
            expires_at INTEGER,
            active INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS branding (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            company_name TEXT NOT NULL,
            tagline TEXT NOT NULL,
            logo_url TEXT,
            primary_color TEXT NOT NULL,
            secondary_color TEXT NOT NULL,
            contact_email TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON document_chunks(document_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_assessments_lead_id ON assessments(lead_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_leads_created_at ON leads(created_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_conversations_email ON conversations(email)")
        .execute(pool)
        .await?;

    let now = db::now_ts();
    for (name, description, content) in DEFAULT_PROMPTS {
        sqlx::query(
            "INSERT OR IGNORE INTO prompts (name, description, content, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(description)
        .bind(content)
        .bind(now)
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        INSERT OR IGNORE INTO branding
            (id, company_name, tagline, logo_url, primary_color, secondary_color, contact_email, updated_at)
        VALUES (1, 'Acme Consulting', 'Practical AI for growing businesses', NULL, '#1E3A8A', '#F59E0B', NULL, ?)
        "#,
    )
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}
