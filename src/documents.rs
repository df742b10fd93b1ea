//! Document upload and similarity search.
//!
//! ```text
//! bytes ─▶ extract ─▶ dedup (sha256) ─▶ chunk ─▶ embed (batched) ─▶ SQLite
//! ```
//!
//! Chunk vectors are stored as little-endian `f32` BLOBs in
//! `document_chunks.embedding`. Search embeds the query, scores every stored
//! vector with cosine similarity, keeps matches at or above the threshold and
//! returns the best `limit` of them.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::chunk::{chunk_text, sha256_hex};
use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{AppError, FieldError};
use crate::extract::{self, ExtractError};
use crate::models::{Chunk, Document, DocumentDetail, SearchMatch};
use crate::validate::{Checker, Validate};

/// Text upload through the JSON admin endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TextUpload {
    pub title: String,
    pub content: String,
    pub content_type: Option<String>,
}

impl Validate for TextUpload {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut c = Checker::new();
        c.required("title", &self.title, 200);
        if self.content.trim().is_empty() {
            c.add("content", "is required");
        }
        if let Some(ct) = &self.content_type {
            c.one_of(
                "contentType",
                ct,
                &[extract::MIME_TEXT, extract::MIME_MARKDOWN],
            );
        }
        c.finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    pub threshold: Option<f64>,
    pub limit: Option<usize>,
}

impl Validate for SearchRequest {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut c = Checker::new();
        c.required("query", &self.query, 1000);
        if let Some(t) = self.threshold {
            c.range("threshold", t, 0.0, 1.0);
        }
        if let Some(l) = self.limit {
            c.range("limit", l, 1, 50);
        }
        c.finish()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    pub document: Document,
    pub embedded: bool,
}

/// One upload to ingest.
pub struct NewDocument<'a> {
    pub title: &'a str,
    pub filename: Option<&'a str>,
    pub content_type: &'a str,
    pub bytes: &'a [u8],
    pub uploaded_by: &'a str,
}

/// Ingest an upload. Client-side problems (unsupported type, no text,
/// duplicate content) come back as [`AppError`]s; embedding failures are
/// logged and leave the chunks without vectors.
pub async fn ingest_document(
    pool: &SqlitePool,
    config: &Config,
    embedder: &dyn EmbeddingProvider,
    upload: NewDocument<'_>,
) -> Result<UploadResponse, AppError> {
    let body = extract::extract_text_blocking(upload.bytes.to_vec(), upload.content_type.to_string())
        .await
        .map_err(|e| match e {
            ExtractError::UnsupportedContentType(_) | ExtractError::InvalidUtf8 => {
                AppError::bad_request(e.to_string())
            }
            ExtractError::Pdf(_) | ExtractError::Docx(_) | ExtractError::Crashed => {
                AppError::bad_request(format!("could not read document: {}", e))
            }
        })?;
    let body = body.trim().to_string();
    if body.is_empty() {
        return Err(AppError::bad_request("document contains no extractable text"));
    }

    let content_hash = sha256_hex(body.as_bytes());
    let existing: Option<String> =
        sqlx::query_scalar("SELECT id FROM documents WHERE content_hash = ?")
            .bind(&content_hash)
            .fetch_optional(pool)
            .await
            .map_err(anyhow::Error::from)?;
    if let Some(id) = existing {
        return Err(AppError::conflict(format!(
            "document with identical content already exists: {}",
            id
        )));
    }

    let document_id = Uuid::new_v4().to_string();
    let chunks = chunk_text(
        &document_id,
        &body,
        config.chunking.max_tokens,
        config.chunking.overlap_tokens,
    );

    let vectors = if embedder.is_enabled() {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        match embedding::embed_batched(embedder, &texts, config.embedding.batch_size).await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(error = %e, document_id = %document_id, "embedding failed, storing chunks without vectors");
                None
            }
        }
    } else {
        None
    };

    let now = db::now_ts();
    let mut tx = pool.begin().await.map_err(anyhow::Error::from)?;
    sqlx::query(
        r#"
        INSERT INTO documents
            (id, title, filename, content_type, size_bytes, content_hash, body, chunk_count, uploaded_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&document_id)
    .bind(upload.title.trim())
    .bind(upload.filename)
    .bind(upload.content_type)
    .bind(upload.bytes.len() as i64)
    .bind(&content_hash)
    .bind(&body)
    .bind(chunks.len() as i64)
    .bind(upload.uploaded_by)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(anyhow::Error::from)?;

    for (i, chunk) in chunks.iter().enumerate() {
        let blob = vectors
            .as_ref()
            .and_then(|v| v.get(i))
            .map(|v| embedding::vec_to_blob(v));
        sqlx::query(
            r#"
            INSERT INTO document_chunks (id, document_id, chunk_index, text, hash, embedding)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .bind(blob)
        .execute(&mut *tx)
        .await
        .map_err(anyhow::Error::from)?;
    }
    tx.commit().await.map_err(anyhow::Error::from)?;

    tracing::info!(
        document_id = %document_id,
        chunks = chunks.len(),
        embedded = vectors.is_some(),
        "document ingested"
    );

    let document = get_document_meta(pool, &document_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("document vanished after insert: {}", document_id))?;
    Ok(UploadResponse {
        success: true,
        document,
        embedded: vectors.is_some(),
    })
}

const DOCUMENT_COLUMNS: &str = "id, title, filename, content_type, size_bytes, content_hash, chunk_count, uploaded_by, created_at";

pub async fn list_documents(pool: &SqlitePool) -> Result<Vec<Document>> {
    let docs = sqlx::query_as::<_, Document>(&format!(
        "SELECT {} FROM documents ORDER BY created_at DESC, id ASC",
        DOCUMENT_COLUMNS
    ))
    .fetch_all(pool)
    .await?;
    Ok(docs)
}

async fn get_document_meta(pool: &SqlitePool, id: &str) -> Result<Option<Document>> {
    let doc = sqlx::query_as::<_, Document>(&format!(
        "SELECT {} FROM documents WHERE id = ?",
        DOCUMENT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(doc)
}

/// Document with body and chunk texts.
pub async fn get_document(pool: &SqlitePool, id: &str) -> Result<Option<DocumentDetail>> {
    let Some(document) = get_document_meta(pool, id).await? else {
        return Ok(None);
    };
    let body: String = sqlx::query_scalar("SELECT body FROM documents WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    let chunks = sqlx::query_as::<_, Chunk>(
        "SELECT id, document_id, chunk_index, text, hash FROM document_chunks WHERE document_id = ? ORDER BY chunk_index",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;
    Ok(Some(DocumentDetail {
        document,
        body,
        chunks,
    }))
}

/// Delete a document; its chunks are removed by FK cascade.
pub async fn delete_document(pool: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Similarity search over stored chunk vectors.
pub async fn search(
    pool: &SqlitePool,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    threshold: f64,
    limit: usize,
) -> Result<Vec<SearchMatch>> {
    let query_vec = embedding::embed_query(embedder, query).await?;

    let rows = sqlx::query(
        r#"
        SELECT c.id, c.document_id, c.chunk_index, c.text, c.embedding, d.title
        FROM document_chunks c
        JOIN documents d ON d.id = c.document_id
        WHERE c.embedding IS NOT NULL
        "#,
    )
    .fetch_all(pool)
    .await?;

    let candidates = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let similarity =
                embedding::cosine_similarity(&query_vec, &embedding::blob_to_vec(&blob)) as f64;
            SearchMatch {
                chunk_id: row.get("id"),
                document_id: row.get("document_id"),
                title: row.get("title"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                similarity,
            }
        })
        .collect();

    Ok(rank_matches(candidates, threshold, limit))
}

/// Keep matches at or above `threshold`, best first, at most `limit`.
fn rank_matches(mut matches: Vec<SearchMatch>, threshold: f64, limit: usize) -> Vec<SearchMatch> {
    matches.retain(|m| m.similarity >= threshold);
    matches.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.document_id.cmp(&b.document_id))
            .then(a.chunk_index.cmp(&b.chunk_index))
    });
    matches.truncate(limit);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(doc: &str, idx: i64, sim: f64) -> SearchMatch {
        SearchMatch {
            chunk_id: format!("{}-{}", doc, idx),
            document_id: doc.to_string(),
            title: doc.to_string(),
            chunk_index: idx,
            text: String::new(),
            similarity: sim,
        }
    }

    #[test]
    fn test_rank_filters_by_threshold() {
        let ranked = rank_matches(vec![m("a", 0, 0.9), m("b", 0, 0.2), m("c", 0, 0.5)], 0.5, 10);
        let ids: Vec<&str> = ranked.iter().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn test_rank_truncates_to_limit() {
        let ranked = rank_matches(vec![m("a", 0, 0.9), m("b", 0, 0.8), m("c", 0, 0.7)], 0.0, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[1].document_id, "b");
    }

    #[test]
    fn test_rank_ties_are_deterministic() {
        let ranked = rank_matches(vec![m("b", 1, 0.7), m("a", 2, 0.7), m("a", 1, 0.7)], 0.0, 10);
        let keys: Vec<(&str, i64)> = ranked
            .iter()
            .map(|r| (r.document_id.as_str(), r.chunk_index))
            .collect();
        assert_eq!(keys, vec![("a", 1), ("a", 2), ("b", 1)]);
    }

    #[test]
    fn test_search_request_validation() {
        let req = SearchRequest {
            query: "".into(),
            threshold: Some(1.5),
            limit: Some(0),
        };
        assert_eq!(req.validate().unwrap_err().len(), 3);
    }

    #[test]
    fn test_text_upload_rejects_binary_types() {
        let req = TextUpload {
            title: "Deck".into(),
            content: "text".into(),
            content_type: Some(extract::MIME_PDF.into()),
        };
        assert!(req.validate().is_err());
    }
}
