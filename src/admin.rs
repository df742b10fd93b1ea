//! Admin CMS routes, mounted under `/api/admin`.
//!
//! Everything except login and logout requires an [`AdminSession`].

use axum::{
    extract::{Multipart, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::access::{self, GrantRequest};
use crate::assessment;
use crate::auth::{self, AdminSession};
use crate::branding::{self, BrandingUpdate};
use crate::chat;
use crate::documents::{self, NewDocument, TextUpload, UploadResponse};
use crate::error::{ApiResult, AppError, FieldError};
use crate::extract;
use crate::leads;
use crate::models::{
    Assessment, Branding, ChatAccess, Conversation, Document, DocumentDetail, Lead, Prompt,
};
use crate::prompts;
use crate::server::AppState;
use crate::stats::{self, Stats};
use crate::validate::{ApiPath, ApiQuery, Checker, ValidJson, Validate};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/verify", get(auth::verify))
        .route("/branding", get(get_branding).put(put_branding))
        .route("/documents", get(list_documents).post(create_text_document))
        .route("/documents/upload", post(upload_document))
        .route("/documents/{id}", get(get_document).delete(delete_document))
        .route("/leads", get(list_leads))
        .route("/leads/{id}", get(get_lead).delete(delete_lead))
        .route("/assessments", get(list_assessments))
        .route("/assessments/{id}", get(get_assessment))
        .route("/conversations", get(list_conversations))
        .route("/conversations/{id}", get(get_conversation))
        .route("/chat-access", get(list_access).post(grant_access))
        .route("/chat-access/{email}", delete(revoke_access))
        .route("/prompts", get(list_prompts))
        .route("/prompts/{name}", put(update_prompt))
        .route("/stats", get(get_stats))
}

#[derive(Serialize)]
struct Deleted {
    success: bool,
}

/// `?limit=&offset=` for list endpoints.
#[derive(Debug, Deserialize)]
#[serde(default)]
struct Page {
    limit: i64,
    offset: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Page {
    fn clamped(&self) -> (i64, i64) {
        (self.limit.clamp(1, 200), self.offset.max(0))
    }
}

// ============ Branding ============

async fn get_branding(_: AdminSession, State(state): State<AppState>) -> ApiResult<Json<Branding>> {
    Ok(Json(branding::get_branding(&state.pool).await?))
}

async fn put_branding(
    session: AdminSession,
    State(state): State<AppState>,
    ValidJson(update): ValidJson<BrandingUpdate>,
) -> ApiResult<Json<Branding>> {
    let updated = branding::update_branding(&state.pool, &update).await?;
    tracing::info!(admin = %session.username, "branding updated");
    Ok(Json(updated))
}

// ============ Documents ============

async fn list_documents(
    _: AdminSession,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<Document>>> {
    Ok(Json(documents::list_documents(&state.pool).await?))
}

async fn create_text_document(
    session: AdminSession,
    State(state): State<AppState>,
    ValidJson(req): ValidJson<TextUpload>,
) -> ApiResult<Json<UploadResponse>> {
    let content_type = req.content_type.as_deref().unwrap_or(extract::MIME_TEXT);
    let resp = documents::ingest_document(
        &state.pool,
        &state.config,
        state.embedder.as_ref(),
        NewDocument {
            title: &req.title,
            filename: None,
            content_type,
            bytes: req.content.as_bytes(),
            uploaded_by: &session.username,
        },
    )
    .await?;
    Ok(Json(resp))
}

/// Multipart upload: a `file` part plus an optional `title` text part.
async fn upload_document(
    session: AdminSession,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let mut title: Option<String> = None;
    let mut file: Option<(Option<String>, Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::rejected(e.status(), e.body_text()))?
    {
        match field.name() {
            Some("title") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::rejected(e.status(), e.body_text()))?;
                title = Some(text.trim().to_string()).filter(|t| !t.is_empty());
            }
            Some("file") => {
                let filename = field.file_name().map(str::to_string);
                let declared = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::rejected(e.status(), e.body_text()))?;
                file = Some((filename, declared, bytes.to_vec()));
            }
            _ => {}
        }
    }

    let Some((filename, declared, bytes)) = file else {
        return Err(AppError::validation(vec![FieldError::new(
            "file",
            "is required",
        )]));
    };
    let title = title
        .or_else(|| filename.clone())
        .unwrap_or_else(|| "Untitled document".to_string());
    let mut c = Checker::new();
    c.max_len("title", &title, 200);
    c.finish().map_err(AppError::validation)?;

    let content_type = extract::detect_content_type(declared.as_deref(), filename.as_deref());
    let resp = documents::ingest_document(
        &state.pool,
        &state.config,
        state.embedder.as_ref(),
        NewDocument {
            title: &title,
            filename: filename.as_deref(),
            content_type: &content_type,
            bytes: &bytes,
            uploaded_by: &session.username,
        },
    )
    .await?;
    Ok(Json(resp))
}

async fn get_document(
    _: AdminSession,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<DocumentDetail>> {
    documents::get_document(&state.pool, &id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("document not found: {}", id)))
}

async fn delete_document(
    session: AdminSession,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Deleted>> {
    if !documents::delete_document(&state.pool, &id).await? {
        return Err(AppError::not_found(format!("document not found: {}", id)));
    }
    tracing::info!(admin = %session.username, document_id = %id, "document deleted");
    Ok(Json(Deleted { success: true }))
}

// ============ Leads ============

async fn list_leads(
    _: AdminSession,
    State(state): State<AppState>,
    ApiQuery(page): ApiQuery<Page>,
) -> ApiResult<Json<Vec<Lead>>> {
    let (limit, offset) = page.clamped();
    Ok(Json(leads::list_leads(&state.pool, limit, offset).await?))
}

async fn get_lead(
    _: AdminSession,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Lead>> {
    leads::get_lead(&state.pool, &id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("lead not found: {}", id)))
}

async fn delete_lead(
    session: AdminSession,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Deleted>> {
    if !leads::delete_lead(&state.pool, &id).await? {
        return Err(AppError::not_found(format!("lead not found: {}", id)));
    }
    tracing::info!(admin = %session.username, lead_id = %id, "lead deleted");
    Ok(Json(Deleted { success: true }))
}

// ============ Assessments / conversations ============

async fn list_assessments(
    _: AdminSession,
    State(state): State<AppState>,
    ApiQuery(page): ApiQuery<Page>,
) -> ApiResult<Json<Vec<Assessment>>> {
    let (limit, offset) = page.clamped();
    Ok(Json(
        assessment::list_assessments(&state.pool, limit, offset).await?,
    ))
}

async fn get_assessment(
    _: AdminSession,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Assessment>> {
    assessment::get_assessment(&state.pool, &id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("assessment not found: {}", id)))
}

async fn list_conversations(
    _: AdminSession,
    State(state): State<AppState>,
    ApiQuery(page): ApiQuery<Page>,
) -> ApiResult<Json<Vec<Conversation>>> {
    let (limit, offset) = page.clamped();
    Ok(Json(
        chat::list_conversations(&state.pool, limit, offset).await?,
    ))
}

async fn get_conversation(
    _: AdminSession,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<Json<Conversation>> {
    chat::get_conversation(&state.pool, &id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("conversation not found: {}", id)))
}

// ============ Chat access ============

async fn list_access(
    _: AdminSession,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ChatAccess>>> {
    Ok(Json(access::list(&state.pool).await?))
}

async fn grant_access(
    session: AdminSession,
    State(state): State<AppState>,
    ValidJson(req): ValidJson<GrantRequest>,
) -> ApiResult<Json<ChatAccess>> {
    let limit = req
        .message_limit
        .unwrap_or(state.config.chat.default_message_limit);
    let granted = access::grant(
        &state.pool,
        &req.email,
        limit,
        req.expires_ts(),
        &session.username,
    )
    .await?;
    tracing::info!(admin = %session.username, email = %granted.email, limit, "chat access granted");
    Ok(Json(granted))
}

async fn revoke_access(
    session: AdminSession,
    State(state): State<AppState>,
    ApiPath(email): ApiPath<String>,
) -> ApiResult<Json<Deleted>> {
    if !access::revoke(&state.pool, &email).await? {
        return Err(AppError::not_found(format!("no chat access for {}", email)));
    }
    tracing::info!(admin = %session.username, email = %email, "chat access revoked");
    Ok(Json(Deleted { success: true }))
}

// ============ Prompts ============

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct PromptUpdate {
    content: String,
    description: Option<String>,
}

impl Validate for PromptUpdate {
    fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut c = Checker::new();
        c.required("content", &self.content, 20_000);
        c.optional("description", self.description.as_deref(), 240);
        c.finish()
    }
}

async fn list_prompts(
    _: AdminSession,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<Prompt>>> {
    Ok(Json(prompts::list_prompts(&state.pool).await?))
}

async fn update_prompt(
    session: AdminSession,
    State(state): State<AppState>,
    ApiPath(name): ApiPath<String>,
    ValidJson(req): ValidJson<PromptUpdate>,
) -> ApiResult<Json<Prompt>> {
    if !prompts::is_valid_prompt_name(&name) {
        return Err(AppError::validation(vec![FieldError::new(
            "name",
            "must be 1-64 lowercase letters, digits or underscores",
        )]));
    }
    let prompt =
        prompts::upsert_prompt(&state.pool, &name, &req.content, req.description.as_deref())
            .await?;
    tracing::info!(admin = %session.username, prompt = %name, "prompt updated");
    Ok(Json(prompt))
}

// ============ Stats ============

async fn get_stats(_: AdminSession, State(state): State<AppState>) -> ApiResult<Json<Stats>> {
    Ok(Json(stats::collect_stats(&state.pool).await?))
}
