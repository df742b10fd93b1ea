//! HTTP API server.
//!
//! Serves the public funnel endpoints (contact form, readiness assessment,
//! chat, document search, branding) and the admin CMS under `/api/admin`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/contact` | Contact form submission |
//! | `GET`  | `/api/assessment/questions` | Questionnaire catalogue |
//! | `POST` | `/api/assessment/analyze` | Score and store an assessment |
//! | `POST` | `/api/chat` | Chat assistant turn |
//! | `POST` | `/api/documents/search` | Similarity search over documents |
//! | `GET`  | `/api/branding` | Public branding settings |
//! | * | `/api/admin/...` | Admin CMS, see [`crate::admin`] |
//!
//! # Error Contract
//!
//! All error responses use the body produced by [`AppError`]:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the marketing site can
//! be served from a different origin than the API.

use axum::{
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::admin;
use crate::assessment::{self, AnalyzeRequest, AnalyzeResponse, QuestionnaireStep};
use crate::auth::AuthManager;
use crate::branding;
use crate::chat::{self, ChatRequest, ChatResponse};
use crate::config::Config;
use crate::db;
use crate::documents::{self, SearchRequest};
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{ApiResult, AppError};
use crate::leads::{self, ContactRequest, ContactResponse};
use crate::llm::{self, ChatModel};
use crate::mail::{self, Mailer};
use crate::migrate;
use crate::models::{Branding, SearchMatch};
use crate::validate::ValidJson;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: sqlx::SqlitePool,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub chat: Arc<dyn ChatModel>,
    pub mailer: Arc<dyn Mailer>,
    /// `None` when no admin credentials are configured.
    pub auth: Option<Arc<AuthManager>>,
}

impl AppState {
    /// Build state with the providers named in the config.
    pub fn from_config(config: Config, pool: sqlx::SqlitePool) -> anyhow::Result<Self> {
        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::from(embedding::create_provider(&config.embedding)?);
        let chat: Arc<dyn ChatModel> = Arc::from(llm::create_chat_model(&config.chat)?);
        let mailer: Arc<dyn Mailer> = Arc::from(mail::create_mailer(&config.email)?);
        let auth = AuthManager::from_config(&config.auth)?.map(Arc::new);
        Ok(Self {
            config: Arc::new(config),
            pool,
            embedder,
            chat,
            mailer,
            auth,
        })
    }
}

/// The full application router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/contact", post(handle_contact))
        .route("/api/assessment/questions", get(handle_questions))
        .route("/api/assessment/analyze", post(handle_analyze))
        .route("/api/chat", post(handle_chat))
        .route("/api/documents/search", post(handle_search))
        .route("/api/branding", get(handle_branding))
        .nest("/api/admin", admin::routes())
        .layer(DefaultBodyLimit::max(state.config.server.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server.
///
/// Connects to the database, applies migrations, builds the providers and
/// serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;

    let state = AppState::from_config(config.clone(), pool)?;
    tracing::info!(
        embedding = state.embedder.model_name(),
        chat = state.chat.model_name(),
        admin_auth = state.auth.is_some(),
        "providers ready"
    );

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/contact ============

async fn handle_contact(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<ContactRequest>,
) -> ApiResult<Json<ContactResponse>> {
    let lead_id = leads::submit_contact(&state.pool, &req).await?;
    tracing::info!(lead_id = %lead_id, "contact form submitted");

    let (subject, text) = leads::contact_notification(&req);
    mail::notify(state.mailer.as_ref(), &state.config.email, subject, text).await;

    Ok(Json(ContactResponse {
        success: true,
        lead_id,
    }))
}

// ============ Assessment ============

#[derive(Serialize)]
struct QuestionsResponse {
    steps: Vec<QuestionnaireStep>,
}

async fn handle_questions() -> Json<QuestionsResponse> {
    Json(QuestionsResponse {
        steps: assessment::questions(),
    })
}

async fn handle_analyze(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<AnalyzeRequest>,
) -> Json<AnalyzeResponse> {
    let resp = assessment::analyze(&state.pool, state.chat.as_ref(), &req).await;
    tracing::info!(
        assessment_id = resp.assessment_id.as_deref().unwrap_or("-"),
        overall = resp.result.overall_score,
        "assessment analyzed"
    );

    let (subject, text) = assessment::assessment_notification(&req, &resp);
    mail::notify(state.mailer.as_ref(), &state.config.email, subject, text).await;

    Json(resp)
}

// ============ POST /api/chat ============

async fn handle_chat(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let resp = chat::handle_chat(
        &state.pool,
        &state.config,
        state.embedder.as_ref(),
        state.chat.as_ref(),
        &req,
    )
    .await?;
    Ok(Json(resp))
}

// ============ POST /api/documents/search ============

#[derive(Serialize)]
struct SearchResponse {
    matches: Vec<SearchMatch>,
}

async fn handle_search(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    if !state.embedder.is_enabled() {
        return Err(AppError::embeddings_disabled());
    }
    let threshold = req
        .threshold
        .unwrap_or(state.config.retrieval.match_threshold);
    let limit = req.limit.unwrap_or(state.config.retrieval.match_count);
    let matches = documents::search(
        &state.pool,
        state.embedder.as_ref(),
        req.query.trim(),
        threshold,
        limit,
    )
    .await?;
    Ok(Json(SearchResponse { matches }))
}

// ============ GET /api/branding ============

async fn handle_branding(State(state): State<AppState>) -> ApiResult<Json<Branding>> {
    Ok(Json(branding::get_branding(&state.pool).await?))
}
