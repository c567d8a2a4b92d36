//! JSON HTTP server over the answer pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer a question with the `full` profile |
//! | `POST` | `/chat/quick` | Answer a question with the `quick` profile |
//! | `GET`  | `/chat/topics` | Topic catalogue with example questions |
//! | `GET`  | `/jurisdictions` | Loaded jurisdictions and chunk counts |
//! | `GET`  | `/stats` | Pipeline and cache counters |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Chat requests take `{ "message": "...", "jurisdiction": "..." }`; the
//! aliases `prompt` and `state` are accepted too. Every well-formed request
//! gets `200` with an answer record, even when the answer is a fallback or a
//! validation message.
//!
//! # Error Contract
//!
//! Bodies that are not valid JSON get:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "..." } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends can
//! call the API directly.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::cache::CacheStats;
use crate::config::{Config, Profile};
use crate::fallback::TopicInfo;
use crate::models::AnswerResult;
use crate::pipeline::{AnswerPipeline, StatsSnapshot};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<AnswerPipeline>,
}

/// Starts the HTTP server on `[server].bind` and runs until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(AnswerPipeline::from_config(config).await?);
    let app = build_router(pipeline);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    println!("DriveSmart server listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

/// The application router, with CORS applied.
pub fn build_router(pipeline: Arc<AnswerPipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/chat/quick", post(handle_chat_quick))
        .route("/chat/topics", get(handle_topics))
        .route("/jurisdictions", get(handle_jurisdictions))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { pipeline })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
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

// ============ POST /chat, /chat/quick ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default, alias = "prompt")]
    message: String,
    #[serde(default, alias = "state")]
    jurisdiction: Option<String>,
}

async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<AnswerResult>, AppError> {
    chat(&state, body, Profile::Full).await
}

async fn handle_chat_quick(
    State(state): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<AnswerResult>, AppError> {
    chat(&state, body, Profile::Quick).await
}

async fn chat(
    state: &AppState,
    body: Result<Json<ChatRequest>, JsonRejection>,
    profile: Profile,
) -> Result<Json<AnswerResult>, AppError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    let result = state
        .pipeline
        .answer(&request.message, request.jurisdiction.as_deref(), profile)
        .await;
    Ok(Json(result))
}

// ============ GET /chat/topics ============

#[derive(Serialize)]
struct TopicsResponse {
    topics: Vec<TopicInfo>,
}

async fn handle_topics(State(state): State<AppState>) -> Json<TopicsResponse> {
    Json(TopicsResponse {
        topics: state.pipeline.fallback().topics(),
    })
}

// ============ GET /jurisdictions ============

#[derive(Serialize)]
struct JurisdictionInfo {
    id: String,
    chunks: usize,
}

#[derive(Serialize)]
struct JurisdictionsResponse {
    default: String,
    jurisdictions: Vec<JurisdictionInfo>,
}

async fn handle_jurisdictions(State(state): State<AppState>) -> Json<JurisdictionsResponse> {
    let jurisdictions = state
        .pipeline
        .corpus()
        .jurisdictions()
        .into_iter()
        .map(|(id, chunks)| JurisdictionInfo { id, chunks })
        .collect();
    Json(JurisdictionsResponse {
        default: state.pipeline.resolve_jurisdiction(None),
        jurisdictions,
    })
}

// ============ GET /stats ============

#[derive(Serialize)]
struct StatsResponse {
    pipeline: StatsSnapshot,
    cache: CacheStats,
}

async fn handle_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        pipeline: state.pipeline.stats(),
        cache: state.pipeline.cache().stats(),
    })
}
