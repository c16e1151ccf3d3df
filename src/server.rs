//! HTTP server for the research pipelines.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/copilot/ask` | Simple path: classify, search, rerank |
//! | `POST` | `/copilot/research` | Routed path: simple or full research report |
//! | `POST` | `/gaps/evaluate` | Knowledge-gap evaluation of a resolved ticket |
//! | `POST` | `/gaps/draft` | Draft KB article from a resolved ticket |
//!
//! # Error Contract
//!
//! Pipelines never fail on provider or search trouble; they degrade and
//! say so in `metadata.fallbacks`. The only errors are malformed or
//! empty requests:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

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

use crate::agents::pipeline::{
    AskResponse, DraftResponse, GapResponse, RequestError, ResearchResponse,
};
use crate::agents::{DraftRequest, GapTicket, Pipeline};
use crate::config::Config;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

/// Build the router. Split from [`run_server`] so tests can serve it on
/// their own listener.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/copilot/ask", post(handle_ask))
        .route("/copilot/research", post(handle_research))
        .route("/gaps/evaluate", post(handle_gap))
        .route("/gaps/draft", post(handle_draft))
        .layer(cors)
        .with_state(state)
}

/// Start the server on `[server].bind` and serve until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(config).await?;
    let app = router(AppState {
        pipeline: Arc::new(pipeline),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "research server listening");
    println!("Research server listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
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

impl From<RequestError> for AppError {
    fn from(err: RequestError) -> Self {
        bad_request(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
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

// ============ POST /copilot/* ============

#[derive(Deserialize)]
struct QuestionRequest {
    question: String,
}

async fn handle_ask(
    State(state): State<AppState>,
    body: Result<Json<QuestionRequest>, JsonRejection>,
) -> Result<Json<AskResponse>, AppError> {
    let Json(req) = body?;
    Ok(Json(state.pipeline.ask(&req.question).await?))
}

async fn handle_research(
    State(state): State<AppState>,
    body: Result<Json<QuestionRequest>, JsonRejection>,
) -> Result<Json<ResearchResponse>, AppError> {
    let Json(req) = body?;
    Ok(Json(state.pipeline.research(&req.question).await?))
}

// ============ POST /gaps/* ============

async fn handle_gap(
    State(state): State<AppState>,
    body: Result<Json<GapTicket>, JsonRejection>,
) -> Result<Json<GapResponse>, AppError> {
    let Json(ticket) = body?;
    Ok(Json(state.pipeline.evaluate_gap(ticket).await?))
}

async fn handle_draft(
    State(state): State<AppState>,
    body: Result<Json<DraftRequest>, JsonRejection>,
) -> Result<Json<DraftResponse>, AppError> {
    let Json(request) = body?;
    Ok(Json(state.pipeline.draft_kb(request).await?))
}
