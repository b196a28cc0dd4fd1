//! JSON HTTP API over the pipeline, chat and output operations.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/process` | Process a URL or raw HTML (`{"url"}` or `{"html"}`, optional `"mode"`) |
//! | `POST` | `/chat/{page_id}` | Ask a question about a processed page (`{"question"}`) |
//! | `GET`  | `/output/{page_id}` | Repaired HTML (`text/html`) |
//! | `GET`  | `/pages/{page_id}/issues` | Issues of the latest run |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `process_failed` (502),
//! `internal` (500). Processing failures carry a generic message; the detail
//! is logged and stored on the page.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use a11y_harness_core::chat::ChatContext;
use a11y_harness_core::models::ProcessMode;

use crate::ai::create_client;
use crate::chat::{ask, chat_context, ChatResponse};
use crate::config::Config;
use crate::fetch::validate_url;
use crate::output::{fixed_html, page_issues, IssueListing};
use crate::pipeline::{Pipeline, ProcessOutcome, Source};
use crate::sqlite_store::SqliteStore;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pipeline: Pipeline,
    chat: Arc<ChatContext>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, chat: ChatContext) -> Self {
        Self {
            pipeline,
            chat: Arc::new(chat),
        }
    }
}

/// Starts the HTTP server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let ai = create_client(config)?;
    let pipeline = Pipeline::new(config, store.clone(), ai.clone())?;
    let chat = chat_context(config, store, ai);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    println!("a11y server listening on http://{}", config.server.bind);

    serve(listener, AppState::new(pipeline, chat)).await
}

/// Serve the API on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/process", post(handle_process))
        .route("/chat/{page_id}", post(handle_chat))
        .route("/output/{page_id}", get(handle_output))
        .route("/pages/{page_id}/issues", get(handle_issues))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
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

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn process_failed() -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "process_failed".to_string(),
        message: "the page could not be processed".to_string(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: "internal error".to_string(),
    }
}

/// Lookup errors: "not found"/"no output" → 404, anything else → 500.
fn classify_lookup_error(err: anyhow::Error) -> AppError {
    let msg = err.to_string();
    if msg.contains("not found") || msg.starts_with("no output") {
        not_found(msg)
    } else if msg.contains("must not be empty") {
        bad_request(msg)
    } else {
        internal(err)
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

// ============ POST /process ============

#[derive(Debug, Deserialize)]
struct ProcessRequest {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    mode: Option<String>,
}

async fn handle_process(
    State(state): State<AppState>,
    Json(req): Json<ProcessRequest>,
) -> Result<Json<ProcessOutcome>, AppError> {
    let mode = match req.mode.as_deref() {
        Some(mode) => mode
            .parse::<ProcessMode>()
            .map_err(|e| bad_request(e.to_string()))?,
        None => ProcessMode::default(),
    };

    let source = match (req.url, req.html) {
        (Some(url), None) => {
            validate_url(&url).map_err(|e| bad_request(e.to_string()))?;
            Source::Url(url.trim().to_string())
        }
        (None, Some(html)) if !html.trim().is_empty() => Source::Html(html),
        (None, Some(_)) => return Err(bad_request("html must not be empty")),
        _ => return Err(bad_request("provide exactly one of url or html")),
    };

    state
        .pipeline
        .process(source, mode)
        .await
        .map(Json)
        .map_err(|e| {
            error!(error = %format!("{:#}", e), "process failed");
            process_failed()
        })
}

// ============ POST /chat/{page_id} ============

#[derive(Debug, Deserialize)]
struct ChatRequest {
    question: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    Path(page_id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    ask(&state.chat, &page_id, &req.question)
        .await
        .map(Json)
        .map_err(classify_lookup_error)
}

// ============ GET /output/{page_id} ============

async fn handle_output(
    State(state): State<AppState>,
    Path(page_id): Path<String>,
) -> Result<Response, AppError> {
    let html = fixed_html(state.pipeline.store().as_ref(), &page_id)
        .await
        .map_err(classify_lookup_error)?;
    Ok(([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response())
}

// ============ GET /pages/{page_id}/issues ============

async fn handle_issues(
    State(state): State<AppState>,
    Path(page_id): Path<String>,
) -> Result<Json<IssueListing>, AppError> {
    page_issues(state.pipeline.store().as_ref(), &page_id)
        .await
        .map(Json)
        .map_err(classify_lookup_error)
}
