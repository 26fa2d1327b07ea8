//! Local JSON HTTP API.
//!
//! Exposes the analysis pipeline per session so that a browser front end
//! (or any HTTP client) can run an analysis, fetch its tables and request
//! syntheses without sharing state with other sessions.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/sessions` | Create a session |
//! | `POST`   | `/sessions/{id}/analyze` | Run one analysis and store its result |
//! | `GET`    | `/sessions/{id}/result` | Stored result as JSON |
//! | `GET`    | `/sessions/{id}/tables/{table}` | One flattened table (`?format=csv\|tsv`) |
//! | `POST`   | `/sessions/{id}/synthesis` | Cross-document synthesis for one question |
//! | `DELETE` | `/sessions/{id}` | Drop the session |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "context_overflow", "message": "…" } }
//! ```
//!
//! Codes: `validation_error` (400), `not_found` (404), `corpus_too_large`
//! (413), `context_overflow` (422), `internal` (500), `service_error` (502),
//! `timeout` (504).
//!
//! Request bodies may hold a base64-encoded corpus at the configured size
//! ceiling plus some headroom. A larger body is answered with
//! `corpus_too_large` before it is parsed.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser page served
//! from another port can call the API.

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::analysis::run_analysis;
use crate::completion::{create_service, CompletionService};
use crate::config::Config;
use crate::corpus::{MIME_PDF, MIME_TEXT};
use crate::error::{format_bytes, AnalysisError};
use crate::export::{to_delimited, ExportFormat};
use crate::models::{AnalysisMode, AnalysisRequest, AnalysisResult, ModeSet, SourceDocument};
use crate::progress::NoProgress;
use crate::session::{SessionInfo, SessionStore};
use crate::synthesis::synthesize;
use crate::tables::{table_by_name, TABLE_NAMES};

/// Shared state passed to every handler.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    service: Arc<dyn CompletionService>,
    sessions: SessionStore,
}

impl AppState {
    pub fn new(config: Config, service: Arc<dyn CompletionService>) -> Self {
        Self {
            config: Arc::new(config),
            service,
            sessions: SessionStore::new(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }
}

/// Headroom on top of the base64-encoded corpus for JSON framing, questions
/// and text documents.
const BODY_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Largest request body accepted: a corpus at the size ceiling, base64
/// encoded (4 bytes per 3), plus [`BODY_OVERHEAD_BYTES`].
pub fn body_limit(max_corpus_bytes: u64) -> usize {
    let encoded = max_corpus_bytes.div_ceil(3).saturating_mul(4);
    usize::try_from(encoded.saturating_add(BODY_OVERHEAD_BYTES)).unwrap_or(usize::MAX)
}

/// Builds the router. Separate from [`run_server`] so tests can drive it
/// without binding a socket.
pub fn router(state: AppState) -> Router {
    let limit = body_limit(state.config.limits.max_corpus_bytes);
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sessions", post(handle_create_session))
        .route("/sessions/{id}", axum::routing::delete(handle_delete_session))
        .route("/sessions/{id}/analyze", post(handle_analyze))
        .route("/sessions/{id}/result", get(handle_result))
        .route("/sessions/{id}/tables/{table}", get(handle_table))
        .route("/sessions/{id}/synthesis", post(handle_synthesis))
        .layer(DefaultBodyLimit::max(limit))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP API on `[server].bind` and runs until the process exits.
///
/// Fails before binding when the completion credential is missing.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = create_service(&config.completion)?;
    let bind_addr = config.server.bind.clone();
    let app = router(AppState::new(config.clone(), service));

    println!("qca API listening on http://{}", bind_addr);
    tracing::info!(bind = %bind_addr, "server started");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
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

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        let code = err.code();
        let status = match code {
            "validation_error" => StatusCode::BAD_REQUEST,
            "corpus_too_large" => StatusCode::PAYLOAD_TOO_LARGE,
            "context_overflow" => StatusCode::UNPROCESSABLE_ENTITY,
            "timeout" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "validation_error",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

/// Unknown and malformed ids are both "no such session".
fn session_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| not_found(format!("no session with id: {}", raw)))
}

/// The session's current result together with its generation.
async fn current_result(state: &AppState, id: Uuid) -> Result<(AnalysisResult, u64), AppError> {
    let session = state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| not_found(format!("no session with id: {}", id)))?;
    let generation = session.generation;
    session
        .result
        .map(|result| (result, generation))
        .ok_or_else(|| not_found("session has no analysis result yet"))
}

async fn stored_result(state: &AppState, id: Uuid) -> Result<AnalysisResult, AppError> {
    Ok(current_result(state, id).await?.0)
}

/// Bodies over the router's limit are reported like any oversized corpus.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>, max_corpus_bytes: u64) -> Result<T, AppError> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => Err(AppError {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            code: "corpus_too_large",
            message: format!(
                "request body exceeds {} bytes; the corpus limit is {}",
                body_limit(max_corpus_bytes),
                format_bytes(max_corpus_bytes)
            ),
        }),
        Err(rejection) => Err(bad_request(rejection.body_text())),
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

// ============ POST /sessions, DELETE /sessions/{id} ============

#[derive(Serialize)]
struct SessionCreated {
    session_id: Uuid,
    #[serde(flatten)]
    info: SessionInfo,
}

async fn handle_create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionCreated>) {
    let info = state.sessions.create().await;
    (
        StatusCode::CREATED,
        Json(SessionCreated {
            session_id: info.id,
            info,
        }),
    )
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let id = session_id(&id)?;
    if state.sessions.remove(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("no session with id: {}", id)))
    }
}

// ============ POST /sessions/{id}/analyze ============

/// A document in an analyze request: inline text, or base64 bytes.
#[derive(Deserialize)]
#[serde(untagged)]
enum DocumentBody {
    Binary {
        name: String,
        #[serde(default)]
        mime: Option<String>,
        data_base64: String,
    },
    Text {
        name: String,
        text: String,
    },
}

impl DocumentBody {
    fn into_document(self) -> Result<SourceDocument, AppError> {
        match self {
            DocumentBody::Binary {
                name,
                mime,
                data_base64,
            } => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data_base64.trim())
                    .map_err(|e| bad_request(format!("document `{}`: invalid base64: {}", name, e)))?;
                let mime = mime.unwrap_or_else(|| MIME_PDF.to_string());
                Ok(SourceDocument::binary(name, bytes, mime))
            }
            DocumentBody::Text { name, text } => {
                Ok(SourceDocument::text(name, text, format!("uploaded {}", MIME_TEXT)))
            }
        }
    }
}

#[derive(Deserialize)]
struct AnalyzeBody {
    modes: Vec<AnalysisMode>,
    #[serde(default)]
    phenomenological_question: Option<String>,
    #[serde(default)]
    thematic_question: Option<String>,
    #[serde(default)]
    mapping_questions: Vec<String>,
    #[serde(default)]
    documents: Vec<DocumentBody>,
}

#[derive(Serialize)]
struct AnalyzeResponse {
    session_id: Uuid,
    corpus_bytes: u64,
    elapsed_secs: f64,
    dangling_references: usize,
    result: AnalysisResult,
}

async fn handle_analyze(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<AnalyzeBody>, JsonRejection>,
) -> Result<Json<AnalyzeResponse>, AppError> {
    let id = session_id(&id)?;
    let body = json_body(payload, state.config.limits.max_corpus_bytes)?;
    if !state.sessions.exists(id).await {
        return Err(not_found(format!("no session with id: {}", id)));
    }

    let request = AnalysisRequest {
        modes: body.modes.into_iter().collect::<ModeSet>(),
        phenomenological_question: body.phenomenological_question,
        thematic_question: body.thematic_question,
        mapping_questions: body.mapping_questions,
    };
    let documents = body
        .documents
        .into_iter()
        .map(DocumentBody::into_document)
        .collect::<Result<Vec<_>, _>>()?;

    let outcome = run_analysis(
        state.service.as_ref(),
        &request,
        &documents,
        state.config.limits.max_corpus_bytes,
        state.config.completion.temperature,
        &NoProgress,
    )
    .await?;

    if state.sessions.set_result(id, outcome.result.clone()).await.is_none() {
        return Err(not_found(format!("session {} was deleted during the analysis", id)));
    }

    Ok(Json(AnalyzeResponse {
        session_id: id,
        corpus_bytes: outcome.corpus_bytes,
        elapsed_secs: outcome.elapsed.as_secs_f64(),
        dangling_references: outcome.result.dangling_references().len(),
        result: outcome.result,
    }))
}

// ============ GET /sessions/{id}/result ============

async fn handle_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AnalysisResult>, AppError> {
    let id = session_id(&id)?;
    Ok(Json(stored_result(&state, id).await?))
}

// ============ GET /sessions/{id}/tables/{table} ============

#[derive(Deserialize)]
struct TableQuery {
    format: Option<String>,
}

async fn handle_table(
    State(state): State<AppState>,
    Path((id, table)): Path<(String, String)>,
    Query(query): Query<TableQuery>,
) -> Result<Response, AppError> {
    let id = session_id(&id)?;
    let format = match query.format.as_deref() {
        None => ExportFormat::Csv,
        Some(f) => ExportFormat::parse(f).map_err(|e| bad_request(e.to_string()))?,
    };
    let result = stored_result(&state, id).await?;
    if !TABLE_NAMES.contains(&table.as_str()) {
        return Err(not_found(format!(
            "unknown table `{}`; expected one of: {}",
            table,
            TABLE_NAMES.join(", ")
        )));
    }
    let table = table_by_name(&result, &table)
        .ok_or_else(|| not_found(format!("table `{}` is not part of this result", table)))?;

    let body = to_delimited(&table, format).map_err(|e| internal(e.to_string()))?;
    let content_type = match format {
        ExportFormat::Csv => "text/csv; charset=utf-8",
        ExportFormat::Tsv => "text/tab-separated-values; charset=utf-8",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

// ============ POST /sessions/{id}/synthesis ============

#[derive(Deserialize)]
struct SynthesisBody {
    question: String,
    #[serde(default)]
    refresh: bool,
}

#[derive(Serialize)]
struct SynthesisResponse {
    question: String,
    cached: bool,
    markdown: String,
}

async fn handle_synthesis(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SynthesisBody>,
) -> Result<Json<SynthesisResponse>, AppError> {
    let id = session_id(&id)?;
    let question = body.question.trim().to_string();
    if question.is_empty() {
        return Err(AnalysisError::MissingQuestion { field: "question" }.into());
    }

    let (result, generation) = current_result(&state, id).await?;
    if !body.refresh {
        if let Some(markdown) = state.sessions.cached_synthesis(id, &question).await {
            return Ok(Json(SynthesisResponse {
                question,
                cached: true,
                markdown,
            }));
        }
    }

    let mapping = result.systematic.unwrap_or_default();
    let synthesis = synthesize(
        state.service.as_ref(),
        &mapping,
        &question,
        state.config.completion.temperature,
    )
    .await?;

    let cached = state
        .sessions
        .store_synthesis(id, generation, &question, synthesis.markdown.clone())
        .await;
    if !cached {
        tracing::debug!(session = %id, generation, "result replaced during synthesis; not caching");
    }

    Ok(Json(SynthesisResponse {
        question,
        cached: false,
        markdown: synthesis.markdown,
    }))
}
