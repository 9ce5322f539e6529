//! JSON HTTP server over the [`Pipeline`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version and live session count) |
//! | `POST` | `/query` | Session-aware retrieval + validation |
//! | `POST` | `/validate` | Validation outcome only, no chunks |
//! | `POST` | `/validation/run` | Run the validation harness |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `retrieval_unavailable` (503),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients such as the textbook's chat widget.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::error::PipelineError;
use crate::harness::{Report, ValidationTestCase};
use crate::models::{Query, ValidationOutcome};
use crate::pipeline::{Pipeline, QueryResponse};
use crate::session::spawn_sweeper;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
}

/// Starts the HTTP server.
///
/// Binds to `[server].bind`, starts the session sweeper, and serves until
/// the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config)?);
    let sweeper = spawn_sweeper(pipeline.sessions().clone(), config.sweep_interval());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(addr = %listener.local_addr()?, "server listening");

    let served = axum::serve(listener, router(pipeline)).await;
    sweeper.abort();
    served?;
    Ok(())
}

/// Build the router. Exposed so tests can serve it on an ephemeral port.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/query", post(handle_query))
        .route("/validate", post(handle_validate))
        .route("/validation/run", post(handle_validation_run))
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
    /// Machine-readable error code (e.g., `"bad_request"`).
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

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let (status, code) = match &err {
            PipelineError::EmptyQuery
            | PipelineError::InvalidQuery { .. }
            | PipelineError::InvalidArgument(_)
            | PipelineError::InvalidSessionId(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            PipelineError::RetrievalUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "retrieval_unavailable")
            }
            PipelineError::ConfidenceOutOfRange(_) => {
                error!(stage = err.stage(), "{}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    version: String,
    sessions: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sessions: state.pipeline.sessions().len(),
    })
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    selected_text: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    threshold: Option<f64>,
    /// Reuse the previous turn's selection when `selected_text` is absent.
    #[serde(default)]
    reuse_selection: bool,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let query = Query::new(req.query)?
        .with_selected_text(req.selected_text)?
        .with_session(req.session_id)
        .with_top_k(req.top_k)
        .with_threshold(req.threshold)
        .with_reuse_selection(req.reuse_selection);

    Ok(Json(state.pipeline.query(query).await?))
}

// ============ POST /validate ============

#[derive(Deserialize)]
struct ValidateRequest {
    query: String,
    #[serde(default)]
    selected_text: Option<String>,
}

async fn handle_validate(
    State(state): State<AppState>,
    Json(req): Json<ValidateRequest>,
) -> Result<Json<ValidationOutcome>, AppError> {
    let outcome = state
        .pipeline
        .validate(&req.query, req.selected_text)
        .await?;
    Ok(Json(outcome))
}

// ============ POST /validation/run ============

#[derive(Deserialize, Default)]
#[serde(default)]
struct ValidationRunRequest {
    cases: Option<Vec<ValidationTestCase>>,
    tolerance: Option<f64>,
    top_k: Option<usize>,
    verbose: bool,
}

async fn handle_validation_run(
    State(state): State<AppState>,
    Json(req): Json<ValidationRunRequest>,
) -> Result<Json<Report>, AppError> {
    let report = state
        .pipeline
        .run_validation_suite(req.cases, req.tolerance, req.top_k, req.verbose)
        .await?;
    Ok(Json(report))
}
