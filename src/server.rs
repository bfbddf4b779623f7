//! HTTP transport over the batch orchestrator.

use crate::{
    aggregator::{ExportFormat, ExtractionResult, PLAIN_TEXT_CONTENT_TYPE, export_one},
    config::Config,
    document::{Document, DocumentId},
    engine::Progress,
    error::Error,
    orchestrator::{BatchOrchestrator, RemoveMode, RunState},
    report::{EntryReport, entry_reports},
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

const HEALTHZ_PATH: &str = "/healthz";
const EXTRACT_PATH: &str = "/extract";
const EXPORT_PLAIN_PATH: &str = "/export/plain-text";
const EXPORT_RICH_PATH: &str = "/export/rich-document";
const DOCUMENTS_PATH: &str = "/documents";
const DOCUMENT_PATH: &str = "/documents/{id}";
const BATCH_PATH: &str = "/batch";
const BATCH_START_PATH: &str = "/batch/start";
const RESULTS_PATH: &str = "/results";
const RESULT_PATH: &str = "/results/{id}";
const RESULTS_EXPORT_PATH: &str = "/results/export";

const UPLOAD_NAME: &str = "upload";

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid listen address `{address}`: {source}")]
    InvalidListenAddr {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server error: {source}")]
    Serve {
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<BatchOrchestrator>,
    cfg: Arc<Config>,
}

impl AppState {
    pub fn new(cfg: &Config, orchestrator: Arc<BatchOrchestrator>) -> Self {
        Self {
            orchestrator,
            cfg: Arc::new(cfg.clone()),
        }
    }
}

/// Error payload `{error, details}` with the matching status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    details: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
}

impl ApiError {
    fn bad_request(error: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: error.to_string(),
            details: None,
        }
    }

    /// Maps a library error; `context` becomes the headline for server-side failures.
    fn from_error(context: &str, err: Error) -> Self {
        let status = match &err {
            Error::UnsupportedKind(_) => StatusCode::BAD_REQUEST,
            Error::AlreadyRunning | Error::EmptyExport => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let error = if status == StatusCode::INTERNAL_SERVER_ERROR {
            context.to_string()
        } else {
            err.kind().to_string()
        };
        Self {
            status,
            error,
            details: Some(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: &self.error,
            details: self.details.as_deref(),
        };
        (self.status, Json(body)).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.cfg.limits.max_document_bytes;

    Router::new()
        .route(HEALTHZ_PATH, get(healthz))
        .route(EXTRACT_PATH, post(extract))
        .route(EXPORT_PLAIN_PATH, get(export_plain))
        .route(EXPORT_RICH_PATH, get(export_rich))
        .route(DOCUMENTS_PATH, get(list_documents).post(submit_document))
        .route(DOCUMENT_PATH, delete(remove_document))
        .route(BATCH_PATH, get(batch_status))
        .route(BATCH_START_PATH, post(start_batch))
        .route(RESULTS_PATH, get(list_results))
        .route(RESULTS_EXPORT_PATH, get(export_results))
        .route(RESULT_PATH, delete(remove_result))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(cfg: &Config, orchestrator: Arc<BatchOrchestrator>) -> Result<(), ServerError> {
    let address = cfg.server.listen_addr.trim().to_string();
    let addr: SocketAddr = address
        .parse()
        .map_err(|source| ServerError::InvalidListenAddr {
            address: address.clone(),
            source,
        })?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { address, source })?;
    if let Ok(local) = listener.local_addr() {
        info!(%local, "batch-scribe listening");
    }

    let app = build_router(AppState::new(cfg, Arc::clone(&orchestrator)));
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await
        .map_err(|source| ServerError::Serve { source })?;

    if let Err(err) = orchestrator.shutdown().await {
        warn!("engine shutdown failed: {err}");
    }
    info!("server shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to capture Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = sigterm => info!("received SIGTERM"),
    }
}

#[derive(Serialize)]
struct HealthzResponse {
    status: &'static str,
}

async fn healthz() -> impl IntoResponse {
    Json(HealthzResponse { status: "ok" })
}

#[derive(Serialize)]
struct TextResponse {
    text: String,
}

fn content_type(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn extract(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TextResponse>, ApiError> {
    if body.is_empty() {
        return Err(ApiError {
            status: StatusCode::BAD_REQUEST,
            error: "No document data received".into(),
            details: Some("request body is empty".into()),
        });
    }

    let document = Document::new(UPLOAD_NAME, content_type(&headers), body.to_vec());
    match state.orchestrator.extract_one(&document).await {
        Ok(text) => Ok(Json(TextResponse { text })),
        Err(err) => {
            warn!("extract failed: {err}");
            Err(ApiError::from_error("Failed to extract text", err))
        }
    }
}

#[derive(Debug, Deserialize)]
struct TextQuery {
    text: Option<String>,
}

fn required_text(query: TextQuery) -> Result<String, ApiError> {
    match query.text {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(ApiError::bad_request("Text is required")),
    }
}

fn attachment(format: ExportFormat, basename: &str, bytes: Vec<u8>) -> Response {
    let disposition = format!("attachment; filename={basename}.{}", format.extension());
    (
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}

async fn export_as(state: AppState, query: TextQuery, format: ExportFormat) -> Response {
    let text = match required_text(query) {
        Ok(text) => text,
        Err(err) => return err.into_response(),
    };
    match export_one(&text, format) {
        Ok(bytes) => attachment(format, &state.cfg.export.single_basename, bytes),
        Err(err) => ApiError::from_error("Failed to export text", err).into_response(),
    }
}

async fn export_plain(State(state): State<AppState>, Query(query): Query<TextQuery>) -> Response {
    export_as(state, query, ExportFormat::PlainText).await
}

async fn export_rich(State(state): State<AppState>, Query(query): Query<TextQuery>) -> Response {
    export_as(state, query, ExportFormat::RichDocument).await
}

#[derive(Debug, Deserialize)]
struct SubmitQuery {
    name: Option<String>,
}

#[derive(Serialize)]
struct SubmitResponse {
    id: DocumentId,
}

async fn submit_document(
    State(state): State<AppState>,
    Query(query): Query<SubmitQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    if body.is_empty() {
        return Err(ApiError::bad_request("No document data received"));
    }
    let name = query.name.unwrap_or_else(|| UPLOAD_NAME.to_string());
    let document = Document::new(name, content_type(&headers), body.to_vec());
    let id = state.orchestrator.submit(document);
    Ok((StatusCode::CREATED, Json(SubmitResponse { id })))
}

async fn list_documents(State(state): State<AppState>) -> Json<Vec<EntryReport>> {
    let entries = state.orchestrator.entries();
    let results = state.orchestrator.results().list();
    Json(entry_reports(&entries, &results))
}

fn parse_id(raw: &str) -> Result<DocumentId, ApiError> {
    raw.parse().map_err(|msg: String| ApiError {
        status: StatusCode::BAD_REQUEST,
        error: "invalid_parameter".into(),
        details: Some(msg),
    })
}

#[derive(Debug, Default, Deserialize)]
struct RemoveQuery {
    #[serde(default)]
    with_result: bool,
}

async fn remove_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<RemoveQuery>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    let mode = if query.with_result {
        RemoveMode::EntryAndResult
    } else {
        RemoveMode::EntryOnly
    };
    state.orchestrator.remove_document(id, mode);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct BatchStatus {
    state: RunState,
    progress: Progress,
}

async fn batch_status(State(state): State<AppState>) -> Json<BatchStatus> {
    Json(BatchStatus {
        state: state.orchestrator.state(),
        progress: state.orchestrator.progress(),
    })
}

async fn start_batch(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<BatchStatus>), ApiError> {
    let run = state
        .orchestrator
        .begin()
        .map_err(|err| ApiError::from_error("Failed to start batch", err))?;

    tokio::spawn(async move {
        if let Err(err) = run.run().await {
            warn!("batch run ended with error: {err}");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(BatchStatus {
            state: state.orchestrator.state(),
            progress: state.orchestrator.progress(),
        }),
    ))
}

async fn list_results(State(state): State<AppState>) -> Json<Vec<ExtractionResult>> {
    Json(state.orchestrator.results().list())
}

async fn remove_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    state.orchestrator.remove_result(id);
    Ok(StatusCode::NO_CONTENT)
}

async fn export_results(State(state): State<AppState>) -> Result<Response, ApiError> {
    let bytes = state
        .orchestrator
        .export_all()
        .map_err(|err| ApiError::from_error("Failed to export results", err))?;
    let disposition = format!(
        "attachment; filename={}",
        state.cfg.export.combined_filename
    );
    Ok((
        [
            (header::CONTENT_TYPE, PLAIN_TEXT_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}
