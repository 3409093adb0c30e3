//! Rulegate HTTP Server
//!
//! Exposes the compliance engine over HTTP:
//!
//! - `POST /evaluate` plans a natural-language query and gates the result
//! - `POST /check` gates a caller-supplied command list
//! - `/rules/...` reads and edits the per-document rule records, and runs
//!   extraction from uploaded documents
//!
//! Evaluation always answers `200 OK` with a report; model failures show up
//! as `status: "error"` inside it. Only malformed caller input (bad rule
//! type, unknown document for delete) is rejected with a client error.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use rulegate::rules::validate_document_id;
use rulegate::{
    ComplianceReport, DocumentError, DocumentSource, EngineConfig, ExtractError, Extraction,
    Orchestrator, RuleError, RuleExtractor, RuleItem, RuleKind, RuleSet, RuleStore, StoreError,
    TextCompletion,
};

// ============================================================================
// Server State
// ============================================================================

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    config: Arc<EngineConfig>,
    orchestrator: Arc<Orchestrator>,
    completion: Arc<dyn TextCompletion>,
    documents: Arc<dyn DocumentSource>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Create state for `config` using an explicit completion collaborator.
    pub fn new(config: EngineConfig, completion: Arc<dyn TextCompletion>) -> Self {
        let store = Arc::new(config.rule_store());
        let orchestrator = Arc::new(config.orchestrator(store, completion.clone()));
        let documents: Arc<dyn DocumentSource> = Arc::new(config.documents());
        Self {
            config: Arc::new(config),
            orchestrator,
            completion,
            documents,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create state with the completion backend named in `config`.
    pub fn from_config(config: EngineConfig) -> Self {
        let completion = config.completion.build();
        Self::new(config, completion)
    }

    /// Replace the document source.
    pub fn with_documents(mut self, documents: Arc<dyn DocumentSource>) -> Self {
        self.documents = documents;
        self
    }

    /// Token cancelled on shutdown. In-flight evaluations observe it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The orchestrator serving evaluations.
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    fn store(&self) -> Arc<RuleStore> {
        self.orchestrator.store()
    }

    fn extractor(&self) -> RuleExtractor {
        self.config.extractor(self.store(), self.completion.clone())
    }
}

// ============================================================================
// Wire Types
// ============================================================================

/// Body of `POST /evaluate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    /// Natural-language request to plan.
    pub query: String,
}

/// Body of `POST /check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    /// Commands to gate.
    pub commands: Vec<String>,
}

/// Body of rule add and delete requests.
///
/// `value` is a plain pattern string, or for `required` a single-key object
/// such as `{"network_restart": "admin approval required"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEdit {
    /// `allowed`, `forbidden` or `required`.
    pub rule_type: String,
    /// The rule value.
    #[serde(default)]
    pub value: serde_yaml::Value,
}

/// Response of `GET /rules`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleListing {
    /// Rules per document id.
    pub documents: BTreeMap<String, RuleSet>,
}

/// Response of the extract and reparse endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResponse {
    /// The document the rules came from.
    pub document_id: String,
    /// Parsed and stored rules.
    pub rules: RuleSet,
    /// The model's answer, verbatim.
    pub raw_output: String,
    /// Where the raw answer is recorded.
    pub artifact: String,
}

impl ExtractionResponse {
    fn new(document_id: &str, extraction: Extraction) -> Self {
        Self {
            document_id: document_id.to_string(),
            rules: extraction.rules,
            raw_output: extraction.raw_output,
            artifact: extraction.artifact.path.display().to_string(),
        }
    }
}

// ============================================================================
// Router Creation
// ============================================================================

/// Create the HTTP router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/evaluate", post(evaluate))
        .route("/check", post(check))
        .route("/rules", get(list_rules))
        .route("/rules/merged", get(merged_rules))
        .route(
            "/rules/{id}",
            get(get_rules).post(add_rule).delete(delete_document),
        )
        .route("/rules/{id}/entries", delete(delete_rule))
        .route("/rules/{id}/extract", post(extract_rules))
        .route("/rules/{id}/reparse", post(reparse_rules))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

// ============================================================================
// Handlers
// ============================================================================

async fn banner() -> Json<serde_json::Value> {
    Json(json!({
        "service": "rulegate",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "POST /evaluate",
            "POST /check",
            "GET /rules",
            "GET /rules/merged",
            "GET /rules/{id}",
            "POST /rules/{id}",
            "DELETE /rules/{id}",
            "DELETE /rules/{id}/entries",
            "POST /rules/{id}/extract",
            "POST /rules/{id}/reparse",
        ],
    }))
}

async fn evaluate(
    State(state): State<AppState>,
    Json(request): Json<EvaluateRequest>,
) -> Json<ComplianceReport> {
    let cancel = state.shutdown.child_token();
    let report = state.orchestrator.run_with_cancel(&request.query, cancel).await;
    tracing::info!(query = %request.query, status = %report.status, "evaluation finished");
    Json(report)
}

async fn check(
    State(state): State<AppState>,
    Json(request): Json<CheckRequest>,
) -> Json<ComplianceReport> {
    Json(state.orchestrator.check(&request.commands).await)
}

async fn list_rules(State(state): State<AppState>) -> Json<RuleListing> {
    Json(RuleListing {
        documents: state.store().read_all().await,
    })
}

async fn merged_rules(State(state): State<AppState>) -> Json<RuleSet> {
    Json(state.store().merge_all().await)
}

async fn get_rules(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RuleSet>, ApiError> {
    validate_document_id(&id)?;
    Ok(Json(state.store().read(&id).await))
}

async fn add_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(edit): Json<RuleEdit>,
) -> Result<Json<RuleSet>, ApiError> {
    validate_document_id(&id)?;
    let kind: RuleKind = edit.rule_type.parse()?;
    let store = state.store();
    for item in RuleItem::from_value(&edit.value) {
        store.add_rule(&id, kind, item).await?;
    }
    Ok(Json(store.read(&id).await))
}

async fn delete_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(edit): Json<RuleEdit>,
) -> Result<Json<RuleSet>, ApiError> {
    validate_document_id(&id)?;
    let kind: RuleKind = edit.rule_type.parse()?;
    let store = state.store();
    for item in RuleItem::from_value(&edit.value) {
        store.delete_rule(&id, kind, &item).await?;
    }
    Ok(Json(store.read(&id).await))
}

async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.store().delete_document(&id).await?;
    Ok(Json(json!({ "deleted": id })))
}

async fn extract_rules(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExtractionResponse>, ApiError> {
    let text = state.documents.text(&id).await?;
    let extraction = state.extractor().extract_and_store(&id, &text).await?;
    tracing::info!(document_id = %id, rules = extraction.rules.len(), "rules extracted");
    Ok(Json(ExtractionResponse::new(&id, extraction)))
}

async fn reparse_rules(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExtractionResponse>, ApiError> {
    validate_document_id(&id)?;
    let extraction = state.extractor().reparse(&id).await?;
    Ok(Json(ExtractionResponse::new(&id, extraction)))
}

// ============================================================================
// Error Response Handler
// ============================================================================

/// Errors surfaced at the HTTP boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed caller input.
    #[error("{0}")]
    BadRequest(String),
    /// The target does not exist.
    #[error("{0}")]
    NotFound(String),
    /// The document exists but cannot be read as text.
    #[error("{0}")]
    UnsupportedMedia(String),
    /// The model backend failed.
    #[error("{0}")]
    BadGateway(String),
    /// Anything else.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// The HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RuleError> for ApiError {
    fn from(e: RuleError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidDocumentId(_) | StoreError::Rule(_) => {
                ApiError::BadRequest(e.to_string())
            }
            StoreError::DocumentNotFound(_) => ApiError::NotFound(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<DocumentError> for ApiError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::NotFound(_) => ApiError::NotFound(e.to_string()),
            DocumentError::Unsupported(_) => ApiError::UnsupportedMedia(e.to_string()),
            DocumentError::InvalidId(_) => ApiError::BadRequest(e.to_string()),
            DocumentError::Io(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ExtractError> for ApiError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::EmptyDocument => ApiError::BadRequest(e.to_string()),
            ExtractError::Unavailable(_) => ApiError::BadGateway(e.to_string()),
            ExtractError::NoArtifact(_) => ApiError::NotFound(e.to_string()),
            ExtractError::Store(inner) => inner.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// ============================================================================
// Server Startup
// ============================================================================

/// Serve until the state's shutdown token is cancelled.
pub async fn run(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "rulegate server listening");

    let shutdown = state.shutdown_token();
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
