//! Admin HTTP API.
//!
//! Thin JSON layer over [`SyncService`]. Every endpoint except `/health`
//! answers with an [`ActionResult`] body:
//!
//! ```json
//! { "success": true, "data": { ... } }
//! { "success": false, "error": "source acme/widgets is already registered for this team", "code": "duplicate_source" }
//! ```
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Health check (returns version) |
//! | `GET` | `/profiles` | Embedding profile catalog |
//! | `GET` | `/teams/{team}/sources` | Sources of a team with their status rows |
//! | `POST` | `/sources/repository` | Register a GitHub repository |
//! | `POST` | `/sources/documents` | Register a document collection |
//! | `GET` | `/sources/{id}` | One source with its status rows |
//! | `DELETE` | `/sources/{id}` | Deregister a source (idempotent) |
//! | `PUT` | `/sources/{id}/profiles` | Replace the enabled embedding profiles |
//! | `PUT` | `/sources/{id}/content-types` | Enable / disable content types |
//! | `POST` | `/sources/{id}/ingest` | Manual trigger (`?scheduled=true` for the scheduler) |
//! | `GET` | `/sources/{id}/diagnosis?identity=` | Look for an installation that restores access |
//! | `POST` | `/sources/{id}/diagnosis/fix` | Rebind to the chosen installation |
//! | `GET` | `/sources/{id}/documents` | Documents of a collection |
//! | `POST` | `/sources/{id}/documents` | Add a document |
//! | `DELETE` | `/documents/{id}` | Remove a document (idempotent) |
//! | `POST` | `/documents/{id}/result` | Worker callback for one document |
//! | `GET` | `/jobs?limit=` | Queued jobs, without taking them |
//! | `POST` | `/jobs/take?limit=` | Worker pickup: remove and return queued jobs |
//! | `POST` | `/results` | Worker callback for one status row |
//!
//! # Status codes
//!
//! The body is authoritative; the HTTP status mirrors the error code:
//! `not_found` (404), `duplicate_source` (409), `access_denied` (403),
//! `upstream_error` (502), `internal` (500), any other error (400).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for the admin UI.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use vector_sync_core::fanout::ContentTypeToggle;
use vector_sync_core::models::{
    CredentialScope, DocumentSource, IngestOutcome, QueuedJob, StatusKey,
};
use vector_sync_core::profiles::{EmbeddingProfile, CATALOG};
use vector_sync_core::reconciler::Diagnosis;
use vector_sync_core::response::ActionResult;
use vector_sync_core::service::{
    RegisterDocumentCollection, RegisterRepository, ReportAck, SourceView, TriggerOutcome,
};
use vector_sync_core::{SyncError, SyncService};

use crate::app;
use crate::config::Config;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    service: Arc<SyncService>,
}

/// Start the admin API with production collaborators.
///
/// Binds to `[server].bind` and runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = app::build_service(config).await?;
    run_server_with_service(config, service).await
}

/// Start the admin API on an already assembled service.
pub async fn run_server_with_service(
    config: &Config,
    service: Arc<SyncService>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "Admin API listening");
    println!("Admin API listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router. Exposed for embedding in a larger axum app.
pub fn router(service: Arc<SyncService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/profiles", get(handle_profiles))
        .route("/teams/{team}/sources", get(handle_list_sources))
        .route("/sources/repository", post(handle_register_repository))
        .route("/sources/documents", post(handle_register_collection))
        .route(
            "/sources/{id}",
            get(handle_get_source).delete(handle_deregister),
        )
        .route("/sources/{id}/profiles", put(handle_profiles_update))
        .route("/sources/{id}/content-types", put(handle_content_types))
        .route("/sources/{id}/ingest", post(handle_ingest))
        .route("/sources/{id}/diagnosis", get(handle_diagnose))
        .route("/sources/{id}/diagnosis/fix", post(handle_fix))
        .route(
            "/sources/{id}/documents",
            get(handle_list_documents).post(handle_add_document),
        )
        .route("/documents/{id}", delete(handle_remove_document))
        .route("/documents/{id}/result", post(handle_document_result))
        .route("/jobs", get(handle_pending_jobs))
        .route("/jobs/take", post(handle_take_jobs))
        .route("/results", post(handle_result))
        .layer(cors)
        .with_state(AppState { service })
}

// ============ Response envelope ============

/// An [`ActionResult`] with the matching HTTP status.
struct Reply<T>(ActionResult<T>);

fn status_for(code: &str) -> StatusCode {
    match code {
        "not_found" => StatusCode::NOT_FOUND,
        "duplicate_source" => StatusCode::CONFLICT,
        "access_denied" => StatusCode::FORBIDDEN,
        "upstream_error" => StatusCode::BAD_GATEWAY,
        "internal" => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl<T: Serialize> IntoResponse for Reply<T> {
    fn into_response(self) -> Response {
        let status = self.0.code().map_or(StatusCode::OK, status_for);
        (status, Json(self.0)).into_response()
    }
}

impl<T> From<Result<T, SyncError>> for Reply<T> {
    fn from(r: Result<T, SyncError>) -> Self {
        if let Err(e) = &r {
            if !e.is_client_error() {
                warn!(code = e.code(), error = %e, "Request failed");
            }
        }
        Reply(r.into())
    }
}

/// Unwrap a JSON body, turning extractor rejections into `invalid_input`.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, SyncError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| SyncError::InvalidInput(e.body_text()))
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

// ============ Read model ============

async fn handle_profiles() -> Reply<&'static [EmbeddingProfile]> {
    Reply(ActionResult::ok(CATALOG))
}

async fn handle_list_sources(
    State(state): State<AppState>,
    Path(team): Path<String>,
) -> Reply<Vec<SourceView>> {
    state.service.list_sources_with_statuses(&team).await.into()
}

async fn handle_get_source(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<SourceView> {
    state.service.source_view(&id).await.into()
}

// ============ Registry ============

async fn handle_register_repository(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRepository>, JsonRejection>,
) -> Reply<SourceView> {
    match body(payload) {
        Ok(req) => state.service.register_repository(req).await.into(),
        Err(e) => Reply(e.into()),
    }
}

async fn handle_register_collection(
    State(state): State<AppState>,
    payload: Result<Json<RegisterDocumentCollection>, JsonRejection>,
) -> Reply<SourceView> {
    match body(payload) {
        Ok(req) => state.service.register_document_collection(req).await.into(),
        Err(e) => Reply(e.into()),
    }
}

async fn handle_deregister(State(state): State<AppState>, Path(id): Path<String>) -> Reply<()> {
    match state.service.deregister_source(&id).await {
        Ok(()) => Reply(ActionResult::done()),
        Err(e) => Reply(e.into()),
    }
}

// ============ Fan-out ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfilesBody {
    profile_ids: Vec<i64>,
}

async fn handle_profiles_update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ProfilesBody>, JsonRejection>,
) -> Reply<SourceView> {
    match body(payload) {
        Ok(req) => state
            .service
            .configure_profiles(&id, &req.profile_ids)
            .await
            .into(),
        Err(e) => Reply(e.into()),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentTypesBody {
    content_types: Vec<ContentTypeToggle>,
}

async fn handle_content_types(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<ContentTypesBody>, JsonRejection>,
) -> Reply<SourceView> {
    match body(payload) {
        Ok(req) => state
            .service
            .configure_content_types(&id, &req.content_types)
            .await
            .into(),
        Err(e) => Reply(e.into()),
    }
}

// ============ Ingestion ============

#[derive(Deserialize)]
struct IngestQuery {
    #[serde(default)]
    scheduled: bool,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<IngestQuery>,
) -> Reply<TriggerOutcome> {
    if query.scheduled {
        state.service.trigger_scheduled_ingest(&id).await.into()
    } else {
        state.service.trigger_manual_ingest(&id).await.into()
    }
}

#[derive(Deserialize)]
struct JobsQuery {
    #[serde(default = "default_job_limit")]
    limit: u32,
}

fn default_job_limit() -> u32 {
    10
}

async fn handle_pending_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> Reply<Vec<QueuedJob>> {
    state.service.pending_jobs(query.limit).await.into()
}

async fn handle_take_jobs(
    State(state): State<AppState>,
    Query(query): Query<JobsQuery>,
) -> Reply<Vec<QueuedJob>> {
    state.service.take_jobs(query.limit).await.into()
}

/// Worker callback body: the row key plus the outcome.
#[derive(Deserialize)]
struct ResultBody {
    #[serde(flatten)]
    key: StatusKey,
    #[serde(flatten)]
    outcome: IngestOutcome,
}

async fn handle_result(
    State(state): State<AppState>,
    payload: Result<Json<ResultBody>, JsonRejection>,
) -> Reply<ReportAck> {
    match body(payload) {
        Ok(req) => state
            .service
            .report_result(&req.key, req.outcome)
            .await
            .into(),
        Err(e) => Reply(e.into()),
    }
}

// ============ Diagnosis ============

#[derive(Deserialize)]
struct DiagnosisQuery {
    identity: Option<String>,
}

async fn handle_diagnose(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DiagnosisQuery>,
) -> Reply<Diagnosis> {
    match query.identity.filter(|i| !i.trim().is_empty()) {
        Some(identity) => state.service.diagnose(&id, &identity).await.into(),
        None => Reply(SyncError::InvalidInput("identity is required".into()).into()),
    }
}

async fn handle_fix(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<CredentialScope>, JsonRejection>,
) -> Reply<SourceView> {
    match body(payload) {
        Ok(scope) => state.service.apply_diagnostic_fix(&id, &scope).await.into(),
        Err(e) => Reply(e.into()),
    }
}

// ============ Documents ============

async fn handle_list_documents(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<Vec<DocumentSource>> {
    state.service.list_documents(&id).await.into()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddDocumentBody {
    file_name: String,
}

async fn handle_add_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<AddDocumentBody>, JsonRejection>,
) -> Reply<DocumentSource> {
    match body(payload) {
        Ok(req) => state.service.add_document(&id, &req.file_name).await.into(),
        Err(e) => Reply(e.into()),
    }
}

async fn handle_remove_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Reply<()> {
    match state.service.remove_document(&id).await {
        Ok(()) => Reply(ActionResult::done()),
        Err(e) => Reply(e.into()),
    }
}

async fn handle_document_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<IngestOutcome>, JsonRejection>,
) -> Reply<ReportAck> {
    match body(payload) {
        Ok(outcome) => state
            .service
            .report_document_result(&id, outcome)
            .await
            .into(),
        Err(e) => Reply(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_statuses() {
        assert_eq!(status_for("not_found"), StatusCode::NOT_FOUND);
        assert_eq!(status_for("duplicate_source"), StatusCode::CONFLICT);
        assert_eq!(status_for("no_profile_selected"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for("internal"), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn only_server_side_errors_map_to_5xx() {
        let errors = [
            SyncError::Store(anyhow::anyhow!("disk full")),
            SyncError::Upstream(anyhow::anyhow!("github down")),
            SyncError::NoProfileSelected,
            SyncError::NotFound("source x".into()),
        ];
        for e in errors {
            assert_eq!(
                status_for(e.code()).is_server_error(),
                !e.is_client_error(),
                "{}",
                e.code()
            );
        }
    }

    #[test]
    fn result_body_flattens_key_and_outcome() {
        let body: ResultBody = serde_json::from_str(
            r#"{"sourceId":"s1","contentType":"blob","profileId":1,"outcome":"failed","errorCode":"NOT_FOUND"}"#,
        )
        .unwrap();
        assert_eq!(body.key.profile_id, 1);
        assert!(matches!(body.outcome, IngestOutcome::Failed { .. }));
    }
}
