//! HTTP surface.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/generate-upload-link` | Upload Link Issuer |
//! | `GET`  | `/list-uploaded-files` | Document Lister |
//! | `POST` | `/{id}/chat` | Chat Responder |
//! | `POST` | `/events/storage` | storage notification ingress |
//! | `POST` | `/events/table` | change-stream ingress |
//! | `POST` | `/local-bucket` | presigned form upload, local mode only |
//! | `GET`  | `/health` | liveness |
//!
//! Errors are returned as `{"error": {"code", "message", "issues"?}}`.

use crate::backend::Services;
use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderName, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use pdf_prompt_core::presign::user_metadata;
use pdf_prompt_core::{
    ChatAnswer, DocumentListing, EventOutcome, ObjectStore, PipelineError, StorageEvent,
    StreamBatch, UploadAuthorization, ValidationIssue,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const FORM_SLACK_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
struct AppState {
    services: Arc<Services>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    issues: Vec<ValidationIssue>,
}

#[derive(Debug)]
pub struct AppError {
    error: PipelineError,
    status: StatusCode,
}

impl AppError {
    /// Event ingress reports every failure as a 500.
    fn event(error: PipelineError) -> Self {
        Self {
            error,
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(error: PipelineError) -> Self {
        let status =
            StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self { error, status }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let Self { error, status } = self;
        if status.is_server_error() {
            error!(%error, code = error.code(), "request failed");
        } else {
            warn!(%error, code = error.code(), "request rejected");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: error.code(),
                message: error.to_string(),
                issues: error.issues().to_vec(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct OutcomeBody {
    outcome: EventOutcome,
}

pub fn router(services: Arc<Services>) -> Router {
    let body_limit = usize::try_from(services.settings.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(FORM_SLACK_BYTES);
    let local = services.local_store.is_some();

    let mut app = Router::new()
        .route("/generate-upload-link", post(generate_upload_link))
        .route("/list-uploaded-files", get(list_uploaded_files))
        .route("/{id}/chat", post(chat))
        .route("/events/storage", post(storage_event))
        .route("/events/table", post(table_stream))
        .route("/health", get(health));
    if local {
        app = app.route("/local-bucket", post(local_bucket_upload));
    }

    app.layer(DefaultBodyLimit::max(body_limit))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { services })
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::OPTIONS,
            Method::GET,
            Method::PUT,
            Method::POST,
            Method::DELETE,
            Method::PATCH,
            Method::HEAD,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-amz-date"),
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static("x-amz-security-token"),
        ])
}

pub async fn serve(services: Arc<Services>, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(addr = %listener.local_addr()?, "pdf-prompt listening");

    axum::serve(listener, router(services))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn generate_upload_link(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<UploadAuthorization>, AppError> {
    Ok(Json(state.services.upload_links.handle(&body)?))
}

async fn list_uploaded_files(
    State(state): State<AppState>,
) -> Result<Json<DocumentListing>, AppError> {
    Ok(Json(state.services.lister.list().await?))
}

async fn chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<ChatAnswer>, AppError> {
    Ok(Json(state.services.chat.handle(&id, &body).await?))
}

async fn storage_event(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<OutcomeBody>, AppError> {
    let event: StorageEvent = serde_json::from_slice(&body).map_err(|error| {
        AppError::event(PipelineError::MalformedEvent(format!("storage event: {error}")))
    })?;
    let outcome = state
        .services
        .router
        .route_storage(&event)
        .await
        .map_err(AppError::event)?;
    Ok(Json(OutcomeBody { outcome }))
}

async fn table_stream(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<OutcomeBody>, AppError> {
    let batch: StreamBatch = serde_json::from_slice(&body).map_err(|error| {
        AppError::event(PipelineError::MalformedEvent(format!("stream batch: {error}")))
    })?;
    let outcome = state
        .services
        .router
        .route_stream(&batch)
        .await
        .map_err(AppError::event)?;
    Ok(Json(OutcomeBody { outcome }))
}

/// Browser form upload against the in-memory bucket. Checks the presigned
/// policy the way the storage service would, then stores the file with its
/// `x-amz-meta-*` fields as object metadata.
async fn local_bucket_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<StatusCode, AppError> {
    let store = state
        .services
        .local_store
        .clone()
        .ok_or_else(|| PipelineError::Storage("local bucket is disabled".to_string()))?;
    let form_error = |error: MultipartError| {
        let issue = ValidationIssue::new("form", error.body_text());
        PipelineError::validation("Malformed form", vec![issue])
    };

    let mut fields = BTreeMap::new();
    let mut file = None;
    while let Some(field) = multipart.next_field().await.map_err(form_error)? {
        let name = field.name().unwrap_or_default().to_string();
        if name.eq_ignore_ascii_case("file") {
            file = Some(field.bytes().await.map_err(form_error)?);
        } else {
            let value = field.text().await.map_err(form_error)?;
            fields.insert(name, value);
        }
    }
    let file = file.ok_or_else(|| {
        PipelineError::validation("Upload rejected", vec![ValidationIssue::new("file", "missing")])
    })?;

    let presigner = state.services.upload_links.presigner();
    presigner.verify(&fields, file.len() as u64, Utc::now())?;

    let key = fields
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("key"))
        .map(|(_, value)| value.clone())
        .ok_or_else(|| {
            let issue = ValidationIssue::new("key", "missing");
            PipelineError::validation("Upload rejected", vec![issue])
        })?;
    let metadata =
        user_metadata(fields.iter().map(|(name, value)| (name.as_str(), value.as_str())));

    info!(%key, size = file.len(), "local upload accepted");
    store.put_object(&key, file.to_vec(), metadata).await?;
    Ok(StatusCode::NO_CONTENT)
}
