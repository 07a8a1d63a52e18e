//! HTTP intake for vocbench deployments that push exports instead of dropping files.
//!
//! `POST /upload?vocabulary_name=<id>[&file_name=<name>]` with
//! `Authorization: Bearer <secret>` publishes one vocabulary and answers with
//! its target outcome. The RDF document is either a `multipart/form-data`
//! attachment named `file` (its filename is the pushed name unless
//! `file_name` is given) or the raw request body.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Query, Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use vocpub::{FailureReason, Publisher, RunControl, RunError, TargetOutcome, VocabularyExport};

use crate::commands::shared::build_publisher;
use crate::config::Config;
use crate::shutdown::setup_shutdown_handler;

/// vocbench exports of large thesauri run to tens of megabytes.
const MAX_UPLOAD_BYTES: usize = 128 * 1024 * 1024;

#[derive(Debug, Deserialize)]
pub(crate) struct UploadParams {
    pub vocabulary_name: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct UploadResponse {
    pub success: bool,
    pub vocabulary: String,
    pub repository: Option<String>,
    pub pull_request_branch: String,
    pub pushed_filename: String,
    #[serde(flatten)]
    pub outcome: TargetOutcome,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ErrorResponse {
        success: false,
        error: message.into(),
    };
    (status, Json(body)).into_response()
}

struct IntakeState {
    publisher: Publisher,
    secret: String,
    branch_prefix: String,
    control: RunControl,
}

/// Compare the bearer token without short-circuiting on the first mismatch.
pub(crate) fn authorized(headers: &HeaderMap, secret: &str) -> bool {
    let Some(provided) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return false;
    };
    let (a, b) = (provided.as_bytes(), secret.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// The uploaded document and the filename it arrived with, if any.
#[derive(Debug)]
pub(crate) struct UploadBody {
    pub content: Bytes,
    pub file_name: Option<String>,
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("multipart/form-data"))
}

/// Read the document from a `file` attachment or from the raw body.
pub(crate) async fn read_upload(request: Request) -> Result<UploadBody, String> {
    if !is_multipart(request.headers()) {
        let content = Bytes::from_request(request, &())
            .await
            .map_err(|e| e.to_string())?;
        return Ok(UploadBody {
            content,
            file_name: None,
        });
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| e.to_string())?;
    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.is_empty());
        let content = field.bytes().await.map_err(|e| e.to_string())?;
        return Ok(UploadBody { content, file_name });
    }
    Err("Please provide a valid 'file' attachment in RDF/XML format.".to_string())
}

/// Turn an upload into an export, or a 400 message.
pub(crate) fn parse_upload(params: UploadParams, body: UploadBody) -> Result<VocabularyExport, String> {
    let vocabulary = params
        .vocabulary_name
        .filter(|v| !v.trim().is_empty())
        .ok_or("Please provide 'vocabulary_name' query parameter.")?;
    if body.content.is_empty() {
        return Err("Uploaded document is empty; send it as the body or a 'file' attachment.".to_string());
    }
    let file_name = params.file_name.or(body.file_name);
    VocabularyExport::single_file(vocabulary, file_name.as_deref(), body.content.to_vec())
        .map_err(|e| e.to_string())
}

pub(crate) fn status_for(outcome: &TargetOutcome) -> StatusCode {
    match outcome {
        TargetOutcome::Published { .. } | TargetOutcome::NoChange => StatusCode::OK,
        TargetOutcome::Failed { .. } => StatusCode::BAD_GATEWAY,
    }
}

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_upload(
    State(state): State<Arc<IntakeState>>,
    headers: HeaderMap,
    Query(params): Query<UploadParams>,
    request: Request,
) -> Response {
    if !authorized(&headers, &state.secret) {
        tracing::warn!("Rejected upload with invalid authorization token");
        return error_response(StatusCode::UNAUTHORIZED, "Invalid authorization token.");
    }

    let body = match read_upload(request).await {
        Ok(body) => body,
        Err(message) => {
            tracing::warn!(error = %message, "Could not read upload");
            return error_response(StatusCode::BAD_REQUEST, message);
        }
    };
    let bytes = body.content.len();

    let export = match parse_upload(params, body) {
        Ok(export) => export,
        Err(message) => {
            tracing::warn!(error = %message, "Rejected upload");
            return error_response(StatusCode::BAD_REQUEST, message);
        }
    };

    let vocabulary = export.vocabulary_id().to_string();
    let pushed_filename = export
        .files()
        .first()
        .map(|f| f.path().to_string())
        .unwrap_or_default();
    tracing::info!(vocabulary = %vocabulary, file = %pushed_filename, bytes, "Received upload");

    let (repository, outcome) = match state.publisher.run(vec![export], &state.control.child()).await {
        Ok(mut run) => match run.per_target.remove(&vocabulary) {
            Some(report) => (report.repository, report.outcome),
            None => (
                None,
                TargetOutcome::failed(FailureReason::PermanentError, "no outcome recorded"),
            ),
        },
        Err(RunError::Auth(e)) => (
            None,
            TargetOutcome::failed(FailureReason::AuthError, e.to_string()),
        ),
    };

    let status = status_for(&outcome);
    let response = UploadResponse {
        success: status == StatusCode::OK,
        pull_request_branch: vocpub::publish::publish_branch_name(&state.branch_prefix, &vocabulary),
        vocabulary,
        repository,
        pushed_filename,
        outcome,
    };
    (status, Json(response)).into_response()
}

fn router(state: Arc<IntakeState>) -> Router {
    Router::new()
        .route("/", get(handle_health))
        .route("/upload", post(handle_upload))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

pub(crate) async fn handle_serve(
    bind: Option<String>,
    config: &Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let secret = config
        .server
        .incoming_secret
        .clone()
        .filter(|s| !s.is_empty())
        .ok_or("Intake secret not configured. Set server.incoming_secret or INCOMING_SECRET")?;

    let publisher = build_publisher(config, None)?;
    let control = RunControl::new();
    setup_shutdown_handler(control.clone());

    let state = Arc::new(IntakeState {
        publisher,
        secret,
        branch_prefix: config.publish.branch_prefix.clone(),
        control: control.clone(),
    });

    let addr = bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("Failed to bind to {addr}: {e}"))?;
    tracing::info!(addr = %addr, "Intake server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { control.cancelled().await })
        .await?;

    tracing::info!("Intake server stopped");
    Ok(())
}
