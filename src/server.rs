//! HTTP upload server.
//!
//! Accepts gzip-compressed CSV uploads and runs each one through the upload
//! pipeline in [`ingest`](crate::ingest).
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/upload` | Multipart upload, field `file` (configurable) |
//! | `OPTIONS` | `/upload` | CORS preflight |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Any other method on `/upload` gets `405 Method Not Allowed`.
//!
//! # Responses
//!
//! Success is `200 text/plain` with the timing summary and one URL per
//! created spreadsheet. Errors follow this schema:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "error parsing CSV at row 12: ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `provisioning_failed` (500),
//! `upload_failed` (500), `internal` (500).
//!
//! # CORS
//!
//! All origins are permitted for `POST` and `OPTIONS` with a `Content-Type`
//! header, so the browser front end can post directly.

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{InputError, PipelineError};
use crate::ingest::{decode_file, run_upload, UploadContext};
use crate::models::RowSet;
use crate::progress::LogProgress;
use crate::sheets::create_document_service;
use crate::stats::{format_bytes, RequestStats};

/// Starts the upload server.
///
/// Binds to `[server].bind`, creates `[server].temp_dir` if needed, and
/// serves until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = create_document_service(config)?;
    std::fs::create_dir_all(&config.server.temp_dir)?;

    let ctx = UploadContext {
        config: Arc::new(config.clone()),
        service,
        progress: Arc::new(LogProgress),
    };

    tracing::info!(
        backend = ctx.service.name(),
        cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        "starting server on {}",
        config.server.bind
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(ctx)).await?;

    Ok(())
}

/// Builds the application router. Exposed so tests and embedders can drive
/// it with their own [`DocumentService`](crate::traits::DocumentService).
pub fn router(ctx: UploadContext) -> Router {
    let body_limit = ctx.config.server.max_body_bytes;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/upload", post(handle_upload))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
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

/// Error type that converts into an Axum HTTP response.
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
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status.is_server_error() {
            tracing::error!("request failed: {}", err);
        } else {
            tracing::warn!("request rejected: {}", err);
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<InputError> for AppError {
    fn from(err: InputError) -> Self {
        PipelineError::from(err).into()
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

// ============ POST /upload ============

async fn handle_upload(
    State(ctx): State<UploadContext>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let request_id = format!("req-{}", Uuid::new_v4());
    let span = tracing::info_span!("upload", request_id = %request_id);

    async move {
        let started = Instant::now();
        tracing::info!("new upload request received");

        let multipart = multipart.map_err(|e| InputError::Multipart(e.body_text()))?;
        let (file_name, bytes) = read_upload(multipart, &ctx.config.server.upload_field).await?;
        tracing::info!(
            file = %file_name,
            size = %format_bytes(bytes.len() as u64),
            "received file"
        );

        let (rows, stats) = spool_and_decode(&ctx.config, bytes).await?;
        let summary = run_upload(&ctx, &request_id, rows, stats, started).await?;

        tracing::info!("request completed successfully");
        Ok::<Response, AppError>(
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                summary.render(),
            )
                .into_response(),
        )
    }
    .instrument(span)
    .await
}

/// Pull the upload field out of the multipart body, skipping other fields.
async fn read_upload(
    mut multipart: Multipart,
    field_name: &str,
) -> Result<(String, axum::body::Bytes), InputError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| InputError::Multipart(e.body_text()))?
    {
        if field.name() != Some(field_name) {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| InputError::Multipart(e.body_text()))?;
        return Ok((file_name, bytes));
    }
    Err(InputError::MissingFile(field_name.to_string()))
}

/// Write the upload to a temp file, then decompress and parse it off the
/// async runtime. The temp file is removed when this returns.
async fn spool_and_decode(
    config: &Config,
    bytes: axum::body::Bytes,
) -> Result<(RowSet, RequestStats), PipelineError> {
    let temp_dir = config.server.temp_dir.clone();
    let upload_limits = config.upload.clone();
    let span = tracing::Span::current();

    tokio::task::spawn_blocking(move || -> Result<(RowSet, RequestStats), PipelineError> {
        let _entered = span.enter();
        std::fs::create_dir_all(&temp_dir).map_err(anyhow::Error::from)?;
        let mut temp = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(".gz")
            .tempfile_in(&temp_dir)
            .map_err(anyhow::Error::from)?;
        temp.write_all(&bytes).map_err(anyhow::Error::from)?;
        temp.flush().map_err(anyhow::Error::from)?;
        tracing::debug!(path = %temp.path().display(), "saved upload to temp file");

        let mut stats = RequestStats::default();
        let rows = decode_file(temp.path(), &upload_limits, &mut stats)?;
        Ok((rows, stats))
    })
    .await
    .map_err(|e| PipelineError::Internal(anyhow::anyhow!("decode task failed: {}", e)))?
}
