//! HTTP API for the docrelay service.
//!
//! - `POST /upload`: multipart form with a `file` field; runs the whole pipeline
//! - `GET /health`: liveness probe

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State, multipart::MultipartError},
    http::StatusCode,
    routing::{get, post},
};
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::error::{IntakeError, ServiceError};
use crate::response::ProcessResponse;
use crate::service::RelayService;

/// Room for multipart boundaries and part headers on top of the file itself
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state
pub struct AppState {
    pub service: Arc<RelayService>,
    pub start_time: Instant,
    pub max_upload_bytes: u64,
}

/// Build the API router
pub fn router(service: Arc<RelayService>, config: &Config) -> Router {
    let state = Arc::new(AppState {
        service,
        start_time: Instant::now(),
        max_upload_bytes: config.limits.max_upload_bytes,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let max_body_size = config.limits.max_upload_bytes as usize + MULTIPART_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health ===

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

// === Upload ===

async fn upload_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<ProcessResponse>, ServiceError> {
    let mut upload: Option<(String, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, state.max_upload_bytes))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| multipart_error(e, state.max_upload_bytes))?;
        upload = Some((filename, data));
    }

    let Some((filename, data)) = upload else {
        return Err(IntakeError::NoFileSelected.into());
    };
    info!(filename = %filename, size = data.len(), "Upload received");

    let response = state.service.process_upload(&filename, &data).await?;
    Ok(Json(response))
}

fn multipart_error(error: MultipartError, max_upload_bytes: u64) -> ServiceError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        IntakeError::RequestTooLarge {
            max: max_upload_bytes,
        }
        .into()
    } else {
        ServiceError::InvalidRequest {
            message: error.body_text(),
        }
    }
}
