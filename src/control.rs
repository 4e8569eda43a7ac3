//! Control-plane HTTP API.
//!
//! Exposes writer lifecycle and parameters to operators. Every handler
//! takes the same engine mutex the writer thread holds during `submit`, so
//! control calls are serialized against in-flight writes and the engine
//! never sees concurrent lifecycle and frame operations.

use crate::config::ControlConfig;
use crate::writer::{FrameWriter, WriterError, WriterStatus};
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub writer: Arc<Mutex<FrameWriter>>,
}

/// Error body returned by all endpoints
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn writer_error(e: &WriterError) -> ApiError {
    let (status, code) = match e {
        WriterError::Configuration(_) => (StatusCode::BAD_REQUEST, "CONFIGURATION_ERROR"),
        WriterError::NotStarted => (StatusCode::CONFLICT, "NOT_STARTED"),
        WriterError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        WriterError::Hook { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "HOOK_ERROR"),
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            code: code.to_string(),
        }),
    )
}

/// Get the current writer status
async fn get_status(State(state): State<AppState>) -> Json<WriterStatus> {
    Json(state.writer.lock().status())
}

/// Validate configuration and arm the writer
async fn post_start(State(state): State<AppState>) -> Result<Json<WriterStatus>, ApiError> {
    let mut writer = state.writer.lock();
    writer.start().map_err(|e| {
        error!(error = %e, "Start rejected");
        writer_error(&e)
    })?;
    info!("Writer started via control plane");
    Ok(Json(writer.status()))
}

/// Finalize any open container and return the writer to idle
async fn post_stop(State(state): State<AppState>) -> Result<Json<WriterStatus>, ApiError> {
    let mut writer = state.writer.lock();
    writer.stop().map_err(|e| {
        error!(error = %e, "Stop failed");
        writer_error(&e)
    })?;
    info!("Writer stopped via control plane");
    Ok(Json(writer.status()))
}

/// Get all writer parameters
async fn get_parameters(State(state): State<AppState>) -> Json<BTreeMap<String, Value>> {
    Json(state.writer.lock().config().parameters())
}

/// Set writer parameters from a flat name to value mapping
///
/// Changes apply from the next container open; the currently open container
/// is unaffected.
async fn put_parameters(
    State(state): State<AppState>,
    Json(request): Json<BTreeMap<String, Value>>,
) -> Result<Json<BTreeMap<String, Value>>, ApiError> {
    let mut writer = state.writer.lock();
    for (name, value) in request {
        writer
            .config_mut()
            .set_parameter(&name, value)
            .map_err(|e| {
                (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: e.to_string(),
                        code: "PARAMETER_ERROR".to_string(),
                    }),
                )
            })?;
    }
    Ok(Json(writer.config().parameters()))
}

/// Build the control-plane router
pub fn create_router(state: AppState, config: &ControlConfig) -> Router {
    let mut router = Router::new()
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/start", post(post_start))
        .route("/api/v1/stop", post(post_stop))
        .route(
            "/api/v1/parameters",
            get(get_parameters).put(put_parameters),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if config.cors_enabled {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// Start the control-plane API server
pub async fn start_api_server(state: AppState, config: &ControlConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting control API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind control API address")?;

    axum::serve(listener, router)
        .await
        .context("Control API server error")?;

    Ok(())
}
