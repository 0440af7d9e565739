//! HTTP surface (axum).
//!
//! - `POST /run` interprets and executes a free-text task
//! - `GET /read?path=` returns a file from the sandbox
//! - `POST /<endpoint>` calls one capability directly with named parameters
//! - `GET /health` reports liveness and the number of capabilities

pub mod response;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::agent::ExecutionCoordinator;
use crate::error::TaskError;
use response::ApiError;

type AppState = Arc<ExecutionCoordinator>;

pub fn router(coordinator: Arc<ExecutionCoordinator>) -> Router {
    Router::new()
        .route("/run", post(run_task))
        .route("/read", get(read_file))
        .route("/health", get(health))
        .route("/:endpoint", post(invoke_capability))
        .with_state(coordinator)
}

/// Binds `addr` and serves until Ctrl-C.
pub async fn serve(addr: &str, app: Router) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, finishing in-flight requests...");
}

/// Parses an optional JSON object body; an empty body is an empty object.
fn json_object(body: &Bytes) -> Result<Map<String, Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::bad_request(
            "invalid_request",
            "request body must be a JSON object",
        )),
        Err(e) => Err(ApiError::bad_request(
            "invalid_request",
            format!("request body is not valid JSON: {e}"),
        )),
    }
}

async fn run_task(
    State(coordinator): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body = json_object(&body)?;
    let task = query
        .get("task")
        .cloned()
        .or_else(|| body.get("task").and_then(Value::as_str).map(str::to_string))
        .filter(|t| !t.trim().is_empty())
        .ok_or(TaskError::MissingTask)?;

    Ok(coordinator.execute(&task).await.into_response())
}

async fn read_file(
    State(coordinator): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let requested = query
        .get("path")
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("invalid_request", "query parameter 'path' is required"))?;

    let path = coordinator.guard().guard(requested).map_err(TaskError::from)?;
    debug!("Reading {}", path.display());

    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TaskError::NotFound(requested.clone()).into());
        }
        Err(e) if path.is_dir() => {
            return Err(ApiError::bad_request(
                "invalid_request",
                format!("'{requested}' is a directory: {e}"),
            ));
        }
        Err(e) => return Err(ApiError::internal(format!("reading '{requested}': {e}"))),
    };

    let content_type = if std::str::from_utf8(&bytes).is_ok() {
        "text/plain; charset=utf-8"
    } else {
        "application/octet-stream"
    };
    Ok(([(header::CONTENT_TYPE, content_type)], bytes).into_response())
}

async fn health(State(coordinator): State<AppState>) -> Json<Value> {
    Json(json!({"ok": true, "capabilities": coordinator.registry().len()}))
}

async fn invoke_capability(
    State(coordinator): State<AppState>,
    Path(endpoint): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let Some(capability) = coordinator.registry().resolve_endpoint(&endpoint) else {
        return Ok((
            StatusCode::NOT_FOUND,
            Json(json!({
                "status": "failed",
                "error": {
                    "kind": "not_found",
                    "detail": format!("no endpoint /{endpoint}"),
                    "retriable": false,
                },
            })),
        )
            .into_response());
    };

    // Body values win over query values of the same name
    let mut named: Map<String, Value> = query
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();
    named.extend(json_object(&body)?);

    Ok(coordinator
        .invoke_direct(capability, &named)
        .await
        .into_response())
}
