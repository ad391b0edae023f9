//! # API Handlers
//!
//! Axum handlers for the dashboard. Listing endpoints always answer with a
//! complete envelope; the HTTP status tells the caller why it may be empty.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use bd_core::service;
use bd_core::{FilterRequest, LogEnvelope, Metrics, QueryEnvelope};

use crate::sessions::{ConnectionStatus, DEFAULT_SESSION};
use crate::AppState;

pub const SESSION_HEADER: &str = "x-session-id";

fn session_id(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SESSION)
        .to_string()
}

/// 503 without a store, 500 when the store call failed, 200 otherwise.
fn status_for(connected: bool, failed: bool) -> StatusCode {
    if !connected {
        StatusCode::SERVICE_UNAVAILABLE
    } else if failed {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    }
}

// =============================================================================
// Listings
// =============================================================================

pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<FilterRequest>>,
) -> (StatusCode, Json<LogEnvelope>) {
    let session = session_id(&headers);
    let filter = body.map(|Json(b)| b).unwrap_or_default().to_log_filter();
    let store = state.sessions.store(&session).await;

    let env = service::list_logs(store.as_deref(), &filter, state.query_timeout()).await;
    (status_for(store.is_some(), env.is_error()), Json(env))
}

pub async fn list_queries(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<FilterRequest>>,
) -> (StatusCode, Json<QueryEnvelope>) {
    let session = session_id(&headers);
    let filter = body.map(|Json(b)| b).unwrap_or_default().to_query_filter();
    let store = state.sessions.store(&session).await;

    let env = service::list_queries(store.as_deref(), &filter, state.query_timeout()).await;
    (status_for(store.is_some(), env.is_error()), Json(env))
}

pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Metrics>) {
    let session = session_id(&headers);
    let store = state.sessions.store(&session).await;

    let metrics = service::get_metrics(store.as_deref(), state.query_timeout()).await;
    let failed = metrics.error.is_some();
    (status_for(store.is_some(), failed), Json(metrics))
}

// =============================================================================
// Connection
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ConfigureRequest {
    #[serde(default)]
    pub dsn: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConfigureResponse {
    pub success: bool,
    pub status: ConnectionStatus,
}

pub async fn connection_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Json<ConnectionStatus> {
    Json(state.sessions.status(&session_id(&headers)).await)
}

pub async fn configure_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ConfigureRequest>,
) -> Result<Json<ConfigureResponse>, (StatusCode, Json<Value>)> {
    let dsn = req
        .dsn
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "error": "DSN is required"})),
            )
        })?;

    let status = state.sessions.configure(&session_id(&headers), dsn).await;
    Ok(Json(ConfigureResponse {
        success: status.connected,
        status,
    }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": state.start_time.elapsed().as_secs(),
        "sessions": state.sessions.session_count().await,
        "time": chrono::Utc::now().to_rfc3339(),
    }))
}
