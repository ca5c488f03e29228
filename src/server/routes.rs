//! Axum route handlers for the guardian HTTP server.
//!
//! # Routes
//!
//! - `POST /analyze` — body: raw RFC822 (≤ 15 MiB). `200` verdict JSON,
//!   `400` invalid MIME, `405` wrong method
//! - `POST /report`  — body: `{"message-id", "report_type"}`. `200` ok or
//!   skipped, `400` bad JSON / no hashes, `404` no scan record, `409`
//!   duplicate, `503` oracle unreachable, or the oracle reply verbatim
//! - `GET  /status`  — `200 {node_id, current_seq, version}`, `503` when
//!   the store is unavailable
//! - `GET  /metrics` — Prometheus text exposition

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tower_http::trace::TraceLayer;

use crate::analyzer::Analyzer;
use crate::config::Config;
use crate::error::AnalyzeError;
use crate::fingerprint::MAX_PROCESS_SIZE;
use crate::metrics::Metrics;
use crate::reporter::{ReportOutcome, ReportRequest, Reporter};
use crate::store::index::Index;

/// Shared application state for the HTTP server.
#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<Analyzer>,
    pub reporter: Arc<Reporter>,
    pub index: Index,
    pub metrics: Arc<Metrics>,
    pub config: Arc<Config>,
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/analyze", post(analyze_handler))
        .route("/report", post(report_handler))
        .route("/status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(MAX_PROCESS_SIZE))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /analyze — classify one raw message.
async fn analyze_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, (StatusCode, Json<Value>)> {
    state.metrics.scanned_total.inc();

    match state.analyzer.analyze(&body).await {
        Ok(verdict) => Ok(Json(verdict)),
        Err(AnalyzeError::InvalidMime) => Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "invalid MIME message"})),
        )),
    }
}

/// POST /report — learn from a spam/ham report and forward it.
async fn report_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request: ReportRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({"error": "invalid JSON body"})),
            )
                .into_response();
        }
    };

    match state.reporter.report(&request).await {
        Ok(ReportOutcome::Duplicate) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({"status": "duplicate"})),
        )
            .into_response(),
        Ok(ReportOutcome::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "no scan record for message-id"})),
        )
            .into_response(),
        Ok(ReportOutcome::NoHashes) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "no hashes to report"})),
        )
            .into_response(),
        Ok(ReportOutcome::SkippedOracle) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "skipped_oracle", "reason": "known_locally"})),
        )
            .into_response(),
        Ok(ReportOutcome::Forwarded { status, body }) => proxy_reply(status, body),
        Ok(ReportOutcome::OracleUnreachable) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "oracle unreachable"})),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "report failed against the store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({"error": "store unavailable"})),
            )
                .into_response()
        }
    }
}

/// The oracle's reply, passed through with its original status and body.
fn proxy_reply(status: u16, body: String) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

/// GET /status — node identity and sync position; proves the store answers.
async fn status_handler(
    State(state): State<AppState>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let unavailable = |e: crate::error::StoreError| {
        tracing::warn!(error = %e, "status check failed against the store");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "store unavailable"})),
        )
    };

    let node_id = state.index.node_id().await.map_err(unavailable)?;
    let current_seq = state.index.current_seq().await.map_err(unavailable)?;

    Ok(Json(serde_json::json!({
        "node_id": node_id,
        "current_seq": current_seq,
        "version": crate::VERSION,
    })))
}

/// GET /metrics — Prometheus text exposition.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "metrics encoding failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "encoding failed").into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
