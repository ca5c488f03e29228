//! HTTP server for the guardian analyzer.
//!
//! Exposes the local classification API a mail filter calls per message,
//! plus the report, status and metrics endpoints.
//!
//! # Endpoints
//!
//! - `POST /analyze` — classify a raw RFC822 message
//! - `POST /report`  — apply a spam/ham report and forward it
//! - `GET  /status`  — node identity and sync state
//! - `GET  /metrics` — Prometheus exposition

pub mod routes;

pub use routes::{app_router, AppState};
