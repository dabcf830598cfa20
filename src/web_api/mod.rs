//! WebAPI - REST API Endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes
//! - Request validation
//! - WebSocket attach point for the realtime hub

mod routes;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: String,
    pub detection_mode: String,
    pub external_detector_available: bool,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let mode = state.detector.current_mode().await;
    let external_ok = state.detector.external_available().await;

    Json(HealthResponse {
        status: "ok".to_string(),
        service: "zonewatch".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        detection_mode: mode.as_str().to_string(),
        external_detector_available: external_ok,
    })
}
