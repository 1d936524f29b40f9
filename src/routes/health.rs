//! Health endpoint
//!
//! `/healthz` reports ready until shutdown begins, at which point it flips
//! to 503 so load balancers stop routing new traffic.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if !state.healthy.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, Json(HealthResponse { status: "shutting down" }));
    }
    (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
}
