//! Admin key-management surface
//!
//! `/admin/keys[/...]` is owned by the external key service; this handler
//! relays the request there verbatim (admin bearer included) and streams
//! the answer back. The proxy itself stores no key material.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::Response;
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::proxy::forward::MAX_BODY_BYTES;
use crate::AppState;

pub async fn forward_keys(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> AppResult<Response> {
    let base = state
        .config
        .keystore_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("no key service configured"))?
        .trim_end_matches('/')
        .to_string();

    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/admin/keys");
    let url = format!("{base}{path_and_query}");

    let body_bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::BadRequest(format!("failed to read request body: {e}")))?;

    let method = reqwest::Method::from_bytes(parts.method.as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let mut builder = state.http.request(method, url);
    for name in [axum::http::header::AUTHORIZATION, CONTENT_TYPE] {
        if let Some(value) = parts.headers.get(&name) {
            builder = builder.header(name.clone(), value.clone());
        }
    }
    if !body_bytes.is_empty() {
        builder = builder.body(body_bytes.to_vec());
    }

    let upstream = builder.send().await.map_err(|e| {
        warn!(error = %e, "key service request failed");
        AppError::Upstream(e.to_string())
    })?;

    let status = axum::http::StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(axum::http::StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();

    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("failed to build response: {e}")))
}
