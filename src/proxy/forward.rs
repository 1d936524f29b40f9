//! Native-mode dispatcher and reverse-proxy forwarder
//!
//! The first ingress path segment names the engine. After the whitelist
//! check the bound adapter rewrites the request for upstream delivery and
//! the response is relayed through the audit tee.

use std::str::FromStr;
use std::sync::Arc;

use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::Response;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{EngineTag, ProxyRequest};
use crate::error::{AppError, AppResult};
use crate::middleware::logging::CorrelationId;
use crate::AppState;

use super::audit;

/// Upper bound on a buffered request body (32 MiB).
pub const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Fallback handler for `/{engine}/...` ingress paths.
pub async fn native_proxy(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> AppResult<Response> {
    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .map(|c| c.0)
        .unwrap_or_else(Uuid::new_v4);

    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    let first_segment = path
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or("")
        .to_string();
    if first_segment.is_empty() {
        return Err(AppError::BadRequest("Invalid path".to_string()));
    }
    debug!(segment = %first_segment, "dispatching native request");

    let Ok(tag) = EngineTag::from_str(&first_segment) else {
        return Err(AppError::EngineNotFound);
    };
    if !state.config.engines.contains_key(tag.as_str()) {
        return Err(AppError::EngineNotFound);
    }

    let adapter = state.registry.get(tag, "").await.map_err(|e| {
        warn!(engine = %tag, error = %e, "error selecting engine");
        AppError::EngineUnavailable {
            engine: tag.to_string(),
            reason: e.to_string(),
        }
    })?;

    if !adapter.native().is_allowed_path(&path) {
        return Err(AppError::PathNotAllowed);
    }
    info!(engine = %tag, %correlation_id, "selected engine");

    let body_bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::BadRequest(format!("failed to read request body: {e}")))?;

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut preq = ProxyRequest::new(
        parts.method.clone(),
        path_and_query,
        forwardable_headers(&parts.headers),
        body_bytes,
    );

    // The proxy's own bearer never travels upstream; engines inject their
    // own credentials.
    preq.headers.remove(AUTHORIZATION);

    adapter.native().modify_request(&mut preq).await.map_err(|e| {
        warn!(engine = %tag, error = %e, "request rewrite failed");
        AppError::Upstream(e.to_string())
    })?;
    let guard = preq.guard.take();

    let method = reqwest::Method::from_bytes(preq.method.as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let mut builder = state
        .http
        .request(method, preq.url.as_str())
        .headers(preq.headers.clone());
    if !preq.body.is_empty() {
        builder = builder.body(preq.body.to_vec());
    }

    let upstream = builder.send().await.map_err(|e| {
        warn!(engine = %tag, error = %e, "upstream request failed");
        AppError::Upstream(e.to_string())
    })?;

    Ok(audit::tee_response(
        upstream,
        adapter.native().clone(),
        correlation_id,
        guard,
    ))
}

/// Headers eligible for forwarding. Host and content-length are derived by
/// the client; hop-by-hop headers stay behind.
fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers {
        let skip = matches!(
            name.as_str(),
            "connection"
                | "keep-alive"
                | "proxy-authenticate"
                | "proxy-authorization"
                | "te"
                | "trailer"
                | "transfer-encoding"
                | "upgrade"
                | "host"
                | "content-length"
        );
        if !skip {
            out.append(name.clone(), value.clone());
        }
    }
    out
}
