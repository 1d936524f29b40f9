//! Request-side audit middleware
//!
//! Reads the whole request body into memory before dispatch, logs the
//! request shape, and puts an equivalent re-readable body back on the
//! request. An unreadable body is fatal for the request.

use axum::{
    body::{to_bytes, Body},
    extract::Request,
    middleware::Next,
    response::Response,
};
use tracing::{debug, error};

use crate::error::AppError;
use crate::proxy::forward::MAX_BODY_BYTES;

pub async fn audit_request(request: Request, next: Next) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();

    let bytes = to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| {
        error!(error = %e, "audit failed: unreadable request body");
        AppError::BadRequest("Audit failed".to_string())
    })?;

    debug!(
        method = %parts.method,
        uri = %parts.uri,
        headers = ?parts.headers,
        body_length = bytes.len(),
        "request audited"
    );

    let request = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(request).await)
}
