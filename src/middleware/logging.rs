//! Request logging middleware
//!
//! Attaches a UUIDv4 correlation id to the request, records method, path,
//! status and elapsed wall time post-hoc, and echoes the correlation id in
//! `x-request-id`. The body is never buffered here.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use std::time::Instant;
use tracing::info;
use uuid::Uuid;

use crate::routes::metrics;

/// Per-request correlation id, available from request extensions.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

pub async fn logging(mut request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let correlation_id = CorrelationId(Uuid::new_v4());
    request.extensions_mut().insert(correlation_id);

    let mut response = next.run(request).await;

    let elapsed = start.elapsed();
    metrics::record_request(&method, &path, response.status().as_u16(), elapsed.as_secs_f64());
    if let Some(kind) = response.extensions().get::<crate::error::ErrorKind>() {
        metrics::record_error(&method, &path, kind.0);
    }

    if let Ok(value) = HeaderValue::from_str(&correlation_id.0.to_string()) {
        response.headers_mut().insert("x-request-id", value);
    }
    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_secs = format!("{:.4}", elapsed.as_secs_f64()),
        correlation_id = %correlation_id.0,
        "request completed"
    );

    response
}
