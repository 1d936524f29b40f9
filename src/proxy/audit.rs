//! Duplicated streaming audit pipeline
//!
//! Every upstream response body is teed into the client-bound stream and
//! an in-memory audit buffer. The observer task pulls upstream chunks and
//! forwards each through a bounded channel, so client backpressure
//! propagates to the upstream read. When the upstream body is cleanly
//! exhausted the bound engine's `response_callback` runs with the buffered
//! body; if the client goes away first the observer stops and the callback
//! is never invoked.

use std::io;
use std::sync::Arc;

use async_stream::stream;
use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use bytes::{Buf, Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::{Engine, RequestGuard, UpstreamMeta};

/// Tee the upstream response into a client response and the audit observer.
pub fn tee_response(
    upstream: reqwest::Response,
    engine: Arc<dyn Engine>,
    correlation_id: Uuid,
    guard: Option<RequestGuard>,
) -> Response<Body> {
    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let headers = upstream.headers().clone();
    let meta = UpstreamMeta {
        status,
        correlation_id,
        content_length: upstream.content_length(),
    };

    // Capacity 1: the observer can be at most one chunk ahead of the client.
    let (tx, mut rx) = mpsc::channel::<Result<Bytes, io::Error>>(1);
    let mut upstream_body = upstream.bytes_stream();

    tokio::spawn(async move {
        // Held until the relay is finished, releasing per-backend slots.
        let _guard = guard;
        let mut buffer = BytesMut::new();

        loop {
            match upstream_body.next().await {
                Some(Ok(chunk)) => {
                    buffer.extend_from_slice(&chunk);
                    if tx.send(Ok(chunk)).await.is_err() {
                        debug!(%correlation_id, "client disconnected, audit observer stopping");
                        return;
                    }
                }
                Some(Err(e)) => {
                    warn!(%correlation_id, error = %e, "upstream body error");
                    let _ = tx.send(Err(io::Error::other(e))).await;
                    return;
                }
                None => break,
            }
        }

        drop(tx);
        let body = buffer.freeze();
        engine.response_callback(&meta, &mut body.reader());
    });

    let client_stream = stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    };

    let mut builder = Response::builder().status(status);
    copy_response_headers(&headers, builder.headers_mut().expect("fresh builder"));
    builder
        .body(Body::from_stream(client_stream))
        .expect("response built from valid parts")
}

/// Forwardable response headers; hop-by-hop headers stay behind.
fn copy_response_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from {
        if is_hop_by_hop_header(name.as_str()) {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}

fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}
