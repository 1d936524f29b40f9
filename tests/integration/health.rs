//! Health endpoint behavior

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum_test::TestServer;
use switchboard::{routes, AppState};

use crate::common;

#[tokio::test]
async fn healthz_reports_healthy() {
    let config = common::config_without_auth("  {}\n");
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server.get("/healthz").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn healthz_reports_unavailable_during_shutdown() {
    let config = common::config_without_auth("  {}\n");
    let state = Arc::new(AppState::new(config).unwrap());
    let server = TestServer::new(routes::create_router(state.clone())).unwrap();

    state.healthy.store(false, Ordering::SeqCst);
    let response = server.get("/healthz").await;
    assert_eq!(response.status_code(), 503);
}

#[tokio::test]
async fn metrics_endpoint_renders() {
    routes::metrics::init_metrics();
    let config = common::config_without_auth("  {}\n");
    let server = TestServer::new(common::app(config)).unwrap();

    server.get("/metrics").await.assert_status_ok();
}
