//! Native passthrough scenarios

use axum::http::{header, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn bedrock_native_request_is_signed_and_forwarded() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/model/foo/converse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::converse_response_json()))
        .mount(&upstream)
        .await;

    let config = common::config_without_auth(&common::bedrock_engines_yaml(&upstream.uri()));
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server
        .post("/bedrock/model/foo/converse")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer client-bearer-key"))
        .json(&json!({"messages": [{"role": "user", "content": [{"text": "hi"}]}]}))
        .await;
    response.assert_status_ok();

    let requests = upstream.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    // Client bearer is gone; SigV4 authorization took its place.
    let auth = request.headers.get("authorization").unwrap().to_str().unwrap();
    assert!(auth.starts_with("AWS4-HMAC-SHA256"));
    assert!(!auth.contains("client-bearer-key"));
    assert!(request.headers.get("x-amz-date").is_some());
}

#[tokio::test]
async fn native_response_streams_back_verbatim() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/model/foo/converse"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("{\"raw\":\"bytes\"}")
                .insert_header("content-type", "application/json"),
        )
        .mount(&upstream)
        .await;

    let config = common::config_without_auth(&common::bedrock_engines_yaml(&upstream.uri()));
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server
        .post("/bedrock/model/foo/converse")
        .json(&json!({}))
        .await;
    response.assert_status_ok();
    assert_eq!(response.text(), "{\"raw\":\"bytes\"}");
    // Responses carry the correlation id assigned at ingress.
    assert!(response.headers().get("x-request-id").is_some());
}

#[tokio::test]
async fn non_whitelisted_path_is_forbidden() {
    let config = common::config_without_auth(&common::bedrock_engines_yaml("http://unused.invalid"));
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server.post("/bedrock/admin/keys").json(&json!({})).await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn unknown_engine_segment_is_not_found() {
    let config = common::config_without_auth(&common::bedrock_engines_yaml("http://unused.invalid"));
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server.post("/anthropic/v1/messages").json(&json!({})).await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn configured_but_unlisted_engine_is_not_found() {
    // openai is known but absent from this config.
    let config = common::config_without_auth(&common::bedrock_engines_yaml("http://unused.invalid"));
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server.get("/openai/v1/models").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upstream_status_passes_through_in_native_mode() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/model/foo/converse"))
        .respond_with(
            ResponseTemplate::new(429).set_body_string("ThrottlingException"),
        )
        .mount(&upstream)
        .await;

    let config = common::config_without_auth(&common::bedrock_engines_yaml(&upstream.uri()));
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server
        .post("/bedrock/model/foo/converse")
        .json(&json!({}))
        .await;
    assert_eq!(response.status_code(), 429);
    assert_eq!(response.text(), "ThrottlingException");
}

#[tokio::test]
async fn preflight_requests_short_circuit() {
    let config = common::config_without_auth(&common::bedrock_engines_yaml("http://unused.invalid"));
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server.method(axum::http::Method::OPTIONS, "/bedrock/model/foo/converse").await;
    response.assert_status_ok();
    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}
