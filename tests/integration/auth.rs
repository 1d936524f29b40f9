//! Bearer auth against the external key service

use axum::http::{header, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn short_bearer_is_rejected_without_upstream_contact() {
    let upstream = MockServer::start().await;
    // Zero expected calls: the request must die at the auth layer.
    Mock::given(method("POST"))
        .and(path("/model/foo/converse"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&upstream)
        .await;

    let keystore = MockServer::start().await;
    let config = common::config_with_auth(
        &common::bedrock_engines_yaml(&upstream.uri()),
        &keystore.uri(),
    );
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server
        .post("/bedrock/model/foo/converse")
        .add_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"))
        .json(&json!({}))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.text(), "Unauthorized");
}

#[tokio::test]
async fn malformed_bearers_all_fail_closed() {
    let keystore = MockServer::start().await;
    let config = common::config_with_auth(
        &common::bedrock_engines_yaml("http://unused.invalid"),
        &keystore.uri(),
    );
    let server = TestServer::new(common::app(config)).unwrap();

    let sixty_four_z = "z".repeat(64);
    let too_long = "a".repeat(101);
    let bad_headers = vec![
        String::new(),
        "Bearer".to_string(),
        format!("Basic {}", common::user_token()),
        format!("Bearer {sixty_four_z}"),
        format!("Bearer {too_long}"),
        format!("Bearer {}", "a".repeat(63)),
    ];

    for bearer in bad_headers {
        let mut request = server.post("/bedrock/model/foo/converse").json(&json!({}));
        if !bearer.is_empty() {
            request = request
                .add_header(header::AUTHORIZATION, HeaderValue::from_str(&bearer).unwrap());
        }
        let response = request.await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.text(), "Unauthorized");
    }
}

#[tokio::test]
async fn valid_user_key_passes_auth() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/model/foo/converse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::converse_response_json()))
        .mount(&upstream)
        .await;

    let keystore = MockServer::start().await;
    common::mount_key_validation(&keystore, &common::user_token(), "user").await;

    let config = common::config_with_auth(
        &common::bedrock_engines_yaml(&upstream.uri()),
        &keystore.uri(),
    );
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server
        .post("/bedrock/model/foo/converse")
        .add_header(header::AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", common::user_token())).unwrap())
        .json(&json!({}))
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn user_key_cannot_reach_admin_surface() {
    let keystore = MockServer::start().await;
    common::mount_key_validation(&keystore, &common::user_token(), "user").await;

    let config = common::config_with_auth(
        &common::bedrock_engines_yaml("http://unused.invalid"),
        &keystore.uri(),
    );
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server
        .get("/admin/keys")
        .add_header(header::AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", common::user_token())).unwrap())
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_key_reaches_key_service() {
    let keystore = MockServer::start().await;
    common::mount_key_validation(&keystore, &common::admin_token(), "admin").await;
    Mock::given(method("GET"))
        .and(path("/admin/keys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "name": "ci", "role": "user", "is_active": true}
        ])))
        .mount(&keystore)
        .await;

    let config = common::config_with_auth(
        &common::bedrock_engines_yaml("http://unused.invalid"),
        &keystore.uri(),
    );
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server
        .get("/admin/keys")
        .add_header(header::AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", common::admin_token())).unwrap())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body[0]["name"], "ci");
}

#[tokio::test]
async fn revoked_key_is_rejected() {
    let keystore = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/keys/self"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 9,
            "name": "revoked",
            "role": "user",
            "is_active": false
        })))
        .mount(&keystore)
        .await;

    let config = common::config_with_auth(
        &common::bedrock_engines_yaml("http://unused.invalid"),
        &keystore.uri(),
    );
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server
        .post("/bedrock/model/foo/converse")
        .add_header(header::AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", common::user_token())).unwrap())
        .json(&json!({}))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_and_metrics_skip_auth() {
    let keystore = MockServer::start().await;
    let config = common::config_with_auth(
        &common::bedrock_engines_yaml("http://unused.invalid"),
        &keystore.uri(),
    );
    let server = TestServer::new(common::app(config)).unwrap();

    server.get("/healthz").await.assert_status_ok();
    server.get("/metrics").await.assert_status_ok();
}
