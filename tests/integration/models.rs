//! Model discovery across credentialed engines

use axum_test::TestServer;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn bedrock_only_credentials_list_bedrock_models() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/foundation-models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::foundation_models_json()))
        .mount(&upstream)
        .await;

    let config = common::config_without_auth(&common::bedrock_engines_yaml(&upstream.uri()));
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server.get("/openai-proxy/v1/models").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["object"], "list");

    let data = body["data"].as_array().unwrap();
    assert!(!data.is_empty());
    for model in data {
        assert!(model["id"].as_str().unwrap().starts_with("bedrock/"));
    }

    // One eligible model, emitted with its cross-region variant; legacy and
    // non-streaming entries were filtered out.
    let ids: Vec<&str> = data.iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert_eq!(
        ids,
        vec![
            "bedrock/anthropic.claude-3-haiku-20240307-v1:0",
            "bedrock/us.anthropic.claude-3-haiku-20240307-v1:0",
        ]
    );

    // The control-plane call was signed with the empty-body hash.
    let requests = upstream.received_requests().await.unwrap();
    assert_eq!(
        requests[0]
            .headers
            .get("x-amz-content-sha256")
            .unwrap()
            .to_str()
            .unwrap(),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[tokio::test]
async fn listing_is_cached_across_calls() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/foundation-models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::foundation_models_json()))
        .expect(1)
        .mount(&upstream)
        .await;

    let config = common::config_without_auth(&common::bedrock_engines_yaml(&upstream.uri()));
    let server = TestServer::new(common::app(config)).unwrap();

    for _ in 0..3 {
        server.get("/openai-proxy/v1/models").await.assert_status_ok();
    }
    // The mock's expect(1) is verified on drop.
}

#[tokio::test]
async fn discovery_failures_are_skipped_not_fatal() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/foundation-models"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"id": "gpt-4o", "object": "model", "created": 1, "owned_by": "openai"}
            ]
        })))
        .mount(&upstream)
        .await;

    let engines = format!(
        "{}{}",
        common::bedrock_engines_yaml(&upstream.uri()),
        common::openai_engines_yaml(&upstream.uri())
    );
    let config = common::config_without_auth(&engines);
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server.get("/openai-proxy/v1/models").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let ids: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["openai/gpt-4o"]);
}
