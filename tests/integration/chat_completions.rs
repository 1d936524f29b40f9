//! OpenAI-compat chat completion scenarios

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::json;
use sha2::{Digest, Sha256};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

const HAIKU: &str = "anthropic.claude-3-haiku-20240307-v1:0";

async fn bedrock_server_with_converse() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/model/{HAIKU}/converse")))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::converse_response_json()))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn bedrock_non_streaming_translates_and_signs() {
    let upstream = bedrock_server_with_converse().await;
    let config = common::config_without_auth(&common::bedrock_engines_yaml(&upstream.uri()));
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server
        .post("/openai-proxy/v1/chat/completions")
        .json(&json!({
            "model": format!("bedrock/{HAIKU}"),
            "messages": [{"role": "user", "content": "2+2?"}],
            "stream": false
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["object"], "chat.completion");
    assert!(body["id"].as_str().unwrap().starts_with("chatcmpl-"));
    assert!(body["choices"][0]["message"]["content"]
        .as_str()
        .unwrap()
        .contains("2+2 equals 4."));
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["total_tokens"], 20);

    // The upstream call carried a SigV4 signature over the exact body.
    let requests = upstream.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    let auth = request.headers.get("authorization").unwrap().to_str().unwrap();
    assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
    assert!(auth.contains("/us-east-1/bedrock/aws4_request"));

    let payload_hash = request
        .headers
        .get("x-amz-content-sha256")
        .unwrap()
        .to_str()
        .unwrap();
    assert_eq!(payload_hash, hex::encode(Sha256::digest(&request.body)));
}

#[tokio::test]
async fn reasoning_effort_low_sets_thinking_budget() {
    let upstream = bedrock_server_with_converse().await;
    let config = common::config_without_auth(&common::bedrock_engines_yaml(&upstream.uri()));
    let server = TestServer::new(common::app(config)).unwrap();

    server
        .post("/openai-proxy/v1/chat/completions")
        .json(&json!({
            "model": format!("bedrock/{HAIKU}"),
            "messages": [{"role": "user", "content": "2+2?"}],
            "reasoning_effort": "low"
        }))
        .await
        .assert_status_ok();

    let requests = upstream.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["thinking"], json!({"type": "enabled", "budget_tokens": 2048}));
}

#[tokio::test]
async fn omitted_reasoning_effort_omits_thinking() {
    let upstream = bedrock_server_with_converse().await;
    let config = common::config_without_auth(&common::bedrock_engines_yaml(&upstream.uri()));
    let server = TestServer::new(common::app(config)).unwrap();

    server
        .post("/openai-proxy/v1/chat/completions")
        .json(&json!({
            "model": format!("bedrock/{HAIKU}"),
            "messages": [{"role": "user", "content": "2+2?"}]
        }))
        .await
        .assert_status_ok();

    let requests = upstream.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(sent.get("thinking").is_none());
    // Defaults land in the inference config.
    assert_eq!(sent["inferenceConfig"]["temperature"], 0.7);
    assert_eq!(sent["inferenceConfig"]["topP"], 1.0);
}

#[tokio::test]
async fn bedrock_streaming_emits_sse_frames_and_done() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/model/{HAIKU}/converse-stream")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(common::converse_stream_body(), "application/vnd.amazon.eventstream"),
        )
        .mount(&upstream)
        .await;

    let config = common::config_without_auth(&common::bedrock_engines_yaml(&upstream.uri()));
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server
        .post("/openai-proxy/v1/chat/completions")
        .json(&json!({
            "model": format!("bedrock/{HAIKU}"),
            "messages": [{"role": "user", "content": "2+2?"}],
            "stream": true
        }))
        .await;

    response.assert_status_ok();
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let body = response.text();
    let frames: Vec<&str> = body.split("\n\n").filter(|f| !f.is_empty()).collect();
    assert!(frames.len() >= 3);
    assert_eq!(*frames.last().unwrap(), "data: [DONE]");
    assert_eq!(body.matches("data: [DONE]").count(), 1);

    let mut text = String::new();
    for frame in &frames[..frames.len() - 1] {
        let json_str = frame.strip_prefix("data: ").expect("frame is a data frame");
        let chunk: serde_json::Value = serde_json::from_str(json_str).unwrap();
        assert!(chunk["id"].as_str().unwrap().starts_with("chatcmpl-"));
        assert_eq!(chunk["object"], "chat.completion.chunk");
        if let Some(content) = chunk["choices"][0]["delta"]["content"].as_str() {
            text.push_str(content);
        }
    }
    assert_eq!(text, "2+2 is 4");
}

#[tokio::test]
async fn openai_passthrough_is_identity() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-upstream",
            "object": "chat.completion",
            "created": 1,
            "model": "gpt-4o",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "4"}, "finish_reason": "stop"}]
        })))
        .mount(&upstream)
        .await;

    let config = common::config_without_auth(&common::openai_engines_yaml(&upstream.uri()));
    let server = TestServer::new(common::app(config)).unwrap();

    let client_body = json!({
        "model": "openai/gpt-4o",
        "messages": [{"role": "user", "content": "2+2?"}],
        "temperature": 0.3,
        "seed": 99,
        "stream": false
    });
    let response = server
        .post("/openai-proxy/v1/chat/completions")
        .json(&client_body)
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["id"], "chatcmpl-upstream");

    // Identity translation: what the upstream saw equals what the client
    // sent, with only the engine prefix stripped from the model.
    let requests = upstream.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let mut expected = client_body.clone();
    expected["model"] = json!("gpt-4o");
    assert_eq!(sent, expected);
    // The proxy's key went upstream, not the client's.
    assert_eq!(
        requests[0].headers.get("authorization").unwrap().to_str().unwrap(),
        "Bearer sk-test"
    );
}

#[tokio::test]
async fn unprefixed_gpt_model_routes_to_openai() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&upstream)
        .await;

    let config = common::config_without_auth(&common::openai_engines_yaml(&upstream.uri()));
    let server = TestServer::new(common::app(config)).unwrap();

    server
        .post("/openai-proxy/v1/chat/completions")
        .json(&json!({
            "model": "gpt-4o-mini",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .await
        .assert_status_ok();

    assert_eq!(upstream.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_model_family_is_rejected() {
    let config = common::config_without_auth(&common::openai_engines_yaml("http://unused.invalid"));
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server
        .post("/openai-proxy/v1/chat/completions")
        .json(&json!({
            "model": "mystery-model",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert!(response.text().contains("unsupported model"));
}

#[tokio::test]
async fn uncredentialed_engine_is_rejected() {
    // Bedrock is requested but only openai is configured.
    let config = common::config_without_auth(&common::openai_engines_yaml("http://unused.invalid"));
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server
        .post("/openai-proxy/v1/chat/completions")
        .json(&json!({
            "model": format!("bedrock/{HAIKU}"),
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    assert!(response.text().contains("not available"));
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let config = common::config_without_auth(&common::openai_engines_yaml("http://unused.invalid"));
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server
        .post("/openai-proxy/v1/chat/completions")
        .text("{not json")
        .content_type("application/json")
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let response = server
        .post("/openai-proxy/v1/chat/completions")
        .json(&json!({"model": "openai/gpt-4o", "messages": []}))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upstream_error_becomes_error_object() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("/model/{HAIKU}/converse")))
        .respond_with(
            ResponseTemplate::new(403).set_body_string("AccessDeniedException: not allowed"),
        )
        .mount(&upstream)
        .await;

    let config = common::config_without_auth(&common::bedrock_engines_yaml(&upstream.uri()));
    let server = TestServer::new(common::app(config)).unwrap();

    let response = server
        .post("/openai-proxy/v1/chat/completions")
        .json(&json!({
            "model": format!("bedrock/{HAIKU}"),
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .await;

    // Provider status is surfaced together with a body substring.
    assert_eq!(response.status_code(), 403);
    let body: serde_json::Value = response.json();
    assert_eq!(body["object"], "error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("AccessDeniedException"));
}
