//! Shared test fixtures
//!
//! Builds app states against wiremock upstreams. Engine endpoints are
//! pointed at mock servers through the per-engine endpoint overrides.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use serde_json::json;
use switchboard::{routes, AppState, Config};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// 64 lowercase hex chars; what a well-formed API key looks like.
pub fn user_token() -> String {
    "ab".repeat(32)
}

pub fn admin_token() -> String {
    "cd".repeat(32)
}

/// Config YAML with auth disabled and the given engines section.
pub fn config_without_auth(engines_yaml: &str) -> Config {
    let yaml = format!(
        r#"
engines:
{engines_yaml}
auth:
  disabled: true
logging:
  level: debug
  format: text
"#
    );
    Config::from_yaml(&yaml).expect("test config parses")
}

/// Config YAML with bearer auth against the given key service.
pub fn config_with_auth(engines_yaml: &str, keystore_url: &str) -> Config {
    let yaml = format!(
        r#"
engines:
{engines_yaml}
keystore_url: {keystore_url}
logging:
  level: debug
  format: text
"#
    );
    Config::from_yaml(&yaml).expect("test config parses")
}

/// Bedrock engine section pointing both planes at a mock server.
pub fn bedrock_engines_yaml(mock_url: &str) -> String {
    format!(
        "  bedrock:\n    region: us-east-1\n    access_key_id: AKIDEXAMPLE\n    secret_access_key: test-secret\n    endpoint: {mock_url}\n    control_endpoint: {mock_url}\n"
    )
}

pub fn openai_engines_yaml(mock_url: &str) -> String {
    format!("  openai:\n    base_url: {mock_url}\n    api_key: sk-test\n")
}

pub fn app(config: Config) -> Router {
    let state = Arc::new(AppState::new(config).expect("app state builds"));
    routes::create_router(state)
}

/// Mount a key-service identity endpoint for the given token.
pub async fn mount_key_validation(server: &MockServer, token: &str, role: &str) {
    Mock::given(method("GET"))
        .and(path("/v1/keys/self"))
        .and(wiremock::matchers::header(
            "authorization",
            format!("Bearer {token}").as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 7,
            "name": "integration",
            "role": role,
            "is_active": true
        })))
        .mount(server)
        .await;
}

/// Converse response document used by the non-streaming scenarios.
pub fn converse_response_json() -> serde_json::Value {
    json!({
        "metrics": {"latencyMs": 411},
        "output": {"message": {"role": "assistant", "content": [{"text": "2+2 equals 4."}]}},
        "stopReason": "end_turn",
        "usage": {"inputTokens": 12, "outputTokens": 8, "totalTokens": 20}
    })
}

/// AWS event-stream body: two text deltas followed by messageEnd.
pub fn converse_stream_body() -> Vec<u8> {
    use switchboard::engine::bedrock::eventstream::encode_message;

    let mut body = Vec::new();
    body.extend(encode_message(&[(":event-type", "messageStart")], br#"{"role":"assistant"}"#));
    body.extend(encode_message(
        &[(":event-type", "contentBlockDelta")],
        br#"{"contentBlockIndex":0,"delta":{"text":"2+2 "}}"#,
    ));
    body.extend(encode_message(
        &[(":event-type", "contentBlockDelta")],
        br#"{"contentBlockIndex":0,"delta":{"text":"is 4"}}"#,
    ));
    body.extend(encode_message(&[(":event-type", "messageEnd")], b"{}"));
    body
}

/// Bedrock control-plane listing with one eligible and two filtered models.
pub fn foundation_models_json() -> serde_json::Value {
    json!({
        "modelSummaries": [
            {
                "modelId": "anthropic.claude-3-haiku-20240307-v1:0",
                "modelName": "Claude 3 Haiku",
                "providerName": "Anthropic",
                "responseStreamingSupported": true,
                "inferenceTypesSupported": ["ON_DEMAND"],
                "modelLifecycle": {"status": "ACTIVE"}
            },
            {
                "modelId": "amazon.titan-legacy-v1",
                "modelName": "Titan Legacy",
                "providerName": "Amazon",
                "responseStreamingSupported": true,
                "inferenceTypesSupported": ["ON_DEMAND"],
                "modelLifecycle": {"status": "LEGACY"}
            },
            {
                "modelId": "amazon.titan-batch-v1",
                "modelName": "Titan Batch",
                "providerName": "Amazon",
                "responseStreamingSupported": false,
                "inferenceTypesSupported": ["PROVISIONED"],
                "modelLifecycle": {"status": "ACTIVE"}
            }
        ]
    })
}
