//! Passthrough OpenAI-compat engines
//!
//! OpenAI, Gemini (its OpenAI layer) and Azure already speak the OpenAI
//! chat schema, so translation is identity: the canonical request is
//! re-serialized with the engine prefix stripped from `model`, and the
//! upstream response bytes are streamed back verbatim with flush-on-write.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;

use crate::engine::azure::AzureEngine;
use crate::engine::gemini::GeminiEngine;
use crate::engine::openai::OpenAiEngine;
use crate::engine::{CompatEngine, EngineError, EngineTag};

use super::schema::ChatCompletionRequest;

/// Serialize the canonical request with the engine prefix stripped.
fn identity_body(tag: EngineTag, req: &ChatCompletionRequest) -> Result<Vec<u8>, EngineError> {
    let mut forwarded = req.clone();
    forwarded.model = tag.strip_model_prefix(&req.model).to_string();
    serde_json::to_vec(&forwarded)
        .map_err(|e| EngineError::Translation(format!("failed to encode request: {e}")))
}

/// Relay status, content type and body bytes as the upstream produced
/// them. `Body::from_stream` forwards each upstream chunk as soon as it
/// arrives.
fn relay_response(upstream: reqwest::Response) -> Result<Response<Body>, EngineError> {
    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type.clone());
    if content_type.starts_with("text/event-stream") {
        builder = builder
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive");
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| EngineError::Translation(format!("failed to build response: {e}")))
}

pub struct OpenAiCompat {
    engine: Arc<OpenAiEngine>,
}

impl OpenAiCompat {
    pub fn new(engine: Arc<OpenAiEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl CompatEngine for OpenAiCompat {
    async fn transform_request(&self, req: &ChatCompletionRequest) -> Result<Vec<u8>, EngineError> {
        identity_body(EngineTag::OpenAi, req)
    }

    async fn handle_request(
        &self,
        _model: &str,
        _stream: bool,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, EngineError> {
        let resp = self
            .engine
            .http()
            .post(self.engine.chat_completions_endpoint())
            .bearer_auth(self.engine.api_key())
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        Ok(resp)
    }

    async fn send_response(
        &self,
        upstream: reqwest::Response,
        _model: &str,
        _stream: bool,
    ) -> Result<Response<Body>, EngineError> {
        relay_response(upstream)
    }
}

pub struct GeminiCompat {
    engine: Arc<GeminiEngine>,
}

impl GeminiCompat {
    pub fn new(engine: Arc<GeminiEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl CompatEngine for GeminiCompat {
    async fn transform_request(&self, req: &ChatCompletionRequest) -> Result<Vec<u8>, EngineError> {
        identity_body(EngineTag::Gemini, req)
    }

    async fn handle_request(
        &self,
        _model: &str,
        _stream: bool,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, EngineError> {
        let resp = self
            .engine
            .http()
            .post(self.engine.openai_layer_endpoint("chat/completions"))
            .bearer_auth(self.engine.api_key())
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        Ok(resp)
    }

    async fn send_response(
        &self,
        upstream: reqwest::Response,
        _model: &str,
        _stream: bool,
    ) -> Result<Response<Body>, EngineError> {
        relay_response(upstream)
    }
}

pub struct AzureCompat {
    engine: Arc<AzureEngine>,
}

impl AzureCompat {
    pub fn new(engine: Arc<AzureEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl CompatEngine for AzureCompat {
    async fn transform_request(&self, req: &ChatCompletionRequest) -> Result<Vec<u8>, EngineError> {
        identity_body(EngineTag::Azure, req)
    }

    async fn handle_request(
        &self,
        model: &str,
        _stream: bool,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, EngineError> {
        // The model id doubles as the Azure deployment name.
        let deployment = EngineTag::Azure.strip_model_prefix(model);
        let resp = self.engine.post_deployment(deployment, body).await?;
        Ok(resp)
    }

    async fn send_response(
        &self,
        upstream: reqwest::Response,
        _model: &str,
        _stream: bool,
    ) -> Result<Response<Body>, EngineError> {
        relay_response(upstream)
    }
}
