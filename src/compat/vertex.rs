//! OpenAI-compat translation for Vertex AI
//!
//! Requests become `generateContent` bodies; streaming responses arrive as
//! a JSON array streamed over HTTP and are transcoded element-by-element
//! into OpenAI SSE chunks.

use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::engine::vertex::VertexEngine;
use crate::engine::{CompatEngine, EngineError, EngineTag};
use crate::error::ErrorObject;
use crate::streaming::{sse_frame, JsonArrayDecoder, SSE_DONE};

use super::images::resolve_image_url;
use super::schema::{
    tool_call_id, ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ContentPart,
    Delta, FunctionCall, FunctionCallDelta, MessageContent, ResponseMessage, ToolCall,
    ToolCallDelta, Usage,
};

pub struct VertexCompat {
    engine: Arc<VertexEngine>,
}

impl VertexCompat {
    pub fn new(engine: Arc<VertexEngine>) -> Self {
        Self { engine }
    }

    async fn translate_contents(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<Vec<VertexContent>, EngineError> {
        let mut contents = Vec::with_capacity(req.messages.len());
        for (i, message) in req.messages.iter().enumerate() {
            if message.role == "system" {
                warn!(index = i, "system message mapped to user role for vertex");
            }
            let role = map_role(&message.role);

            let mut parts = Vec::new();
            match &message.content {
                Some(MessageContent::Text(text)) if !text.is_empty() => {
                    parts.push(VertexPart::text(text));
                }
                Some(MessageContent::Parts(message_parts)) => {
                    for part in message_parts {
                        match part {
                            ContentPart::Text { text } if !text.is_empty() => {
                                parts.push(VertexPart::text(text));
                            }
                            ContentPart::Text { .. } => {}
                            ContentPart::ImageUrl { image_url } => {
                                match resolve_image_url(self.engine.http(), &image_url.url).await {
                                    Ok(image) => parts.push(VertexPart::inline_data(
                                        &image.mime_type,
                                        &image.base64_data,
                                    )),
                                    Err(e) => {
                                        warn!(error = %e, "dropping image part");
                                    }
                                }
                            }
                        }
                    }
                }
                _ => {}
            }

            if parts.is_empty() {
                debug!(index = i, role = %message.role, "skipping message with no parts");
                continue;
            }
            contents.push(VertexContent {
                role: role.to_string(),
                parts,
            });
        }
        Ok(contents)
    }
}

#[derive(Debug, Serialize)]
struct VertexContent {
    role: String,
    parts: Vec<VertexPart>,
}

#[derive(Debug, Serialize)]
struct VertexPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

impl VertexPart {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }

    fn inline_data(mime_type: &str, data: &str) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.to_string(),
                data: data.to_string(),
            }),
        }
    }
}

fn map_role(role: &str) -> &'static str {
    match role {
        "user" => "user",
        "assistant" => "model",
        "system" => "user",
        "tool" => "function",
        other => {
            warn!(role = other, "unknown role, mapping to user");
            "user"
        }
    }
}

fn build_generation_config(req: &ChatCompletionRequest) -> Value {
    let mut config = serde_json::Map::new();
    if let Some(max_tokens) = req.max_tokens {
        if max_tokens > 0 {
            config.insert("maxOutputTokens".into(), json!(max_tokens));
        }
    }
    if let Some(temperature) = req.temperature {
        config.insert("temperature".into(), json!(temperature));
    }
    if let Some(top_p) = req.top_p {
        config.insert("topP".into(), json!(top_p));
    }
    if let Some(stop) = &req.stop {
        let sequences = stop.as_vec();
        if !sequences.is_empty() && sequences.iter().any(|s| !s.is_empty()) {
            config.insert("stopSequences".into(), json!(sequences));
        }
    }
    Value::Object(config)
}

fn build_tools(req: &ChatCompletionRequest) -> Option<Value> {
    if req.tools.is_empty() {
        return None;
    }
    let mut declarations = Vec::new();
    for (i, tool) in req.tools.iter().enumerate() {
        if tool.kind != "function" {
            warn!(index = i, kind = %tool.kind, "skipping unsupported tool type");
            continue;
        }
        if tool.function.name.is_empty() {
            warn!(index = i, "skipping tool without a name");
            continue;
        }
        declarations.push(json!({
            "name": tool.function.name,
            "description": tool.function.description,
            "parameters": tool.function.parameters.clone().unwrap_or_else(|| json!({})),
        }));
    }
    if declarations.is_empty() {
        return None;
    }
    Some(json!([{"functionDeclarations": declarations}]))
}

fn map_finish_reason(reason: &str) -> String {
    match reason.to_uppercase().as_str() {
        "STOP" => "stop",
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" => "content_filter",
        "TOOL_CALLS" => "tool_calls",
        other => {
            debug!(reason = other, "unmapped vertex finish reason");
            "stop"
        }
    }
    .to_string()
}

/// `location:model` syntax lets the request pin a region.
fn split_location_override(model_id: &str) -> (Option<&str>, &str) {
    match model_id.split_once(':') {
        Some((location, model)) if !location.is_empty() && !model.is_empty() => {
            (Some(location), model)
        }
        _ => (None, model_id),
    }
}

fn candidate_text(candidate: &Value) -> Option<String> {
    let parts = candidate.get("content")?.get("parts")?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn candidate_function_call(candidate: &Value) -> Option<FunctionCall> {
    let parts = candidate.get("content")?.get("parts")?.as_array()?;
    for part in parts {
        if let Some(call) = part.get("functionCall") {
            let name = call.get("name")?.as_str()?.to_string();
            let arguments = call
                .get("args")
                .map(|args| serde_json::to_string(args).unwrap_or_else(|_| "{}".to_string()))
                .unwrap_or_else(|| "{}".to_string());
            return Some(FunctionCall { name, arguments });
        }
    }
    None
}

fn usage_from_metadata(response: &Value) -> Usage {
    let metadata = response.get("usageMetadata");
    let prompt = metadata
        .and_then(|m| m.get("promptTokenCount"))
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    let total = metadata
        .and_then(|m| m.get("totalTokenCount"))
        .and_then(Value::as_u64)
        .unwrap_or(0) as u32;
    let completion = metadata
        .and_then(|m| m.get("candidatesTokenCount"))
        .and_then(Value::as_u64)
        .map(|c| c as u32)
        .unwrap_or_else(|| total.saturating_sub(prompt));
    Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: if total > 0 { total } else { prompt + completion },
    }
}

/// One streamed array element to one OpenAI chunk, when it carries content,
/// a tool call, or a finish reason.
fn transcode_element(element: &Value, model: &str) -> Option<ChatCompletionChunk> {
    let candidate = element.get("candidates")?.as_array()?.first()?;

    let content = candidate_text(candidate);
    let tool_call = candidate_function_call(candidate);
    let finish_reason = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .map(map_finish_reason);

    if content.is_none() && tool_call.is_none() && finish_reason.is_none() {
        return None;
    }

    let delta = Delta {
        content,
        tool_calls: tool_call.map(|call| {
            vec![ToolCallDelta {
                index: 0,
                id: Some(tool_call_id()),
                kind: Some("function".to_string()),
                function: Some(FunctionCallDelta {
                    name: Some(call.name),
                    arguments: Some(call.arguments),
                }),
            }]
        }),
        ..Default::default()
    };
    Some(ChatCompletionChunk::new(model, delta, finish_reason))
}

fn build_completion(model: &str, response: &Value) -> Result<ChatCompletionResponse, EngineError> {
    let candidate = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| {
            let block_reason = response
                .get("promptFeedback")
                .and_then(|f| f.get("blockReason"))
                .and_then(Value::as_str);
            match block_reason {
                Some(reason) => {
                    EngineError::Translation(format!("vertex request blocked: {reason}"))
                }
                None => EngineError::Translation("vertex response has no candidates".to_string()),
            }
        })?;

    let content = candidate_text(candidate);
    let tool_call = candidate_function_call(candidate);
    let finish_reason = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .map(map_finish_reason)
        .unwrap_or_else(|| "stop".to_string());

    let message = ResponseMessage {
        role: "assistant".to_string(),
        content,
        tool_calls: tool_call.map(|call| {
            vec![ToolCall {
                id: tool_call_id(),
                kind: "function".to_string(),
                function: call,
            }]
        }),
    };

    let mut completion = ChatCompletionResponse::new(model, message, Some(finish_reason));
    completion.usage = Some(usage_from_metadata(response));
    Ok(completion)
}

#[async_trait]
impl CompatEngine for VertexCompat {
    async fn transform_request(&self, req: &ChatCompletionRequest) -> Result<Vec<u8>, EngineError> {
        let contents = self.translate_contents(req).await?;
        if contents.is_empty() {
            warn!("translation produced an empty vertex contents list");
        }

        let mut body = serde_json::Map::new();
        body.insert(
            "contents".into(),
            serde_json::to_value(&contents)
                .map_err(|e| EngineError::Translation(format!("failed to encode contents: {e}")))?,
        );
        body.insert("generationConfig".into(), build_generation_config(req));
        if let Some(tools) = build_tools(req) {
            body.insert("tools".into(), tools);
        }

        serde_json::to_vec(&Value::Object(body))
            .map_err(|e| EngineError::Translation(format!("failed to encode vertex body: {e}")))
    }

    async fn handle_request(
        &self,
        model: &str,
        stream: bool,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, EngineError> {
        let model_id = EngineTag::Vertex.strip_model_prefix(model);
        let (location_override, model_id) = split_location_override(model_id);
        let location = location_override.unwrap_or(self.engine.default_location());

        // Project id is validated before any upstream contact.
        let project_id = self.engine.resolved_project_id()?;
        let base = self.engine.endpoint_for_location(location)?;

        let action = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let url = format!(
            "{}/v1beta1/projects/{project_id}/locations/{location}/publishers/google/models/{model_id}:{action}",
            base.as_str().trim_end_matches('/')
        );

        let token = self.engine.tokens().token().await?;
        let resp = self
            .engine
            .http()
            .post(url)
            .bearer_auth(token)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        Ok(resp)
    }

    async fn send_response(
        &self,
        upstream: reqwest::Response,
        model: &str,
        stream: bool,
    ) -> Result<Response<Body>, EngineError> {
        let status = upstream.status();
        if !status.is_success() {
            let body = upstream.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body.chars().take(500).collect::<String>(), "vertex API error");
            return Ok(ErrorObject::new(
                format!("upstream vertex error (status {})", status.as_u16()),
                "vertex_error",
                "vertex_error",
            )
            .into_response_with_status(status));
        }

        let model = EngineTag::Vertex.strip_model_prefix(model).to_string();

        if !stream {
            let body: Value = upstream.json().await.map_err(|e| {
                EngineError::Translation(format!("error decoding vertex response: {e}"))
            })?;
            let completion = build_completion(&model, &body)?;
            let encoded = serde_json::to_vec(&completion).map_err(|e| {
                EngineError::Translation(format!("failed to encode completion: {e}"))
            })?;
            return Ok(Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(encoded))
                .expect("static response parts"));
        }

        // Streaming: decode the JSON array incrementally. Read until the
        // first element so a malformed stream start becomes a plain error
        // response instead of a broken SSE stream.
        let mut bytes_stream = upstream.bytes_stream();
        let mut decoder = JsonArrayDecoder::new();
        let mut pending: Vec<Value> = Vec::new();

        while pending.is_empty() && !decoder.finished() {
            match bytes_stream.next().await {
                Some(Ok(chunk)) => {
                    let mut elements = decoder
                        .feed(&chunk)
                        .map_err(|e| EngineError::StreamDecode(e.to_string()))?;
                    pending.append(&mut elements);
                }
                Some(Err(e)) => return Err(EngineError::Upstream(e)),
                None => break,
            }
        }

        let exhausted = decoder.finished();
        let body_stream = stream! {
            let mut decoder = decoder;
            for element in &pending {
                if let Some(chunk) = transcode_element(element, &model) {
                    match sse_frame(&chunk) {
                        Ok(frame) => yield Ok::<Bytes, std::io::Error>(frame),
                        Err(e) => warn!(error = %e, "failed to encode chunk"),
                    }
                }
            }

            if !exhausted {
                while let Some(chunk) = bytes_stream.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            warn!(error = %e, "vertex stream read failed, closing");
                            return;
                        }
                    };
                    let elements = match decoder.feed(&chunk) {
                        Ok(elements) => elements,
                        Err(e) => {
                            warn!(error = %e, "vertex stream decode failed, closing");
                            return;
                        }
                    };
                    for element in elements {
                        if let Some(chunk) = transcode_element(&element, &model) {
                            match sse_frame(&chunk) {
                                Ok(frame) => yield Ok(frame),
                                Err(e) => warn!(error = %e, "failed to encode chunk"),
                            }
                        }
                    }
                }
                if decoder.has_partial() {
                    warn!("vertex stream ended with an incomplete element, closing");
                    return;
                }
            }

            yield Ok(Bytes::from_static(SSE_DONE));
        };

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .header(header::CONNECTION, "keep-alive")
            .body(Body::from_stream(body_stream))
            .expect("static response parts"))
    }
}
