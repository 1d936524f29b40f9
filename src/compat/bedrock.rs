//! OpenAI-compat translation for Bedrock
//!
//! Requests become Converse bodies; responses come back either as a single
//! Converse JSON document or as AWS event-stream frames that are transcoded
//! into OpenAI SSE chunks on the fly.

use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, warn};
use url::Url;

use crate::engine::bedrock::eventstream::{EventStreamDecoder, EventStreamMessage};
use crate::engine::bedrock::types::{
    BedrockMessage, ContentBlock, ContentBlockDeltaEvent, ConverseRequest, ConverseResponse,
    ImageBlock, ImageSource, InferenceConfig, InputSchema, ReasoningDelta, SystemBlock, TextDelta,
    Thinking, Tool, ToolChoice, ToolConfig, ToolSpec, ToolUseDelta,
};
use crate::engine::bedrock::BedrockEngine;
use crate::engine::{CompatEngine, EngineError, EngineTag};
use crate::streaming::{sse_frame, SSE_DONE};

use super::images::resolve_image_url;
use super::schema::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ContentPart, Delta,
    FunctionCall, FunctionCallDelta, MessageContent, ResponseMessage, ToolCall, ToolCallDelta,
    Usage,
};

const DEFAULT_SYSTEM_PROMPT: &str = "You are an assistant.";
const EVENT_STREAM_CONTENT_TYPE: &str = "application/vnd.amazon.eventstream";

const THINKING_BUDGET_LOW: u32 = 2_048;
const THINKING_BUDGET_MEDIUM: u32 = 8_192;
const THINKING_BUDGET_HIGH: u32 = 32_768;

pub struct BedrockCompat {
    engine: Arc<BedrockEngine>,
}

impl BedrockCompat {
    pub fn new(engine: Arc<BedrockEngine>) -> Self {
        Self { engine }
    }

    async fn translate_messages(
        &self,
        req: &ChatCompletionRequest,
    ) -> Result<Vec<BedrockMessage>, EngineError> {
        let mut messages = Vec::with_capacity(req.messages.len());
        for message in &req.messages {
            let mut content = Vec::new();
            match &message.content {
                Some(MessageContent::Text(text)) => {
                    content.push(ContentBlock {
                        text: Some(text.clone()),
                        image: None,
                    });
                }
                Some(MessageContent::Parts(parts)) => {
                    for part in parts {
                        match part {
                            ContentPart::Text { text } => content.push(ContentBlock {
                                text: Some(text.clone()),
                                image: None,
                            }),
                            ContentPart::ImageUrl { image_url } => {
                                match resolve_image_url(self.engine.http(), &image_url.url).await {
                                    Ok(image) => content.push(ContentBlock {
                                        text: None,
                                        image: Some(ImageBlock {
                                            format: image.format(),
                                            source: ImageSource {
                                                bytes: image.base64_data,
                                            },
                                        }),
                                    }),
                                    Err(e) => {
                                        // Recoverable: the request proceeds
                                        // without this part.
                                        warn!(error = %e, "dropping image part");
                                    }
                                }
                            }
                        }
                    }
                }
                None => {}
            }
            messages.push(BedrockMessage {
                role: message.role.clone(),
                content,
            });
        }
        Ok(messages)
    }
}

fn build_inference_config(req: &ChatCompletionRequest) -> InferenceConfig {
    InferenceConfig {
        max_tokens: req.max_tokens,
        temperature: req.temperature.unwrap_or(0.7),
        top_p: req.top_p.unwrap_or(1.0),
        stop_sequences: req.stop.as_ref().map(|s| s.as_vec()).unwrap_or_default(),
    }
}

fn build_tool_config(req: &ChatCompletionRequest) -> Option<ToolConfig> {
    if req.tools.is_empty() {
        return None;
    }

    let mut tools = Vec::new();
    for (i, tool) in req.tools.iter().enumerate() {
        if tool.kind != "function" {
            warn!(index = i, kind = %tool.kind, "dropping unsupported tool type");
            continue;
        }
        if tool.function.name.is_empty() {
            warn!(index = i, "dropping tool without a name");
            continue;
        }
        let description = if tool.function.description.is_empty() {
            "No description provided.".to_string()
        } else {
            tool.function.description.clone()
        };
        tools.push(Tool {
            tool_spec: ToolSpec {
                name: tool.function.name.clone(),
                description,
                input_schema: InputSchema {
                    json: tool
                        .function
                        .parameters
                        .clone()
                        .unwrap_or_else(|| serde_json::json!({})),
                },
            },
        });
    }
    if tools.is_empty() {
        return None;
    }

    let tool_choice = match &req.tool_choice {
        Some(serde_json::Value::String(s)) => match s.as_str() {
            "required" => ToolChoice::any(),
            // Bedrock has no "none"; auto is the closest behavior.
            "auto" | "none" => ToolChoice::auto(),
            other => {
                warn!(choice = other, "unknown tool_choice string, defaulting to auto");
                ToolChoice::auto()
            }
        },
        Some(serde_json::Value::Object(map)) => map
            .get("function")
            .and_then(|f| f.get("name"))
            .and_then(|n| n.as_str())
            .map(ToolChoice::tool)
            .unwrap_or_else(ToolChoice::auto),
        _ => ToolChoice::auto(),
    };

    Some(ToolConfig { tools, tool_choice })
}

/// `reasoning_effort` to thinking budget; absent effort omits the object.
fn build_thinking(reasoning_effort: Option<&str>) -> Option<Thinking> {
    let effort = reasoning_effort?;
    let budget = match effort {
        "low" => THINKING_BUDGET_LOW,
        "medium" => THINKING_BUDGET_MEDIUM,
        "high" => THINKING_BUDGET_HIGH,
        other => {
            warn!(effort = other, "unknown reasoning_effort, defaulting to medium");
            THINKING_BUDGET_MEDIUM
        }
    };
    Some(Thinking::enabled(budget))
}

fn map_stop_reason(stop_reason: &str) -> String {
    match stop_reason {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        "content_filtered" | "guardrail_intervened" => "content_filter",
        other => {
            debug!(stop_reason = other, "unmapped bedrock stop reason");
            "stop"
        }
    }
    .to_string()
}

/// Turn one event-stream frame into an SSE frame, when it produces one.
fn transcode_event(msg: &EventStreamMessage, model: &str, done: &mut bool) -> Option<Bytes> {
    match msg.event_type() {
        Some("messageStart") => None,
        Some("messageEnd") | Some("messageStop") => {
            if *done {
                return None;
            }
            *done = true;
            Some(Bytes::from_static(SSE_DONE))
        }
        Some("contentBlockDelta") => {
            let event: ContentBlockDeltaEvent = match serde_json::from_slice(&msg.payload) {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "dropping malformed contentBlockDelta payload");
                    return None;
                }
            };

            // Structured parse attempts, in order: text, tool call, thinking.
            let delta = if let Ok(text) = serde_json::from_value::<TextDelta>(event.delta.clone()) {
                Delta {
                    content: Some(text.text),
                    ..Default::default()
                }
            } else if let Ok(tool) = serde_json::from_value::<ToolUseDelta>(event.delta.clone()) {
                Delta {
                    tool_calls: Some(vec![ToolCallDelta {
                        index: 0,
                        id: None,
                        kind: Some("function".to_string()),
                        function: Some(FunctionCallDelta {
                            name: None,
                            arguments: Some(tool.tool_use.input),
                        }),
                    }]),
                    ..Default::default()
                }
            } else if let Ok(thinking) = serde_json::from_value::<ReasoningDelta>(event.delta.clone())
            {
                Delta {
                    reasoning_content: Some(thinking.reasoning_content.text),
                    ..Default::default()
                }
            } else {
                warn!(delta = %event.delta, "dropping unrecognized delta shape");
                return None;
            };

            let chunk = ChatCompletionChunk::new(model, delta, None);
            match sse_frame(&chunk) {
                Ok(frame) => Some(frame),
                Err(e) => {
                    warn!(error = %e, "failed to encode chunk");
                    None
                }
            }
        }
        other => {
            debug!(event_type = ?other, "dropping unknown event type");
            None
        }
    }
}

fn build_completion(model: &str, resp: ConverseResponse) -> ChatCompletionResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for item in resp.output.message.content {
        if let Some(text) = item.text {
            content.push_str(&text);
        }
        if let Some(tool_use) = item.tool_use {
            tool_calls.push(ToolCall {
                id: tool_use.tool_use_id,
                kind: "function".to_string(),
                function: FunctionCall {
                    name: tool_use.name,
                    arguments: serde_json::to_string(&tool_use.input).unwrap_or_default(),
                },
            });
        }
    }

    let message = ResponseMessage {
        role: resp.output.message.role,
        content: Some(content),
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
    };

    let mut completion =
        ChatCompletionResponse::new(model, message, Some(map_stop_reason(&resp.stop_reason)));
    completion.usage = Some(Usage {
        prompt_tokens: resp.usage.input_tokens,
        completion_tokens: resp.usage.output_tokens,
        total_tokens: resp.usage.total_tokens,
    });
    completion
}

fn stream_response(upstream: reqwest::Response, model: String) -> Response<Body> {
    let mut bytes_stream = upstream.bytes_stream();

    let body_stream = stream! {
        let mut decoder = EventStreamDecoder::new();
        let mut done = false;
        while let Some(chunk) = bytes_stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(error = %e, "bedrock stream read failed, closing");
                    break;
                }
            };
            let messages = match decoder.feed(&chunk) {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(error = %e, "bedrock stream framing broken, closing");
                    break;
                }
            };
            for msg in messages {
                if let Some(frame) = transcode_event(&msg, &model, &mut done) {
                    yield Ok::<Bytes, std::io::Error>(frame);
                }
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body_stream))
        .expect("static response parts")
}

async fn upstream_error_response(upstream: reqwest::Response) -> Response<Body> {
    let status = upstream.status();
    let body = upstream.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), body = %body.chars().take(500).collect::<String>(), "bedrock API error");
    crate::error::ErrorObject::new(
        format!(
            "bedrock returned status {}: {}",
            status.as_u16(),
            body.chars().take(500).collect::<String>()
        ),
        "upstream_error",
        "bedrock_error",
    )
    .into_response_with_status(status)
}

#[async_trait]
impl CompatEngine for BedrockCompat {
    async fn transform_request(&self, req: &ChatCompletionRequest) -> Result<Vec<u8>, EngineError> {
        let mut messages = self.translate_messages(req).await?;

        // The first system message becomes the top-level system array.
        let system = if messages.first().map(|m| m.role == "system").unwrap_or(false) {
            let lifted = messages.remove(0);
            let text = lifted
                .content
                .into_iter()
                .filter_map(|c| c.text)
                .collect::<Vec<_>>()
                .join("");
            vec![SystemBlock { text }]
        } else {
            vec![SystemBlock {
                text: DEFAULT_SYSTEM_PROMPT.to_string(),
            }]
        };

        let converse = ConverseRequest {
            messages,
            inference_config: build_inference_config(req),
            system,
            tool_config: build_tool_config(req),
            thinking: build_thinking(req.reasoning_effort.as_deref()),
        };

        serde_json::to_vec(&converse)
            .map_err(|e| EngineError::Translation(format!("failed to encode converse body: {e}")))
    }

    async fn handle_request(
        &self,
        model: &str,
        stream: bool,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, EngineError> {
        let model_id = EngineTag::Bedrock.strip_model_prefix(model);
        let suffix = if stream { "converse-stream" } else { "converse" };
        let endpoint = format!(
            "{}/model/{model_id}/{suffix}",
            self.engine.backend().as_str().trim_end_matches('/')
        );
        let url = Url::parse(&endpoint)
            .map_err(|e| EngineError::Translation(format!("invalid bedrock endpoint: {e}")))?;

        self.engine
            .send_signed(Method::POST, url, body, Some("application/json"))
            .await
    }

    async fn send_response(
        &self,
        upstream: reqwest::Response,
        model: &str,
        _stream: bool,
    ) -> Result<Response<Body>, EngineError> {
        if !upstream.status().is_success() {
            return Ok(upstream_error_response(upstream).await);
        }

        let is_event_stream = upstream
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with(EVENT_STREAM_CONTENT_TYPE))
            .unwrap_or(false);

        if is_event_stream {
            let model = EngineTag::Bedrock.strip_model_prefix(model).to_string();
            return Ok(stream_response(upstream, model));
        }

        let resp: ConverseResponse = upstream.json().await.map_err(|e| {
            EngineError::Translation(format!("error decoding bedrock response: {e}"))
        })?;
        let completion = build_completion(EngineTag::Bedrock.strip_model_prefix(model), resp);
        let body = serde_json::to_vec(&completion)
            .map_err(|e| EngineError::Translation(format!("failed to encode completion: {e}")))?;

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .expect("static response parts"))
    }
}
