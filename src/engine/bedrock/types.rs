//! Bedrock Converse wire types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `POST /model/{id}/converse` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverseRequest {
    pub messages: Vec<BedrockMessage>,
    #[serde(rename = "inferenceConfig")]
    pub inference_config: InferenceConfig,
    pub system: Vec<SystemBlock>,
    #[serde(rename = "toolConfig", skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<Thinking>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BedrockMessage {
    pub role: String,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageBlock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBlock {
    pub format: String,
    pub source: ImageSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSource {
    pub bytes: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(rename = "maxTokens", skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub temperature: f64,
    #[serde(rename = "topP")]
    pub top_p: f64,
    #[serde(rename = "stopSequences", skip_serializing_if = "Vec::is_empty", default)]
    pub stop_sequences: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    pub tools: Vec<Tool>,
    #[serde(rename = "toolChoice")]
    pub tool_choice: ToolChoice,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "toolSpec")]
    pub tool_spec: ToolSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: InputSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSchema {
    pub json: Value,
}

/// Bedrock has no native "none" choice; it maps to `auto`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolChoice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub any: Option<Empty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolName>,
}

impl ToolChoice {
    pub fn auto() -> Self {
        Self {
            auto: Some(Empty {}),
            ..Default::default()
        }
    }

    pub fn any() -> Self {
        Self {
            any: Some(Empty {}),
            ..Default::default()
        }
    }

    pub fn tool(name: &str) -> Self {
        Self {
            tool: Some(ToolName {
                name: name.to_string(),
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolName {
    pub name: String,
}

/// Extended-thinking budget derived from `reasoning_effort`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thinking {
    #[serde(rename = "type")]
    pub kind: String,
    pub budget_tokens: u32,
}

impl Thinking {
    pub fn enabled(budget_tokens: u32) -> Self {
        Self {
            kind: "enabled".to_string(),
            budget_tokens,
        }
    }
}

/// Non-streaming Converse response.
#[derive(Debug, Clone, Deserialize)]
pub struct ConverseResponse {
    pub output: ConverseOutput,
    #[serde(rename = "stopReason", default)]
    pub stop_reason: String,
    #[serde(default)]
    pub usage: BedrockUsage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConverseOutput {
    pub message: OutputMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputMessage {
    #[serde(default = "assistant_role")]
    pub role: String,
    #[serde(default)]
    pub content: Vec<OutputContent>,
}

fn assistant_role() -> String {
    "assistant".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputContent {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(rename = "toolUse", default)]
    pub tool_use: Option<ToolUse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolUse {
    #[serde(rename = "toolUseId")]
    pub tool_use_id: String,
    pub name: String,
    #[serde(default)]
    pub input: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BedrockUsage {
    #[serde(rename = "inputTokens", default)]
    pub input_tokens: u32,
    #[serde(rename = "outputTokens", default)]
    pub output_tokens: u32,
    #[serde(rename = "totalTokens", default)]
    pub total_tokens: u32,
}

/// `contentBlockDelta` frame payload. The delta object is kept raw and
/// resolved by structured parse attempts in a fixed order.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentBlockDeltaEvent {
    #[serde(rename = "contentBlockIndex", default)]
    pub content_block_index: u32,
    pub delta: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextDelta {
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolUseDelta {
    #[serde(rename = "toolUse")]
    pub tool_use: ToolUseDeltaInput,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolUseDeltaInput {
    pub input: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReasoningDelta {
    #[serde(rename = "reasoningContent")]
    pub reasoning_content: ReasoningContentDelta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReasoningContentDelta {
    #[serde(default)]
    pub text: String,
}

/// Control-plane `GET /foundation-models` response.
#[derive(Debug, Clone, Deserialize)]
pub struct FoundationModelsResponse {
    #[serde(rename = "modelSummaries", default)]
    pub model_summaries: Vec<FoundationModelSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FoundationModelSummary {
    #[serde(rename = "modelId")]
    pub model_id: String,
    #[serde(rename = "modelName", default)]
    pub model_name: String,
    #[serde(rename = "providerName", default)]
    pub provider_name: String,
    #[serde(rename = "responseStreamingSupported", default)]
    pub response_streaming_supported: bool,
    #[serde(rename = "inferenceTypesSupported", default)]
    pub inference_types_supported: Vec<String>,
    #[serde(rename = "modelLifecycle", default)]
    pub model_lifecycle: ModelLifecycle,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelLifecycle {
    #[serde(default)]
    pub status: String,
}
