//! OpenAI-compat surface
//!
//! `/openai-proxy/v1/chat/completions` accepts the OpenAI chat schema for
//! every configured engine; the target engine is chosen from the `model`
//! prefix (or a well-known-family heuristic) and the request/response pair
//! is transcoded by that engine's compat implementation.
//! `/openai-proxy/v1/models` unions model discovery across all credentialed
//! engines.

pub mod bedrock;
pub mod images;
pub mod passthrough;
pub mod schema;
pub mod vertex;

use std::sync::Arc;
use std::time::Instant;

use axum::body::to_bytes;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{info, warn};

use crate::engine::{EngineError, EngineTag};
use crate::error::{AppError, AppResult, ErrorObject};
use crate::proxy::forward::MAX_BODY_BYTES;
use crate::routes::metrics;
use crate::AppState;

use self::schema::{ChatCompletionRequest, ModelList};

/// POST /openai-proxy/v1/chat/completions
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> AppResult<Response> {
    let start = Instant::now();

    let body = to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::BadRequest(format!("error reading request body: {e}")))?;
    let chat_request: ChatCompletionRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("error parsing request body: {e}")))?;
    chat_request.validate().map_err(AppError::BadRequest)?;

    let model = chat_request.model.clone();
    let stream = chat_request.stream;

    let tag = EngineTag::from_model(&model).ok_or_else(|| {
        AppError::BadRequest(format!(
            "unsupported model: {model}. Use prefixes like openai/, azure/, bedrock/, vertex/ or gemini/ to specify the engine"
        ))
    })?;

    if !state.registry.available().contains(&tag) {
        return Err(AppError::EngineUnavailable {
            engine: tag.to_string(),
            reason: credential_hint(tag).to_string(),
        });
    }

    let adapter = state.registry.get(tag, &model).await.map_err(|e| {
        warn!(engine = %tag, error = %e, "error getting engine");
        AppError::EngineUnavailable {
            engine: tag.to_string(),
            reason: e.to_string(),
        }
    })?;
    let compat = adapter.compat().ok_or_else(|| AppError::EngineUnavailable {
        engine: tag.to_string(),
        reason: "engine has no OpenAI-compat support".to_string(),
    })?;

    info!(engine = %tag, model = %model, stream, "processing chat completion");

    let transformed = match compat.transform_request(&chat_request).await {
        Ok(body) => body,
        Err(e) => return Ok(engine_error_response(&e)),
    };

    let upstream = match compat.handle_request(&model, stream, transformed).await {
        Ok(resp) => resp,
        Err(e) => return Ok(engine_error_response(&e)),
    };

    let response = match compat.send_response(upstream, &model, stream).await {
        Ok(resp) => resp,
        Err(e) => return Ok(engine_error_response(&e)),
    };

    metrics::record_chat_completion(tag.as_str(), &model, start.elapsed().as_secs_f64());
    Ok(response)
}

/// GET /openai-proxy/v1/models
pub async fn list_models(State(state): State<Arc<AppState>>) -> AppResult<Response> {
    let mut data = Vec::new();

    for tag in state.registry.available() {
        let adapter = match state.registry.get(tag, "models").await {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!(engine = %tag, error = %e, "error getting engine for model listing");
                continue;
            }
        };
        match adapter.native().list_models().await {
            Ok(models) => {
                info!(engine = %tag, count = models.len(), "listed models");
                data.extend(models);
            }
            Err(e) => {
                warn!(engine = %tag, error = %e, "error listing models");
            }
        }
    }

    Ok(Json(ModelList::new(data)).into_response())
}

fn credential_hint(tag: EngineTag) -> &'static str {
    match tag {
        EngineTag::Bedrock => "check AWS credentials configuration",
        EngineTag::Vertex => "check GCP project configuration",
        _ => "check API key configuration",
    }
}

/// Engine failures surface as OpenAI-format error objects.
fn engine_error_response(e: &EngineError) -> Response {
    let (error_type, code) = match e {
        EngineError::Upstream(_) | EngineError::UpstreamStatus { .. } => {
            ("upstream_error", "upstream_error")
        }
        EngineError::StreamDecode(_) => ("upstream_error", "stream_decode_error"),
        EngineError::Config(_) | EngineError::Credentials(_) | EngineError::Translation(_) => {
            ("translation_error", "translation_error")
        }
    };
    warn!(error = %e, "chat completion failed");
    ErrorObject::new(e.to_string(), error_type, code)
        .into_response_with_status(StatusCode::INTERNAL_SERVER_ERROR)
}
