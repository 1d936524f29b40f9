//! Error types for switchboard
//!
//! One application error enum carries every failure the HTTP boundary can
//! surface. Native-mode responses are plain text (the upstream bytes pass
//! through untouched on provider errors); OpenAI-compat responses are
//! rendered as OpenAI-format error objects by the compat layer.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: admin role required")]
    AdminRequired,

    #[error("Forbidden")]
    PathNotAllowed,

    #[error("Engine not found")]
    EngineNotFound,

    #[error("engine {engine} not available: {reason}")]
    EngineUnavailable { engine: String, reason: String },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("stream decode error: {0}")]
    StreamDecode(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Short error kind label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "auth_invalid",
            AppError::AdminRequired => "auth_forbidden",
            AppError::PathNotAllowed => "path_not_whitelisted",
            AppError::EngineNotFound => "engine_not_found",
            AppError::EngineUnavailable { .. } => "engine_unavailable",
            AppError::BadRequest(_) => "request_parse",
            AppError::Upstream(_) => "upstream_network",
            AppError::Translation(_) => "translation_fatal",
            AppError::StreamDecode(_) => "stream_decode",
            AppError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::AdminRequired | AppError::PathNotAllowed => StatusCode::FORBIDDEN,
            AppError::EngineNotFound => StatusCode::NOT_FOUND,
            AppError::EngineUnavailable { .. } | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_)
            | AppError::Translation(_)
            | AppError::StreamDecode(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error-kind marker attached to error responses; the logging middleware
/// reads it to label the error counter.
#[derive(Debug, Clone, Copy)]
pub struct ErrorKind(pub &'static str);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let mut response = (status, self.to_string()).into_response();
        response.extensions_mut().insert(ErrorKind(kind));
        response
    }
}

/// OpenAI-format error object, `{object:"error", error:{...}}`.
///
/// The compat layer surfaces every translation and upstream failure in this
/// shape so OpenAI SDK clients can decode it.
#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub object: &'static str,
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
    pub param: Option<String>,
    pub code: String,
}

impl ErrorObject {
    pub fn new(message: impl Into<String>, error_type: &str, code: &str) -> Self {
        Self {
            object: "error",
            error: ErrorBody {
                message: message.into(),
                error_type: error_type.to_string(),
                param: None,
                code: code.to_string(),
            },
        }
    }

    /// Render as an HTTP response with the given status.
    pub fn into_response_with_status(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
