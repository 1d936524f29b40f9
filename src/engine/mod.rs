//! Engine abstraction layer
//!
//! An *engine* is a provider adapter. Every engine supports native
//! passthrough (URL rewrite + credential injection); some additionally
//! support the OpenAI-compat translation surface. The two capabilities are
//! explicit variants on [`Adapter`], decided at construction time, so the
//! dispatcher never probes for optional methods at runtime.
//!
//! Engines share no mutable state with each other and must be safe for
//! concurrent use; per-engine caches (model lists, health state) live on
//! the engine instance itself.

pub mod azure;
pub mod bedrock;
pub mod gemini;
pub mod openai;
pub mod vertex;

use std::fmt;
use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use url::Url;
use uuid::Uuid;

use crate::compat::schema::ChatCompletionRequest;

/// Stable identity of a configured provider backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineTag {
    OpenAi,
    Azure,
    Bedrock,
    Vertex,
    Gemini,
}

impl EngineTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineTag::OpenAi => "openai",
            EngineTag::Azure => "azure",
            EngineTag::Bedrock => "bedrock",
            EngineTag::Vertex => "vertex",
            EngineTag::Gemini => "gemini",
        }
    }

    pub fn all() -> [EngineTag; 5] {
        [
            EngineTag::OpenAi,
            EngineTag::Azure,
            EngineTag::Bedrock,
            EngineTag::Vertex,
            EngineTag::Gemini,
        ]
    }

    /// Resolve the engine from an OpenAI-compat `model` value.
    ///
    /// A slash-delimited prefix wins (`bedrock/anthropic.claude...`); an
    /// unprefixed model falls back to the well-known family heuristic.
    pub fn from_model(model: &str) -> Option<EngineTag> {
        if let Some((prefix, _)) = model.split_once('/') {
            return EngineTag::from_str(prefix).ok();
        }
        if model.starts_with("gpt-") || model.starts_with("text-") || model.starts_with("davinci")
        {
            return Some(EngineTag::OpenAi);
        }
        if model.starts_with("gemini-") {
            return Some(EngineTag::Gemini);
        }
        None
    }

    /// Strip this engine's `tag/` prefix from a model id, if present.
    pub fn strip_model_prefix<'a>(&self, model: &'a str) -> &'a str {
        model
            .strip_prefix(self.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(model)
    }
}

impl fmt::Display for EngineTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineTag {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(EngineTag::OpenAi),
            "azure" => Ok(EngineTag::Azure),
            "bedrock" => Ok(EngineTag::Bedrock),
            "vertex" => Ok(EngineTag::Vertex),
            "gemini" => Ok(EngineTag::Gemini),
            _ => Err(()),
        }
    }
}

/// Errors produced inside engines.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid engine config: {0}")]
    Config(String),

    #[error("missing credentials: {0}")]
    Credentials(String),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("upstream returned status {status}: {body}")]
    UpstreamStatus { status: StatusCode, body: String },

    #[error("stream decode error: {0}")]
    StreamDecode(String),
}

/// Resource pinned to an in-flight request; dropped once the response body
/// has been fully relayed (or the request abandoned).
pub type RequestGuard = Box<dyn std::any::Any + Send>;

/// Outbound request under construction.
///
/// `modify_request` implementations rewrite the URL in place and own the
/// final header set; SigV4 signing reads the body, so any body mutation
/// must happen before the signer runs.
pub struct ProxyRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Engine-attached lifetime guard (e.g. a backend connection slot).
    pub guard: Option<RequestGuard>,
}

impl ProxyRequest {
    pub fn new(method: Method, path_and_query: &str, headers: HeaderMap, body: Bytes) -> Self {
        // The placeholder origin is always replaced by the engine rewrite.
        let url = Url::parse(&format!("http://ingress.invalid{path_and_query}"))
            .unwrap_or_else(|_| Url::parse("http://ingress.invalid/").expect("static url"));
        Self {
            method,
            url,
            headers,
            body,
            guard: None,
        }
    }

    /// Point the request at a new upstream origin, keeping path and query.
    pub fn set_origin(&mut self, upstream: &Url) {
        let _ = self.url.set_scheme(upstream.scheme());
        let _ = self.url.set_host(upstream.host_str());
        let _ = self.url.set_port(upstream.port());
    }
}

/// Response metadata handed to the audit observer callback.
#[derive(Debug, Clone)]
pub struct UpstreamMeta {
    pub status: StatusCode,
    pub correlation_id: Uuid,
    pub content_length: Option<u64>,
}

/// Model descriptor in the OpenAI list-models shape, id namespaced with the
/// engine tag (e.g. `bedrock/anthropic.claude-3-haiku-20240307-v1:0`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

/// Native passthrough capability, implemented by every engine.
#[async_trait]
pub trait Engine: Send + Sync {
    fn name(&self) -> EngineTag;

    /// Whitelist check against the full ingress path (prefix included).
    fn is_allowed_path(&self, path: &str) -> bool;

    /// Rewrite the request for upstream delivery and inject credentials.
    async fn modify_request(&self, req: &mut ProxyRequest) -> Result<(), EngineError>;

    /// Post-completion observer; invoked by the audit pipeline with a
    /// reader over the full buffered response body.
    fn response_callback(&self, meta: &UpstreamMeta, body: &mut dyn Read);

    /// Provider model discovery, namespaced and cached per instance.
    async fn list_models(&self) -> Result<Vec<Model>, EngineError>;
}

/// OpenAI-compat translation capability.
#[async_trait]
pub trait CompatEngine: Send + Sync {
    /// Translate the canonical chat request into the provider body.
    async fn transform_request(&self, req: &ChatCompletionRequest) -> Result<Vec<u8>, EngineError>;

    /// Deliver the translated body upstream. Non-2xx responses are returned
    /// as-is for `send_response` to surface.
    async fn handle_request(
        &self,
        model: &str,
        stream: bool,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, EngineError>;

    /// Translate the upstream response back into OpenAI JSON or SSE.
    /// `model` is echoed into the synthesized completion objects.
    async fn send_response(
        &self,
        upstream: reqwest::Response,
        model: &str,
        stream: bool,
    ) -> Result<Response<Body>, EngineError>;
}

/// Capability set bound to a request, decided at construction time.
#[derive(Clone)]
pub enum Adapter {
    NativeOnly(Arc<dyn Engine>),
    NativeAndCompat(Arc<dyn Engine>, Arc<dyn CompatEngine>),
}

impl Adapter {
    pub fn native(&self) -> &Arc<dyn Engine> {
        match self {
            Adapter::NativeOnly(e) => e,
            Adapter::NativeAndCompat(e, _) => e,
        }
    }

    pub fn compat(&self) -> Option<&Arc<dyn CompatEngine>> {
        match self {
            Adapter::NativeOnly(_) => None,
            Adapter::NativeAndCompat(_, c) => Some(c),
        }
    }
}

/// Time-bounded model-list cache owned by an engine instance.
///
/// Readers share the lock; a miss serializes refreshers on the write lock
/// with a double-check, so concurrent callers trigger at most one upstream
/// fetch per TTL window. Failed fetches are never stored.
pub struct ModelCache {
    inner: RwLock<Option<CachedModels>>,
    ttl: Duration,
}

struct CachedModels {
    models: Vec<Model>,
    fetched_at: Instant,
}

pub const MODEL_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

impl ModelCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(None),
            ttl,
        }
    }

    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<Vec<Model>, EngineError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<Model>, EngineError>>,
    {
        {
            let guard = self.inner.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.models.clone());
                }
            }
        }

        let mut guard = self.inner.write().await;
        if let Some(cached) = guard.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.models.clone());
            }
        }

        let models = fetch().await?;
        *guard = Some(CachedModels {
            models: models.clone(),
            fetched_at: Instant::now(),
        });
        Ok(models)
    }
}
