//! Gemini engine
//!
//! Routes ingress traffic to the Gemini API. OpenAI-shaped paths are
//! normalized onto the Gemini OpenAI-compatibility layer
//! (`/{version}/openai/...`) with the API key as a bearer; raw Gemini
//! paths keep their shape and use the `x-goog-api-key` header instead.

use std::io::Read;

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use super::{Engine, EngineError, EngineTag, Model, ModelCache, ProxyRequest, UpstreamMeta, MODEL_CACHE_TTL};

const PREFIX: &str = "/gemini";
const WHITELIST: &[&str] = &["/chat/completions", "/responses", "/embeddings", "/models"];
const DEFAULT_BASE: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_VERSION: &str = "v1beta";

#[derive(Debug, Default, Deserialize)]
struct GeminiConfig {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    api_version: Option<String>,
}

fn parse_config(config_str: &str) -> Result<GeminiConfig, EngineError> {
    if config_str.trim().is_empty() || config_str.trim() == "null" {
        return Ok(GeminiConfig::default());
    }
    serde_yaml::from_str(config_str)
        .map_err(|e| EngineError::Config(format!("error parsing gemini config: {e}")))
}

fn resolve_api_key(config: &GeminiConfig) -> Option<String> {
    config
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()))
}

pub struct GeminiEngine {
    backend: Url,
    api_key: String,
    api_version: String,
    http: reqwest::Client,
    model_cache: ModelCache,
}

impl GeminiEngine {
    pub fn from_config(config_str: &str, http: reqwest::Client) -> Result<Self, EngineError> {
        let config = parse_config(config_str)?;
        let api_key = resolve_api_key(&config).ok_or_else(|| {
            EngineError::Credentials("GEMINI_API_KEY must be set for gemini".to_string())
        })?;

        let base = config.base_url.unwrap_or_else(|| DEFAULT_BASE.to_string());
        let backend = Url::parse(&base)
            .map_err(|e| EngineError::Config(format!("invalid gemini base_url: {e}")))?;

        Ok(Self {
            backend,
            api_key,
            api_version: config
                .api_version
                .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            http,
            model_cache: ModelCache::new(MODEL_CACHE_TTL),
        })
    }

    pub fn has_credentials(config_str: &str) -> bool {
        parse_config(config_str)
            .map(|c| resolve_api_key(&c).is_some())
            .unwrap_or(false)
    }

    pub fn backend(&self) -> &Url {
        &self.backend
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// OpenAI-compat layer endpoint, e.g. `{base}/v1beta/openai/chat/completions`.
    pub fn openai_layer_endpoint(&self, suffix: &str) -> String {
        format!(
            "{}/{}/openai/{}",
            self.backend.as_str().trim_end_matches('/'),
            self.api_version,
            suffix.trim_start_matches('/')
        )
    }

    async fn fetch_models(&self) -> Result<Vec<Model>, EngineError> {
        let resp = self
            .http
            .get(self.openai_layer_endpoint("models"))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, "gemini model listing failed");
            return Err(EngineError::UpstreamStatus {
                status,
                body: body.chars().take(500).collect(),
            });
        }

        #[derive(Deserialize)]
        struct Listing {
            #[serde(default)]
            data: Vec<ListedModel>,
        }
        #[derive(Deserialize)]
        struct ListedModel {
            id: String,
            #[serde(default)]
            object: String,
            #[serde(default)]
            created: i64,
            #[serde(default)]
            owned_by: String,
        }

        let listing: Listing = resp.json().await?;
        let models = listing
            .data
            .into_iter()
            .map(|m| {
                let id = m.id.strip_prefix("models/").unwrap_or(&m.id).to_string();
                Model {
                    id: format!("gemini/{id}"),
                    name: id,
                    object: m.object,
                    created: m.created,
                    owned_by: m.owned_by,
                }
            })
            .collect::<Vec<_>>();

        info!(count = models.len(), "discovered gemini models");
        Ok(models)
    }
}

#[async_trait]
impl Engine for GeminiEngine {
    fn name(&self) -> EngineTag {
        EngineTag::Gemini
    }

    fn is_allowed_path(&self, path: &str) -> bool {
        let trimmed = path.strip_prefix(PREFIX).unwrap_or(path);
        let allowed = WHITELIST.iter().any(|suffix| trimmed.contains(suffix));
        if !allowed {
            warn!(path, "path is not allowed for gemini");
        }
        allowed
    }

    async fn modify_request(&self, req: &mut ProxyRequest) -> Result<(), EngineError> {
        let path = req.url.path().to_string();
        let trimmed = path.strip_prefix(PREFIX).unwrap_or(&path);

        // `/gemini/v1/...` is OpenAI-shaped; everything else is raw Gemini.
        let openai_shaped = trimmed.starts_with("/v1/");
        let new_path = if openai_shaped {
            let suffix = trimmed.trim_start_matches("/v1/");
            format!("/{}/openai/{suffix}", self.api_version)
        } else {
            trimmed.to_string()
        };
        req.url.set_path(&new_path);
        req.set_origin(&self.backend);

        req.headers.remove("x-goog-api-key");
        req.headers.remove(AUTHORIZATION);
        if openai_shaped {
            let value = format!("Bearer {}", self.api_key)
                .parse()
                .map_err(|_| EngineError::Config("gemini api key is not a valid header".into()))?;
            req.headers.insert(AUTHORIZATION, value);
        } else {
            let value = self
                .api_key
                .parse()
                .map_err(|_| EngineError::Config("gemini api key is not a valid header".into()))?;
            req.headers.insert("x-goog-api-key", value);
        }
        Ok(())
    }

    fn response_callback(&self, meta: &UpstreamMeta, body: &mut dyn Read) {
        let length = std::io::copy(body, &mut std::io::sink()).unwrap_or(0);
        info!(
            status = meta.status.as_u16(),
            correlation_id = %meta.correlation_id,
            body_length = length,
            "gemini response observed"
        );
    }

    async fn list_models(&self) -> Result<Vec<Model>, EngineError> {
        self.model_cache.get_or_fetch(|| self.fetch_models()).await
    }
}
