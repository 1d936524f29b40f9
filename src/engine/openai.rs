//! OpenAI engine
//!
//! Native passthrough to the OpenAI API. Ingress paths under `/openai` are
//! rebased onto the configured backend with the proxy-owned API key.

use std::io::Read;

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use super::{Engine, EngineError, EngineTag, Model, ModelCache, ProxyRequest, UpstreamMeta, MODEL_CACHE_TTL};

const PREFIX: &str = "/openai";
const WHITELIST: &[&str] = &[
    "/v1/chat/completions",
    "/v1/completions",
    "/v1/models",
    "/v1/embeddings",
    "/v1/responses",
];

#[derive(Debug, Deserialize)]
struct OpenAiConfig {
    base_url: String,
    api_key: String,
    #[serde(default)]
    #[allow(dead_code)]
    api_version: Option<String>,
}

pub struct OpenAiEngine {
    backend: Url,
    api_key: String,
    http: reqwest::Client,
    model_cache: ModelCache,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<UpstreamModel>,
}

#[derive(Debug, Deserialize)]
struct UpstreamModel {
    id: String,
    #[serde(default)]
    object: String,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    owned_by: String,
}

impl OpenAiEngine {
    pub fn from_config(config_str: &str, http: reqwest::Client) -> Result<Self, EngineError> {
        let config: OpenAiConfig = serde_yaml::from_str(config_str)
            .map_err(|e| EngineError::Config(format!("error parsing openai config: {e}")))?;
        if config.base_url.trim().is_empty() || config.api_key.trim().is_empty() {
            return Err(EngineError::Config(
                "error parsing openai config: missing base_url or api_key".to_string(),
            ));
        }

        let backend = Url::parse(&config.base_url)
            .map_err(|e| EngineError::Config(format!("invalid openai base_url: {e}")))?;

        Ok(Self {
            backend,
            api_key: config.api_key,
            http,
            model_cache: ModelCache::new(MODEL_CACHE_TTL),
        })
    }

    pub fn has_credentials(config_str: &str) -> bool {
        serde_yaml::from_str::<OpenAiConfig>(config_str)
            .map(|c| !c.api_key.trim().is_empty())
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

    /// `{base}/v1/models`, tolerating a base URL that already ends in `/v1`.
    pub fn models_endpoint(&self) -> String {
        let base = self.backend.as_str().trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/models")
        } else {
            format!("{base}/v1/models")
        }
    }

    /// `{base}/v1/chat/completions`, tolerating a `/v1` base.
    pub fn chat_completions_endpoint(&self) -> String {
        let base = self.backend.as_str().trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    async fn fetch_models(&self) -> Result<Vec<Model>, EngineError> {
        let resp = self
            .http
            .get(self.models_endpoint())
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, "openai model listing failed");
            return Err(EngineError::UpstreamStatus {
                status,
                body: body.chars().take(500).collect(),
            });
        }

        let listing: ModelsResponse = resp.json().await?;
        let models = listing
            .data
            .into_iter()
            .map(|m| Model {
                id: format!("openai/{}", m.id),
                name: m.id,
                object: m.object,
                created: m.created,
                owned_by: m.owned_by,
            })
            .collect::<Vec<_>>();

        info!(count = models.len(), "discovered openai models");
        Ok(models)
    }
}

#[async_trait]
impl Engine for OpenAiEngine {
    fn name(&self) -> EngineTag {
        EngineTag::OpenAi
    }

    fn is_allowed_path(&self, path: &str) -> bool {
        let allowed = WHITELIST
            .iter()
            .any(|suffix| path.starts_with(&format!("{PREFIX}{suffix}")));
        if !allowed {
            warn!(path, "path is not allowed for openai");
        }
        allowed
    }

    async fn modify_request(&self, req: &mut ProxyRequest) -> Result<(), EngineError> {
        let path = req.url.path().to_string();
        let stripped = path.strip_prefix(PREFIX).unwrap_or(&path).to_string();
        req.url.set_path(&stripped);
        req.set_origin(&self.backend);

        let value = format!("Bearer {}", self.api_key)
            .parse()
            .map_err(|_| EngineError::Config("openai api key is not a valid header".into()))?;
        req.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    fn response_callback(&self, meta: &UpstreamMeta, body: &mut dyn Read) {
        let length = std::io::copy(body, &mut std::io::sink()).unwrap_or(0);
        info!(
            status = meta.status.as_u16(),
            correlation_id = %meta.correlation_id,
            body_length = length,
            "openai response observed"
        );
    }

    async fn list_models(&self) -> Result<Vec<Model>, EngineError> {
        self.model_cache.get_or_fetch(|| self.fetch_models()).await
    }
}
