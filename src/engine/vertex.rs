//! Vertex AI engine
//!
//! Native passthrough to the Vertex AI platform API. Authentication uses a
//! short-lived OAuth2 bearer resolved from the ambient Google credential
//! chain: explicit config token, environment, then the GCE metadata server.

use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};
use url::Url;

use super::{Engine, EngineError, EngineTag, Model, ModelCache, ProxyRequest, UpstreamMeta, MODEL_CACHE_TTL};

const PREFIX: &str = "/vertex";
const WHITELIST: &[&str] = &["/v1/", "/v1beta1/"];
pub const DEFAULT_LOCATION: &str = "us-central1";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
/// Refresh ahead of expiry so in-flight requests never carry a stale token.
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);

/// OAuth2 bearer source for Google APIs.
pub struct GoogleTokenProvider {
    static_token: Option<String>,
    http: reqwest::Client,
    cached: RwLock<Option<CachedToken>>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

impl GoogleTokenProvider {
    pub fn new(static_token: Option<String>, http: reqwest::Client) -> Self {
        Self {
            static_token: static_token
                .or_else(|| std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN").ok())
                .filter(|t| !t.trim().is_empty()),
            http,
            cached: RwLock::new(None),
        }
    }

    /// Current bearer token, refreshing through the metadata server when
    /// the cached one is close to expiry.
    pub async fn token(&self) -> Result<String, EngineError> {
        if let Some(token) = &self.static_token {
            return Ok(token.clone());
        }

        {
            let guard = self.cached.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.expires_at > Instant::now() + TOKEN_EXPIRY_SLACK {
                    return Ok(cached.token.clone());
                }
            }
        }

        let mut guard = self.cached.write().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Instant::now() + TOKEN_EXPIRY_SLACK {
                return Ok(cached.token.clone());
            }
        }

        let resp = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| {
                EngineError::Credentials(format!("google credential chain unavailable: {e}"))
            })?;
        if !resp.status().is_success() {
            return Err(EngineError::Credentials(format!(
                "google metadata server returned status {}",
                resp.status()
            )));
        }
        let token: MetadataTokenResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Credentials(format!("bad metadata token response: {e}")))?;

        let expires_in = if token.expires_in == 0 { 300 } else { token.expires_in };
        *guard = Some(CachedToken {
            token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        });
        Ok(token.access_token)
    }
}

#[derive(Debug, Default, Deserialize)]
struct VertexConfig {
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

fn parse_config(config_str: &str) -> Result<VertexConfig, EngineError> {
    if config_str.trim().is_empty() || config_str.trim() == "null" {
        return Ok(VertexConfig::default());
    }
    serde_yaml::from_str(config_str)
        .map_err(|e| EngineError::Config(format!("error parsing vertex config: {e}")))
}

pub struct VertexEngine {
    backend: Url,
    custom_base: bool,
    project_id: Option<String>,
    location: String,
    tokens: Arc<GoogleTokenProvider>,
    http: reqwest::Client,
    model_cache: ModelCache,
}

impl VertexEngine {
    pub fn from_config(config_str: &str, http: reqwest::Client) -> Result<Self, EngineError> {
        let config = parse_config(config_str)?;

        let location = config
            .location
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOCATION.to_string());
        let custom_base = config.base_url.is_some();
        let backend = match &config.base_url {
            Some(base) => Url::parse(base)
                .map_err(|e| EngineError::Config(format!("invalid vertex base_url: {e}")))?,
            None => Url::parse(&format!("https://{location}-aiplatform.googleapis.com"))
                .map_err(|e| EngineError::Config(format!("invalid vertex endpoint: {e}")))?,
        };

        let project_id = config
            .project_id
            .or_else(|| std::env::var("VERTEX_PROJECT_ID").ok())
            .filter(|p| !p.trim().is_empty());

        Ok(Self {
            backend,
            custom_base,
            project_id,
            location,
            tokens: Arc::new(GoogleTokenProvider::new(config.access_token, http.clone())),
            http,
            model_cache: ModelCache::new(MODEL_CACHE_TTL),
        })
    }

    pub fn has_credentials(config_str: &str) -> bool {
        let Ok(config) = parse_config(config_str) else {
            return false;
        };
        config
            .project_id
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false)
            || std::env::var("VERTEX_PROJECT_ID")
                .map(|p| !p.trim().is_empty())
                .unwrap_or(false)
    }

    pub fn backend(&self) -> &Url {
        &self.backend
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn tokens(&self) -> &Arc<GoogleTokenProvider> {
        &self.tokens
    }

    pub fn default_location(&self) -> &str {
        &self.location
    }

    /// Base URL for a request-selected location. An explicitly configured
    /// base URL always wins; otherwise the regional host is derived.
    pub fn endpoint_for_location(&self, location: &str) -> Result<Url, EngineError> {
        if self.custom_base || location == self.location {
            return Ok(self.backend.clone());
        }
        Url::parse(&format!("https://{location}-aiplatform.googleapis.com"))
            .map_err(|e| EngineError::Config(format!("invalid vertex location {location}: {e}")))
    }

    /// GCP project id, validated before any upstream call is made.
    pub fn resolved_project_id(&self) -> Result<String, EngineError> {
        match &self.project_id {
            Some(p)
                if !p.trim().is_empty()
                    && !p.contains("invalid")
                    && !p.contains("error")
                    && p != "your-gcp-project-id" =>
            {
                Ok(p.clone())
            }
            _ => Err(EngineError::Config(
                "invalid GCP project id; set VERTEX_PROJECT_ID or engines.vertex.project_id"
                    .to_string(),
            )),
        }
    }

    async fn fetch_models(&self) -> Result<Vec<Model>, EngineError> {
        let token = self.tokens.token().await?;
        let url = self
            .backend
            .join("/v1beta1/publishers/google/models")
            .map_err(|e| EngineError::Config(format!("invalid vertex models url: {e}")))?;

        let resp = self.http.get(url).bearer_auth(token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, "vertex model listing failed");
            return Err(EngineError::UpstreamStatus {
                status,
                body: body.chars().take(500).collect(),
            });
        }

        #[derive(Deserialize)]
        struct Listing {
            #[serde(rename = "publisherModels", default)]
            publisher_models: Vec<PublisherModel>,
        }
        #[derive(Deserialize)]
        struct PublisherModel {
            #[serde(default)]
            name: String,
        }

        let listing: Listing = resp.json().await?;
        let models = listing
            .publisher_models
            .into_iter()
            .filter_map(|m| {
                // `publishers/google/models/gemini-1.5-pro` -> `gemini-1.5-pro`
                let id = m.name.rsplit('/').next()?.to_string();
                if id.is_empty() {
                    return None;
                }
                Some(Model {
                    id: format!("vertex/{id}"),
                    name: id,
                    object: "model".to_string(),
                    created: 0,
                    owned_by: "google".to_string(),
                })
            })
            .collect::<Vec<_>>();

        info!(count = models.len(), "discovered vertex models");
        Ok(models)
    }
}

#[async_trait]
impl Engine for VertexEngine {
    fn name(&self) -> EngineTag {
        EngineTag::Vertex
    }

    fn is_allowed_path(&self, path: &str) -> bool {
        let allowed = WHITELIST
            .iter()
            .any(|suffix| path.starts_with(&format!("{PREFIX}{suffix}")));
        if !allowed {
            warn!(path, "path is not allowed for vertex");
        }
        allowed
    }

    async fn modify_request(&self, req: &mut ProxyRequest) -> Result<(), EngineError> {
        let token = self.tokens.token().await?;

        let path = req.url.path().to_string();
        let stripped = path.strip_prefix(PREFIX).unwrap_or(&path).to_string();
        req.url.set_path(&stripped);
        req.set_origin(&self.backend);

        req.headers.remove("x-goog-api-key");
        let value = format!("Bearer {token}")
            .parse()
            .map_err(|_| EngineError::Credentials("google token is not a valid header".into()))?;
        req.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    fn response_callback(&self, meta: &UpstreamMeta, body: &mut dyn Read) {
        let length = std::io::copy(body, &mut std::io::sink()).unwrap_or(0);
        info!(
            status = meta.status.as_u16(),
            correlation_id = %meta.correlation_id,
            body_length = length,
            "vertex response observed"
        );
    }

    async fn list_models(&self) -> Result<Vec<Model>, EngineError> {
        self.model_cache.get_or_fetch(|| self.fetch_models()).await
    }
}
