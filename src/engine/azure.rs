//! Azure OpenAI engine
//!
//! Multiple configured backends with a periodic health probe; dispatch
//! picks the active backend with the fewest in-flight requests. The
//! connection count is held for the whole request lifetime via a guard
//! attached to the outbound request.

use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use super::{Engine, EngineError, EngineTag, Model, ModelCache, ProxyRequest, UpstreamMeta, MODEL_CACHE_TTL};

const PREFIX: &str = "/azure";
const WHITELIST: &[&str] = &["chat/completions", "completions"];
const PROBE_INTERVAL: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);
/// Synthetic probe route; never reaches a deployment.
const PROBE_PATH: &str = "/status-0123456789abcdef";

#[derive(Debug, Deserialize)]
struct AzureBackendConfig {
    base_url: String,
    api_key: String,
    #[serde(default)]
    api_version: String,
}

pub struct AzureBackend {
    url: Url,
    api_key: String,
    api_version: String,
    active: AtomicBool,
    connections: AtomicI64,
}

impl AzureBackend {
    pub fn connections(&self) -> i64 {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Holds a backend's connection slot until the response has been relayed.
pub struct ConnectionGuard {
    backend: Arc<AzureBackend>,
}

impl ConnectionGuard {
    fn acquire(backend: Arc<AzureBackend>) -> Self {
        backend.connections.fetch_add(1, Ordering::SeqCst);
        Self { backend }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct AzureEngine {
    backends: Vec<Arc<AzureBackend>>,
    http: reqwest::Client,
    model_cache: ModelCache,
}

impl AzureEngine {
    pub fn from_config(config_str: &str, http: reqwest::Client) -> Result<Arc<Self>, EngineError> {
        let configs: Vec<AzureBackendConfig> = serde_yaml::from_str(config_str)
            .map_err(|e| EngineError::Config(format!("error parsing azure config: {e}")))?;
        if configs.is_empty() {
            return Err(EngineError::Config("no backends found in azure config".into()));
        }

        let mut backends = Vec::with_capacity(configs.len());
        for config in configs {
            let url = Url::parse(&config.base_url)
                .map_err(|e| EngineError::Config(format!("invalid azure base_url: {e}")))?;
            backends.push(Arc::new(AzureBackend {
                url,
                api_key: config.api_key,
                api_version: config.api_version,
                active: AtomicBool::new(true),
                connections: AtomicI64::new(0),
            }));
        }

        let engine = Arc::new(Self {
            backends,
            http,
            model_cache: ModelCache::new(MODEL_CACHE_TTL),
        });
        engine.clone().spawn_health_probe();
        Ok(engine)
    }

    pub fn has_credentials(config_str: &str) -> bool {
        serde_yaml::from_str::<Vec<AzureBackendConfig>>(config_str)
            .map(|backends| backends.iter().any(|b| !b.api_key.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Background probe marking each backend active/inactive every 5 s.
    /// The task holds a weak reference and exits once the engine is evicted
    /// from the adapter cache.
    fn spawn_health_probe(self: Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(&self);
        drop(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROBE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; probing starts one interval in.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = weak.upgrade() else {
                    return;
                };
                for backend in &engine.backends {
                    let healthy = engine.probe_backend(backend).await;
                    backend.active.store(healthy, Ordering::SeqCst);
                    if healthy {
                        debug!(backend = %backend.url, "azure backend is healthy");
                    } else {
                        warn!(backend = %backend.url, "azure backend is unhealthy");
                    }
                }
            }
        });
    }

    async fn probe_backend(&self, backend: &AzureBackend) -> bool {
        let url = format!("{}{PROBE_PATH}", backend.url.as_str().trim_end_matches('/'));
        match self.http.get(url).timeout(PROBE_TIMEOUT).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, backend = %backend.url, "failed to check azure backend status");
                false
            }
        }
    }

    /// Active backend with the fewest in-flight requests; falls back to the
    /// first backend when the probe has marked everything down.
    pub fn select_backend(&self) -> Arc<AzureBackend> {
        self.backends
            .iter()
            .filter(|b| b.is_active())
            .min_by_key(|b| b.connections())
            .cloned()
            .unwrap_or_else(|| {
                warn!("no active azure backends, falling back to first");
                self.backends[0].clone()
            })
    }

    /// POST a chat body to a deployment route on the least-loaded backend,
    /// holding its connection slot for the duration of the call.
    pub async fn post_deployment(
        &self,
        deployment: &str,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, EngineError> {
        let backend = self.select_backend();
        let _guard = ConnectionGuard::acquire(backend.clone());

        let url = format!(
            "{}/openai/deployments/{deployment}/chat/completions?api-version={}",
            backend.url.as_str().trim_end_matches('/'),
            backend.api_version
        );
        let resp = self
            .http
            .post(url)
            .header("api-key", &backend.api_key)
            .header(axum::http::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        Ok(resp)
    }

    async fn fetch_models(&self) -> Result<Vec<Model>, EngineError> {
        let backend = self.select_backend();
        let url = format!(
            "{}/openai/models?api-version={}",
            backend.url.as_str().trim_end_matches('/'),
            backend.api_version
        );
        let resp = self
            .http
            .get(url)
            .header("api-key", &backend.api_key)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, "azure model listing failed");
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
            created_at: i64,
        }

        let listing: Listing = resp.json().await?;
        let models = listing
            .data
            .into_iter()
            .map(|m| Model {
                id: format!("azure/{}", m.id),
                name: m.id,
                object: if m.object.is_empty() { "model".into() } else { m.object },
                created: m.created_at,
                owned_by: "azure".to_string(),
            })
            .collect::<Vec<_>>();

        info!(count = models.len(), "discovered azure models");
        Ok(models)
    }
}

/// Deployment-relative route used for whitelist checks:
/// `/openai/deployments/<name>/chat/completions` -> `chat/completions`.
/// The `/openai` root is optional on ingress.
fn deployment_route(trimmed_path: &str) -> &str {
    let path = trimmed_path
        .strip_prefix("/openai")
        .unwrap_or(trimmed_path);
    let Some(rest) = path.strip_prefix("/deployments/") else {
        return "";
    };
    match rest.split_once('/') {
        Some((_deployment, route)) => route,
        None => "",
    }
}

#[async_trait]
impl Engine for AzureEngine {
    fn name(&self) -> EngineTag {
        EngineTag::Azure
    }

    fn is_allowed_path(&self, path: &str) -> bool {
        let trimmed = path.strip_prefix(PREFIX).unwrap_or(path);
        let route = deployment_route(trimmed);
        let allowed = WHITELIST.contains(&route);
        if !allowed {
            warn!(path, "path is not allowed for azure");
        }
        allowed
    }

    async fn modify_request(&self, req: &mut ProxyRequest) -> Result<(), EngineError> {
        let backend = self.select_backend();
        let guard = ConnectionGuard::acquire(backend.clone());

        // `/azure/...` becomes the Azure-native `/openai/...` route; an
        // ingress path that already spells `/azure/openai/...` must not end
        // up with the segment doubled.
        let path = req.url.path();
        let new_path = match path.strip_prefix("/azure/openai") {
            Some(rest) => format!("/openai{rest}"),
            None => path.replacen("/azure", "/openai", 1),
        };
        req.url.set_path(&new_path);
        req.set_origin(&backend.url);

        req.headers.remove(AUTHORIZATION);
        let key = backend
            .api_key
            .parse()
            .map_err(|_| EngineError::Config("azure api key is not a valid header".into()))?;
        req.headers.insert("api-key", key);

        let query: Vec<(String, String)> = req
            .url
            .query_pairs()
            .filter(|(k, _)| k != "api-version")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        req.url.query_pairs_mut().clear().extend_pairs(query).append_pair(
            "api-version",
            &backend.api_version,
        );

        req.guard = Some(Box::new(guard));
        Ok(())
    }

    fn response_callback(&self, meta: &UpstreamMeta, body: &mut dyn Read) {
        let length = std::io::copy(body, &mut std::io::sink()).unwrap_or(0);
        info!(
            status = meta.status.as_u16(),
            correlation_id = %meta.correlation_id,
            body_length = length,
            "azure response observed"
        );
    }

    async fn list_models(&self) -> Result<Vec<Model>, EngineError> {
        self.model_cache.get_or_fetch(|| self.fetch_models()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, Method};
    use bytes::Bytes;

    fn two_backend_config() -> &'static str {
        r#"
- base_url: https://east.openai.azure.com
  api_key: key-east
  api_version: 2024-02-01
- base_url: https://west.openai.azure.com
  api_key: key-west
  api_version: 2024-02-01
"#
    }

    #[tokio::test]
    async fn parses_multiple_backends() {
        let engine = AzureEngine::from_config(two_backend_config(), reqwest::Client::new()).unwrap();
        assert_eq!(engine.backends.len(), 2);
        assert!(AzureEngine::has_credentials(two_backend_config()));
        assert!(!AzureEngine::has_credentials("- base_url: https://x\n  api_key: ''\n"));
    }

    #[test]
    fn empty_config_is_rejected() {
        // Run outside a runtime-free context is fine: construction only
        // spawns once backends parse.
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        assert!(AzureEngine::from_config("[]", reqwest::Client::new()).is_err());
    }

    #[test]
    fn deployment_route_extraction() {
        assert_eq!(
            deployment_route("/openai/deployments/gpt4o/chat/completions"),
            "chat/completions"
        );
        assert_eq!(deployment_route("/openai/deployments/gpt4o/completions"), "completions");
        assert_eq!(deployment_route("/deployments/gpt4o/chat/completions"), "chat/completions");
        assert_eq!(deployment_route("/openai/deployments"), "");
        assert_eq!(deployment_route("/files"), "");
    }

    #[tokio::test]
    async fn whitelist_covers_deployment_routes() {
        let engine = AzureEngine::from_config(two_backend_config(), reqwest::Client::new()).unwrap();
        assert!(engine.is_allowed_path("/azure/openai/deployments/gpt4o/chat/completions"));
        assert!(engine.is_allowed_path("/azure/openai/deployments/gpt4o/completions"));
        assert!(!engine.is_allowed_path("/azure/openai/deployments/gpt4o/embeddings"));
        assert!(!engine.is_allowed_path("/azure/openai/files"));
    }

    #[tokio::test]
    async fn least_loaded_backend_wins() {
        let engine = AzureEngine::from_config(two_backend_config(), reqwest::Client::new()).unwrap();
        engine.backends[0].connections.store(3, Ordering::SeqCst);
        engine.backends[1].connections.store(1, Ordering::SeqCst);
        assert_eq!(engine.select_backend().url, engine.backends[1].url);

        // Inactive backends are skipped even when idle.
        engine.backends[1].active.store(false, Ordering::SeqCst);
        assert_eq!(engine.select_backend().url, engine.backends[0].url);
    }

    #[tokio::test]
    async fn modify_request_rewrites_path_and_holds_connection() {
        let engine = AzureEngine::from_config(two_backend_config(), reqwest::Client::new()).unwrap();
        let mut req = ProxyRequest::new(
            Method::POST,
            "/azure/openai/deployments/gpt4o/chat/completions",
            {
                let mut h = HeaderMap::new();
                h.insert(AUTHORIZATION, "Bearer client".parse().unwrap());
                h
            },
            Bytes::new(),
        );
        engine.modify_request(&mut req).await.unwrap();

        assert!(req.url.path().starts_with("/openai/deployments/gpt4o"));
        assert_eq!(req.url.query(), Some("api-version=2024-02-01"));
        assert!(req.headers.get(AUTHORIZATION).is_none());
        assert!(req.headers.get("api-key").is_some());

        let total: i64 = engine.backends.iter().map(|b| b.connections()).sum();
        assert_eq!(total, 1);
        drop(req);
        let total: i64 = engine.backends.iter().map(|b| b.connections()).sum();
        assert_eq!(total, 0);
    }
}
