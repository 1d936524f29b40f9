//! Adapter registry & cache
//!
//! Flat registry keyed by `(engine tag, model hint)`. Adapters are
//! constructed lazily from their config subtree, cached for a TTL and
//! rebuilt afterwards; a background sweeper drops expired entries.
//! Construction failures propagate to the caller and are never cached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::azure::AzureEngine;
use crate::engine::bedrock::BedrockEngine;
use crate::engine::gemini::GeminiEngine;
use crate::engine::openai::OpenAiEngine;
use crate::engine::vertex::VertexEngine;
use crate::compat::bedrock::BedrockCompat;
use crate::compat::passthrough::{AzureCompat, GeminiCompat, OpenAiCompat};
use crate::compat::vertex::VertexCompat;
use crate::engine::{Adapter, EngineError, EngineTag};

const ADAPTER_TTL: Duration = Duration::from_secs(30 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

struct CachedAdapter {
    adapter: Adapter,
    created_at: Instant,
}

pub struct AdapterRegistry {
    cache: RwLock<HashMap<String, CachedAdapter>>,
    config: Arc<Config>,
    http: reqwest::Client,
    ttl: Duration,
}

impl AdapterRegistry {
    pub fn new(config: Arc<Config>, http: reqwest::Client) -> Self {
        Self::with_ttl(config, http, ADAPTER_TTL)
    }

    pub fn with_ttl(config: Arc<Config>, http: reqwest::Client, ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            config,
            http,
            ttl,
        }
    }

    /// Cached adapter for the engine, constructing on miss. Concurrent
    /// misses serialize on the write lock with a double-check, so one
    /// construction happens per TTL window.
    pub async fn get(&self, tag: EngineTag, model: &str) -> Result<Adapter, EngineError> {
        let key = format!("{tag}:{model}");

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&key) {
                if cached.created_at.elapsed() < self.ttl {
                    debug!(%key, "using cached adapter");
                    return Ok(cached.adapter.clone());
                }
            }
        }

        let mut cache = self.cache.write().await;
        if let Some(cached) = cache.get(&key) {
            if cached.created_at.elapsed() < self.ttl {
                debug!(%key, "using cached adapter (double-check)");
                return Ok(cached.adapter.clone());
            }
        }

        let adapter = self.build_adapter(tag).map_err(|e| {
            warn!(engine = %tag, error = %e, "failed to create adapter");
            e
        })?;
        cache.insert(
            key.clone(),
            CachedAdapter {
                adapter: adapter.clone(),
                created_at: Instant::now(),
            },
        );
        info!(%key, "created and cached adapter");
        Ok(adapter)
    }

    fn engine_config(&self, tag: EngineTag) -> Result<&str, EngineError> {
        self.config
            .engines
            .get(tag.as_str())
            .map(String::as_str)
            .ok_or_else(|| EngineError::Config(format!("engine {tag} not configured")))
    }

    fn build_adapter(&self, tag: EngineTag) -> Result<Adapter, EngineError> {
        let config = self.engine_config(tag)?;
        let http = self.http.clone();
        let adapter = match tag {
            EngineTag::OpenAi => {
                let engine = Arc::new(OpenAiEngine::from_config(config, http)?);
                Adapter::NativeAndCompat(engine.clone(), Arc::new(OpenAiCompat::new(engine)))
            }
            EngineTag::Azure => {
                let engine = AzureEngine::from_config(config, http)?;
                Adapter::NativeAndCompat(engine.clone(), Arc::new(AzureCompat::new(engine)))
            }
            EngineTag::Bedrock => {
                let engine = Arc::new(BedrockEngine::from_config(config, http)?);
                Adapter::NativeAndCompat(engine.clone(), Arc::new(BedrockCompat::new(engine)))
            }
            EngineTag::Vertex => {
                let engine = Arc::new(VertexEngine::from_config(config, http)?);
                Adapter::NativeAndCompat(engine.clone(), Arc::new(VertexCompat::new(engine)))
            }
            EngineTag::Gemini => {
                let engine = Arc::new(GeminiEngine::from_config(config, http)?);
                Adapter::NativeAndCompat(engine.clone(), Arc::new(GeminiCompat::new(engine)))
            }
        };
        Ok(adapter)
    }

    /// Engines whose credentials are syntactically present.
    pub fn available(&self) -> Vec<EngineTag> {
        EngineTag::all()
            .into_iter()
            .filter(|tag| {
                let Some(config) = self.config.engines.get(tag.as_str()) else {
                    return false;
                };
                match tag {
                    EngineTag::OpenAi => OpenAiEngine::has_credentials(config),
                    EngineTag::Azure => AzureEngine::has_credentials(config),
                    EngineTag::Bedrock => BedrockEngine::has_credentials(config),
                    EngineTag::Vertex => VertexEngine::has_credentials(config),
                    EngineTag::Gemini => GeminiEngine::has_credentials(config),
                }
            })
            .collect()
    }

    /// Drop entries older than the TTL.
    pub async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|key, cached| {
            let fresh = cached.created_at.elapsed() < self.ttl;
            if !fresh {
                debug!(%key, "invalidated cached adapter");
            }
            fresh
        });
        if cache.len() != before {
            info!(dropped = before - cache.len(), "adapter cache sweep");
        }
    }

    pub async fn clear(&self) {
        self.cache.write().await.clear();
        info!("cleared adapter cache");
    }

    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Periodic sweep; the task exits when the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(registry) = weak.upgrade() else {
                    return;
                };
                registry.invalidate().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_engines(engines: &[(&str, &str)]) -> Arc<Config> {
        let mut yaml = String::from("engines:\n");
        for (tag, subtree) in engines {
            yaml.push_str(&format!("  {tag}:\n"));
            for line in subtree.lines() {
                yaml.push_str(&format!("    {line}\n"));
            }
        }
        Arc::new(Config::from_yaml(&yaml).unwrap())
    }

    fn openai_entry() -> (&'static str, &'static str) {
        ("openai", "base_url: https://api.openai.com\napi_key: sk-test")
    }

    #[tokio::test]
    async fn constructs_and_caches_adapters() {
        let registry = AdapterRegistry::new(
            config_with_engines(&[openai_entry()]),
            reqwest::Client::new(),
        );

        let adapter = registry.get(EngineTag::OpenAi, "gpt-4o").await.unwrap();
        assert_eq!(adapter.native().name(), EngineTag::OpenAi);
        assert!(adapter.compat().is_some());
        assert_eq!(registry.cached_count().await, 1);

        // Second hit reuses the entry.
        registry.get(EngineTag::OpenAi, "gpt-4o").await.unwrap();
        assert_eq!(registry.cached_count().await, 1);

        // Different model hint is a distinct key.
        registry.get(EngineTag::OpenAi, "gpt-4o-mini").await.unwrap();
        assert_eq!(registry.cached_count().await, 2);
    }

    #[tokio::test]
    async fn concurrent_misses_construct_once() {
        let registry = Arc::new(AdapterRegistry::new(
            config_with_engines(&[openai_entry()]),
            reqwest::Client::new(),
        ));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get(EngineTag::OpenAi, "gpt-4o").await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(registry.cached_count().await, 1);
    }

    #[tokio::test]
    async fn construction_failure_is_not_cached() {
        let registry = AdapterRegistry::new(
            config_with_engines(&[("openai", "base_url: https://api.openai.com\napi_key: ''")]),
            reqwest::Client::new(),
        );

        assert!(registry.get(EngineTag::OpenAi, "gpt-4o").await.is_err());
        assert_eq!(registry.cached_count().await, 0);
    }

    #[tokio::test]
    async fn unconfigured_engine_is_an_error() {
        let registry = AdapterRegistry::new(
            config_with_engines(&[openai_entry()]),
            reqwest::Client::new(),
        );
        assert!(matches!(
            registry.get(EngineTag::Gemini, "gemini-1.5-pro").await,
            Err(EngineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn expired_entries_are_swept() {
        let registry = AdapterRegistry::with_ttl(
            config_with_engines(&[openai_entry()]),
            reqwest::Client::new(),
            Duration::from_millis(0),
        );
        registry.get(EngineTag::OpenAi, "gpt-4o").await.unwrap();
        registry.invalidate().await;
        assert_eq!(registry.cached_count().await, 0);
    }

    #[tokio::test]
    async fn available_reflects_credential_syntax() {
        std::env::remove_var("GEMINI_API_KEY");
        let registry = AdapterRegistry::new(
            config_with_engines(&[
                openai_entry(),
                ("gemini", "api_key: ''"),
                ("bedrock", "access_key_id: ak\nsecret_access_key: sk"),
            ]),
            reqwest::Client::new(),
        );
        let available = registry.available();
        assert!(available.contains(&EngineTag::OpenAi));
        assert!(available.contains(&EngineTag::Bedrock));
        assert!(!available.contains(&EngineTag::Gemini));
        assert!(!available.contains(&EngineTag::Vertex));
    }

    #[tokio::test]
    async fn clear_empties_cache() {
        let registry = AdapterRegistry::new(
            config_with_engines(&[openai_entry()]),
            reqwest::Client::new(),
        );
        registry.get(EngineTag::OpenAi, "").await.unwrap();
        registry.clear().await;
        assert_eq!(registry.cached_count().await, 0);
    }
}
