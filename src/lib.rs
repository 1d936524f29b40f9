//! switchboard - unified reverse proxy for LLM providers
//!
//! One HTTP ingress, two client modes: native provider wire protocols
//! forwarded with URL rewriting and credential injection, and an
//! OpenAI-compatible chat surface transcoded per provider. Every upstream
//! response is teed through the streaming audit pipeline.

pub mod compat;
pub mod config;
pub mod engine;
pub mod error;
pub mod keystore;
pub mod middleware;
pub mod proxy;
pub mod routes;
pub mod streaming;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

pub use crate::config::Config;
pub use crate::keystore::{DisabledKeyStore, HttpKeyStore, KeyStore};
pub use crate::proxy::AdapterRegistry;

/// Ceiling on any single upstream call.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(120);
const UPSTREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Arc<Config>,
    pub http: reqwest::Client,
    pub registry: Arc<AdapterRegistry>,
    pub keystore: Arc<dyn KeyStore>,
    /// Flipped to false when shutdown begins.
    pub healthy: AtomicBool,
}

impl AppState {
    /// Create a new application state
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);

        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .pool_idle_timeout(UPSTREAM_IDLE_TIMEOUT)
            .connect_timeout(UPSTREAM_CONNECT_TIMEOUT)
            .build()?;

        let registry = Arc::new(AdapterRegistry::new(config.clone(), http.clone()));

        let keystore: Arc<dyn KeyStore> = match &config.keystore_url {
            Some(url) => Arc::new(HttpKeyStore::new(http.clone(), url.clone())),
            None => Arc::new(DisabledKeyStore),
        };

        Ok(Self {
            config,
            http,
            registry,
            keystore,
            healthy: AtomicBool::new(true),
        })
    }
}
