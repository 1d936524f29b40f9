//! External API-key service client
//!
//! The proxy does not own key material. Bearer tokens are validated against
//! an external key service that returns the key's identity and role;
//! revocation is observed on the next request because nothing is cached
//! here.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Role attached to an API key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// Validated API key record returned by the key service
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKey {
    pub id: i64,
    pub name: String,
    pub role: Role,
    pub is_active: bool,
}

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("invalid API key")]
    Invalid,
    #[error("key service unavailable: {0}")]
    Unavailable(String),
}

/// Key validation backend
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Validate a bearer token. Returns the key record only for active keys.
    async fn validate(&self, token: &str) -> Result<ApiKey, KeyStoreError>;
}

/// HTTP-backed key store speaking to the external key service
pub struct HttpKeyStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpKeyStore {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl KeyStore for HttpKeyStore {
    async fn validate(&self, token: &str) -> Result<ApiKey, KeyStoreError> {
        let url = format!("{}/v1/keys/self", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "key service request failed");
                KeyStoreError::Unavailable(e.to_string())
            })?;

        match resp.status() {
            s if s.is_success() => {
                let key: ApiKey = resp
                    .json()
                    .await
                    .map_err(|e| KeyStoreError::Unavailable(e.to_string()))?;
                if !key.is_active {
                    return Err(KeyStoreError::Invalid);
                }
                Ok(key)
            }
            s if s.as_u16() == 401 || s.as_u16() == 403 || s.as_u16() == 404 => {
                Err(KeyStoreError::Invalid)
            }
            s => Err(KeyStoreError::Unavailable(format!(
                "key service returned status {s}"
            ))),
        }
    }
}

/// Placeholder store used when no key service is configured. Every lookup
/// fails closed; the auth middleware is expected to be disabled instead.
pub struct DisabledKeyStore;

#[async_trait]
impl KeyStore for DisabledKeyStore {
    async fn validate(&self, _token: &str) -> Result<ApiKey, KeyStoreError> {
        Err(KeyStoreError::Unavailable(
            "no key service configured".to_string(),
        ))
    }
}
