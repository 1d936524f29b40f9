//! AWS Bedrock engine
//!
//! Native passthrough to the Bedrock runtime with SigV4 signing, plus
//! foundation-model discovery against the control plane. The OpenAI-compat
//! translation for Bedrock lives in `crate::compat::bedrock` and reuses
//! this engine for endpoint resolution and signing.

pub mod eventstream;
pub mod sigv4;
pub mod types;

use std::io::Read;

use async_trait::async_trait;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use self::sigv4::{sign_request, AwsCredentials, SigningParams};
use self::types::FoundationModelsResponse;
use super::{Engine, EngineError, EngineTag, Model, ModelCache, ProxyRequest, UpstreamMeta, MODEL_CACHE_TTL};

const PREFIX: &str = "/bedrock";
const WHITELIST: &[&str] = &["/model/", "/invoke", "/converse", "/converse-stream"];

/// Created timestamp reported for discovered models; Bedrock's listing
/// carries no creation time.
const MODEL_CREATED: i64 = 1_686_935_002;

#[derive(Debug, Default, Deserialize)]
struct BedrockConfig {
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    access_key_id: Option<String>,
    #[serde(default)]
    secret_access_key: Option<String>,
    #[serde(default)]
    session_token: Option<String>,
    /// Data-plane override, primarily for tests.
    #[serde(default)]
    endpoint: Option<String>,
    /// Control-plane override, primarily for tests.
    #[serde(default)]
    control_endpoint: Option<String>,
}

fn parse_config(config_str: &str) -> Result<BedrockConfig, EngineError> {
    if config_str.trim().is_empty() || config_str.trim() == "null" {
        return Ok(BedrockConfig::default());
    }
    serde_yaml::from_str(config_str)
        .map_err(|e| EngineError::Config(format!("error parsing bedrock config: {e}")))
}

pub struct BedrockEngine {
    region: String,
    backend: Url,
    control_plane: Url,
    credentials: AwsCredentials,
    http: reqwest::Client,
    model_cache: ModelCache,
}

impl BedrockEngine {
    pub fn from_config(config_str: &str, http: reqwest::Client) -> Result<Self, EngineError> {
        let config = parse_config(config_str)?;

        let region = config
            .region
            .filter(|r| !r.trim().is_empty())
            .or_else(|| std::env::var("AWS_REGION").ok().filter(|r| !r.is_empty()))
            .unwrap_or_else(|| "us-east-1".to_string());

        let credentials = match (&config.access_key_id, &config.secret_access_key) {
            (Some(ak), Some(sk)) if !ak.trim().is_empty() && !sk.trim().is_empty() => {
                AwsCredentials {
                    access_key_id: ak.clone(),
                    secret_access_key: sk.clone(),
                    session_token: config.session_token.clone().filter(|t| !t.is_empty()),
                }
            }
            _ => AwsCredentials::from_env().ok_or_else(|| {
                EngineError::Credentials(
                    "missing AWS access key pair for bedrock".to_string(),
                )
            })?,
        };

        let backend = match &config.endpoint {
            Some(e) => Url::parse(e)
                .map_err(|e| EngineError::Config(format!("invalid bedrock endpoint: {e}")))?,
            None => Url::parse(&format!("https://bedrock-runtime.{region}.amazonaws.com"))
                .map_err(|e| EngineError::Config(format!("invalid bedrock endpoint: {e}")))?,
        };
        let control_plane = match &config.control_endpoint {
            Some(e) => Url::parse(e).map_err(|e| {
                EngineError::Config(format!("invalid bedrock control endpoint: {e}"))
            })?,
            None => Url::parse(&format!("https://bedrock.{region}.amazonaws.com"))
                .map_err(|e| EngineError::Config(format!("invalid bedrock endpoint: {e}")))?,
        };

        Ok(Self {
            region,
            backend,
            control_plane,
            credentials,
            http,
            model_cache: ModelCache::new(MODEL_CACHE_TTL),
        })
    }

    /// Credential syntax check for the registry's availability report.
    pub fn has_credentials(config_str: &str) -> bool {
        let Ok(config) = parse_config(config_str) else {
            return false;
        };
        let configured = matches!(
            (&config.access_key_id, &config.secret_access_key),
            (Some(ak), Some(sk)) if !ak.trim().is_empty() && !sk.trim().is_empty()
        );
        configured || AwsCredentials::from_env().is_some()
    }

    pub fn backend(&self) -> &Url {
        &self.backend
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Reduce the header set to the signing allowlist and sign in place.
    ///
    /// Intermediaries between the client and this proxy inject headers that
    /// would otherwise enter the signed set and break the signature, so
    /// only `Content-Type` survives.
    pub fn sign(&self, req: &mut ProxyRequest) {
        let content_type = req.headers.get(CONTENT_TYPE).cloned();
        req.headers.clear();
        if let Some(ct) = content_type {
            req.headers.insert(CONTENT_TYPE, ct);
        }

        sign_request(
            req,
            &SigningParams {
                credentials: &self.credentials,
                region: &self.region,
                service: "bedrock",
                time: Utc::now(),
            },
        );
    }

    /// Build, sign and send one request to an absolute Bedrock URL.
    pub async fn send_signed(
        &self,
        method: Method,
        url: Url,
        body: Vec<u8>,
        content_type: Option<&'static str>,
    ) -> Result<reqwest::Response, EngineError> {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(CONTENT_TYPE, ct.parse().expect("static content type"));
        }
        let mut preq = ProxyRequest {
            method: method.clone(),
            url,
            headers,
            body: Bytes::from(body),
            guard: None,
        };
        self.sign(&mut preq);

        let request = self
            .http
            .request(
                reqwest::Method::from_bytes(method.as_str().as_bytes())
                    .unwrap_or(reqwest::Method::POST),
                preq.url.as_str(),
            )
            .headers(preq.headers.clone())
            .body(preq.body.to_vec());
        Ok(request.send().await?)
    }

    async fn fetch_foundation_models(&self) -> Result<Vec<Model>, EngineError> {
        let url = self
            .control_plane
            .join("/foundation-models")
            .map_err(|e| EngineError::Config(format!("invalid control-plane url: {e}")))?;

        let resp = self.send_signed(Method::GET, url, Vec::new(), None).await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, body = %truncate(&body, 500), "bedrock model listing failed");
            return Err(EngineError::UpstreamStatus {
                status,
                body: truncate(&body, 500).to_string(),
            });
        }

        let listing: FoundationModelsResponse = resp.json().await?;
        let mut models = Vec::new();
        for summary in listing.model_summaries {
            if summary.model_lifecycle.status != "ACTIVE"
                || !summary.response_streaming_supported
                || !summary
                    .inference_types_supported
                    .iter()
                    .any(|t| t == "ON_DEMAND")
            {
                continue;
            }

            let owned_by = if summary.provider_name.is_empty() {
                "amazon".to_string()
            } else {
                summary.provider_name.to_lowercase()
            };
            models.push(Model {
                id: format!("bedrock/{}", summary.model_id),
                name: summary.model_name.clone(),
                object: "model".to_string(),
                created: MODEL_CREATED,
                owned_by: owned_by.clone(),
            });
            // Cross-region inference profile variant.
            models.push(Model {
                id: format!("bedrock/us.{}", summary.model_id),
                name: summary.model_name,
                object: "model".to_string(),
                created: MODEL_CREATED,
                owned_by,
            });
        }

        info!(count = models.len(), "discovered bedrock models");
        Ok(models)
    }
}

#[async_trait]
impl Engine for BedrockEngine {
    fn name(&self) -> EngineTag {
        EngineTag::Bedrock
    }

    fn is_allowed_path(&self, path: &str) -> bool {
        let allowed = WHITELIST
            .iter()
            .any(|suffix| path.starts_with(&format!("{PREFIX}{suffix}")));
        if !allowed {
            warn!(path, "path is not allowed for bedrock");
        }
        allowed
    }

    async fn modify_request(&self, req: &mut ProxyRequest) -> Result<(), EngineError> {
        let path = req.url.path().to_string();
        let stripped = path.strip_prefix(PREFIX).unwrap_or(&path).to_string();
        req.url.set_path(&stripped);
        req.set_origin(&self.backend);
        self.sign(req);
        Ok(())
    }

    fn response_callback(&self, meta: &UpstreamMeta, body: &mut dyn Read) {
        let length = std::io::copy(body, &mut std::io::sink()).unwrap_or(0);
        info!(
            status = meta.status.as_u16(),
            correlation_id = %meta.correlation_id,
            body_length = length,
            "bedrock response observed"
        );
    }

    async fn list_models(&self) -> Result<Vec<Model>, EngineError> {
        self.model_cache
            .get_or_fetch(|| self.fetch_foundation_models())
            .await
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
