//! Configuration management
//!
//! Configuration is loaded from a YAML file with `${VAR}` and
//! `${VAR:-default}` environment substitution applied before parsing.
//! Engine sections are kept as raw YAML subtrees: each adapter parses its
//! own subtree at construction time, so adding a provider never touches
//! this module.

use std::collections::HashMap;
use std::env;
use std::fs;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Raw YAML subtree per engine tag (`openai`, `azure`, `bedrock`, ...)
    pub engines: HashMap<String, String>,
    /// Base URL of the external API-key service
    pub keystore_url: Option<String>,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    /// `development`, `staging` or `production`
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Socket read timeout in seconds
    #[serde(default = "default_rw_timeout")]
    pub read_timeout: u64,
    /// Socket write timeout in seconds
    #[serde(default = "default_rw_timeout")]
    pub write_timeout: u64,
    /// Graceful shutdown window in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `json` or `text`
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Global override that disables bearer auth entirely
    #[serde(default)]
    pub disabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_rw_timeout() -> u64 {
    30
}
fn default_shutdown_timeout() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            read_timeout: default_rw_timeout(),
            write_timeout: default_rw_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// On-disk layout of the config file before engine subtrees are flattened.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    engines: HashMap<String, serde_yaml::Value>,
    #[serde(default)]
    keystore_url: Option<String>,
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    auth: AuthConfig,
    #[serde(default)]
    environment: Option<String>,
}

impl Config {
    /// Load configuration from the given YAML file.
    pub fn load(path: &str) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path}"))?;
        Self::from_yaml(&data)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let substituted = substitute_env_vars(data);
        let raw: RawConfig =
            serde_yaml::from_str(&substituted).context("error parsing config YAML")?;

        let mut engines = HashMap::new();
        for (tag, subtree) in raw.engines {
            let subtree_str = serde_yaml::to_string(&subtree)
                .with_context(|| format!("error re-serializing engine config for {tag}"))?;
            engines.insert(tag, subtree_str);
        }

        let config = Self {
            engines,
            keystore_url: raw
                .keystore_url
                .or_else(|| env::var("KEYSTORE_URL").ok())
                .filter(|u| !u.is_empty()),
            server: raw.server,
            logging: raw.logging,
            auth: AuthConfig {
                disabled: raw.auth.disabled
                    || env_bool("SWITCHBOARD_DISABLE_AUTH").unwrap_or(false),
            },
            environment: raw
                .environment
                .or_else(|| env::var("SWITCHBOARD_ENV").ok())
                .unwrap_or_else(|| "development".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server port must be between 1 and 65535");
        }

        const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            bail!(
                "invalid log level: {} (must be one of: {})",
                self.logging.level,
                LEVELS.join(", ")
            );
        }

        const ENVS: &[&str] = &["development", "staging", "production"];
        if !ENVS.contains(&self.environment.to_lowercase().as_str()) {
            bail!(
                "invalid environment: {} (must be one of: {})",
                self.environment,
                ENVS.join(", ")
            );
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

static VAR_WITH_DEFAULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{(\w+):-([^}]*)\}").expect("valid regex"));
static VAR_PLAIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{(\w+)\}").expect("valid regex"));

/// Replace `${VAR}` and `${VAR:-default}` occurrences with environment values.
fn substitute_env_vars(content: &str) -> String {
    let content = VAR_WITH_DEFAULT.replace_all(content, |caps: &regex::Captures<'_>| {
        match env::var(&caps[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => caps[2].to_string(),
        }
    });

    VAR_PLAIN
        .replace_all(&content, |caps: &regex::Captures<'_>| {
            match env::var(&caps[1]) {
                Ok(v) => v,
                Err(_) => {
                    tracing::warn!(var = &caps[1], "environment variable not set, using empty string");
                    String::new()
                }
            }
        })
        .into_owned()
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().map(|v| v == "true" || v == "1")
}
