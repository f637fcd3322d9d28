//! Runtime configuration for sse-relay.
//!
//! Non-secret settings are loaded from a JSON file (or defaults). Secrets and
//! deployment-specific URLs come from the environment and are resolved once
//! at startup; a missing required value stops the process before it binds.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::relay::framing::Padding;

/// Environment variables holding the upstream API key, in lookup order.
pub const API_KEY_VARS: &[&str] = &["GROQ_API_KEY", "OPENAI_API_KEY"];

/// Environment variables holding the JWKS endpoint, in lookup order.
pub const JWKS_URL_VARS: &[&str] = &["JWKS_URL", "CLERK_JWKS_URL"];

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "sse-relay", about = "Relay LLM completions to browsers over SSE")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// SSE line padding (overrides the config file).
    #[arg(long, value_enum)]
    pub padding: Option<Padding>,

    /// Serve canned replies instead of calling the upstream API.
    #[arg(long)]
    pub mock: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("required configuration missing: set {0}")]
    Missing(String),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Upstream completion API.
    pub upstream: UpstreamConfig,

    /// SSE framing.
    pub relay: RelayConfig,

    /// Bearer-token authentication.
    pub auth: AuthConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8000").
    pub listen: String,

    /// Frames buffered between the relay and the response body.
    pub channel_capacity: usize,

    /// Idle interval after which a keep-alive comment is sent (0 = never).
    pub keep_alive_secs: u64,

    /// Hard cap on a single stream's lifetime. Unset means unbounded.
    pub stream_deadline_secs: Option<u64>,

    /// Allow cross-origin requests from any origin.
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8000".to_string(),
            channel_capacity: 16,
            keep_alive_secs: 15,
            stream_deadline_secs: None,
            cors_permissive: false,
        }
    }
}

impl ServerConfig {
    pub fn keep_alive(&self) -> Option<Duration> {
        (self.keep_alive_secs > 0).then(|| Duration::from_secs(self.keep_alive_secs))
    }

    pub fn stream_deadline(&self) -> Option<Duration> {
        self.stream_deadline_secs.map(Duration::from_secs)
    }
}

/// Upstream API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the OpenAI-compatible API.
    pub api_base: String,

    /// Model used for every request.
    pub model: String,

    /// TCP/TLS connect timeout in seconds.
    pub connect_timeout_secs: u64,

    pub max_tokens: Option<u32>,

    pub temperature: Option<f32>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            connect_timeout_secs: 10,
            max_tokens: None,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub padding: Padding,
}

/// Authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Require a verified bearer token on streaming endpoints.
    pub enabled: bool,

    /// JWKS endpoint. The environment takes precedence.
    pub jwks_url: Option<String>,

    /// Minimum seconds between JWKS refetches on unknown `kid`.
    pub jwks_refresh_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jwks_url: None,
            jwks_refresh_secs: 30,
        }
    }
}

/// Values resolved from the environment at startup.
#[derive(Clone)]
pub struct Secrets {
    /// Upstream API key. `None` only in mock mode.
    pub api_key: Option<String>,
    /// JWKS endpoint. `None` only when auth is disabled.
    pub jwks_url: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("jwks_url", &self.jwks_url)
            .finish()
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply command-line overrides.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(listen) = &cli.listen {
            self.server.listen = listen.clone();
        }
        if let Some(padding) = cli.padding {
            self.relay.padding = padding;
        }
    }

    /// Resolve secrets through `lookup` (normally `std::env::var`).
    ///
    /// The API key is required unless `mock` is set; the JWKS URL is required
    /// while auth is enabled.
    pub fn resolve_secrets<F>(&self, mock: bool, lookup: F) -> Result<Secrets, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| lookup(name).filter(|v| !v.trim().is_empty()))
        };

        let api_key = first(API_KEY_VARS);
        if api_key.is_none() && !mock {
            return Err(ConfigError::Missing(API_KEY_VARS[0].to_string()));
        }

        let jwks_url = first(JWKS_URL_VARS).or_else(|| self.auth.jwks_url.clone());
        if jwks_url.is_none() && self.auth.enabled {
            return Err(ConfigError::Missing(JWKS_URL_VARS[0].to_string()));
        }

        Ok(Secrets { api_key, jwks_url })
    }
}
