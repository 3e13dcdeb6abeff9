use std::time::Duration;

use serde::Deserialize;

/// Which backend the client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The HTTP API, whichever store sits behind it
    Rest,
    /// A document database accessed directly
    Document,
}

/// Client configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Base URL of the HTTP API, including the `/api` prefix
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// File the signed-in identity is persisted to
    #[serde(default = "default_session_path")]
    pub session_path: String,

    /// Upper bound on every remote call
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    #[serde(default = "default_provider_cache_ttl_secs")]
    pub provider_cache_ttl_secs: u64,
}

fn default_api_base_url() -> String {
    "http://localhost:5000/api".to_string()
}

fn default_backend() -> BackendKind {
    BackendKind::Rest
}

fn default_session_path() -> String {
    ".movieguru_session.json".to_string()
}

fn default_operation_timeout_secs() -> u64 {
    15
}

fn default_provider_cache_ttl_secs() -> u64 {
    3600
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend
    }
}
