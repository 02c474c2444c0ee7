use crate::error::Result;
use crate::provider::{Provider, ProviderSettings};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend answering messages.
    pub provider: Provider,
    pub google_api_key: Option<String>,
    pub huggingface_api_key: Option<String>,
    /// Model override. None uses the provider default.
    pub model: Option<String>,
    /// Endpoint override for proxies or self-hosted gateways.
    pub base_url: Option<String>,

    /// User id the agent posts as.
    pub agent_user_id: String,

    /// Agents idle longer than this are disposed by the registry sweep.
    /// Default: 3600 (1 hour).
    pub idle_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            google_api_key: None,
            huggingface_api_key: None,
            model: None,
            base_url: None,
            agent_user_id: "ai-bot".to_string(),
            idle_timeout_secs: 3600,
        }
    }
}

impl Config {
    /// Default config file location.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("herald").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".herald/config.toml"))
    }

    /// API key configured for the active provider.
    pub fn api_key(&self) -> Option<&str> {
        let key = match self.provider {
            Provider::Google => self.google_api_key.as_deref(),
            Provider::HuggingFace => self.huggingface_api_key.as_deref(),
        };
        key.map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Settings for building the active provider's client.
    pub fn provider_settings(&self) -> ProviderSettings {
        ProviderSettings {
            provider: self.provider,
            api_key: self.api_key().map(str::to_string),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
        }
    }

    /// Load from the default path, then apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path())
    }

    /// Load from `path` (missing file means defaults), then apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };
        config.apply_env(|var| std::env::var(var).ok());
        Ok(config)
    }

    /// Fill API keys from the environment. Environment wins over the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first_set = |provider: Provider| {
            provider
                .env_vars()
                .iter()
                .filter_map(|var| lookup(var))
                .find(|v| !v.trim().is_empty())
        };
        if let Some(key) = first_set(Provider::Google) {
            self.google_api_key = Some(key);
        }
        if let Some(key) = first_set(Provider::HuggingFace) {
            self.huggingface_api_key = Some(key);
        }
    }
}
