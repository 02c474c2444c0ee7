//! Provider client: credential check, liveness probe and single-shot generation.

use super::api_provider::Provider;
use super::error::Error;
use super::gemini::GeminiClient;
use super::huggingface::HuggingFaceClient;
use async_trait::async_trait;
use std::sync::Arc;

/// Prompt sent once at startup to prove the key and endpoint work.
const PROBE_PROMPT: &str = "Hello";

/// A generative-text backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Provider identifier.
    fn id(&self) -> &str;
    /// Generate text for a prompt. May return an empty string.
    async fn generate(&self, prompt: &str) -> Result<String, Error>;
}

/// Everything needed to build a backend. Resolved by the caller.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    pub provider: Provider,
    pub api_key: Option<String>,
    /// Overrides [`Provider::default_model`].
    pub model: Option<String>,
    /// Overrides [`Provider::default_base_url`]. Used for proxies and tests.
    pub base_url: Option<String>,
}

impl ProviderSettings {
    pub fn new(provider: Provider, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: Some(api_key.into()),
            model: None,
            base_url: None,
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// The API key, if one is set and not blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.provider.default_model())
    }

    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
    }
}

/// A probed, ready-to-use backend.
///
/// No retries happen here: a failed call is returned to the caller as-is.
#[derive(Clone)]
pub struct ProviderClient {
    name: String,
    backend: Arc<dyn TextGenerator>,
}

impl std::fmt::Debug for ProviderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderClient")
            .field("name", &self.name)
            .field("backend", &self.backend.id())
            .finish()
    }
}

impl ProviderClient {
    /// Validate the credential, build the backend and probe it.
    pub async fn initialize(settings: &ProviderSettings) -> Result<Self, Error> {
        let api_key = settings
            .api_key()
            .ok_or_else(|| settings.provider.missing_key_error())?;

        let backend: Arc<dyn TextGenerator> = match settings.provider {
            Provider::Google => Arc::new(GeminiClient::new(
                api_key,
                settings.base_url(),
                settings.model(),
            )),
            Provider::HuggingFace => Arc::new(HuggingFaceClient::new(
                api_key,
                settings.base_url(),
                settings.model(),
            )),
        };

        Self::connect(settings.provider.name(), backend).await
    }

    /// Probe an already constructed backend.
    pub async fn connect(
        name: impl Into<String>,
        backend: Arc<dyn TextGenerator>,
    ) -> Result<Self, Error> {
        let name = name.into();
        match backend.generate(PROBE_PROMPT).await {
            Ok(_) => {
                tracing::info!(backend = %name, "Provider initialized");
                Ok(Self { name, backend })
            }
            Err(e) => {
                tracing::error!(backend = %name, error = %e, "Provider probe failed");
                Err(Error::Unavailable {
                    backend: name,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Display name of the backend.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Generate text; empty output counts as a failure. Anything else,
    /// whitespace included, is returned untouched.
    pub async fn generate(&self, prompt: &str) -> Result<String, Error> {
        let text = self.backend.generate(prompt).await?;
        if text.is_empty() {
            return Err(Error::EmptyResponse {
                backend: self.name.clone(),
            });
        }
        Ok(text)
    }
}
