//! Supported generative-text backends.

use serde::{Deserialize, Serialize};

/// Backend a [`ProviderClient`](super::ProviderClient) talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google AI Studio (Gemini)
    #[default]
    Google,
    /// Hugging Face serverless inference
    HuggingFace,
}

impl Provider {
    pub const ALL: &'static [Provider] = &[Provider::Google, Provider::HuggingFace];

    /// Lowercase ID for config storage and CLI flags.
    pub fn id(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::HuggingFace => "huggingface",
        }
    }

    /// Parse provider from ID string.
    pub fn from_id(id: &str) -> Option<Self> {
        match id.to_lowercase().as_str() {
            "google" | "gemini" => Some(Provider::Google),
            "huggingface" | "hf" => Some(Provider::HuggingFace),
            _ => None,
        }
    }

    /// Display name, also used in user-facing error text.
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Google => "Gemini",
            Provider::HuggingFace => "Hugging Face",
        }
    }

    /// Environment variables that may carry the API key, in lookup order.
    pub fn env_vars(&self) -> &'static [&'static str] {
        match self {
            Provider::Google => &["GOOGLE_AI_API_KEY", "GEMINI_API_KEY"],
            Provider::HuggingFace => &["HUGGINGFACE_API_KEY", "HF_TOKEN"],
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Google => "https://generativelanguage.googleapis.com",
            Provider::HuggingFace => "https://api-inference.huggingface.co",
        }
    }

    /// Model used when the config does not name one. Both fit free tiers.
    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::Google => "gemini-1.5-flash",
            Provider::HuggingFace => "microsoft/DialoGPT-large",
        }
    }

    pub(crate) fn missing_key_error(&self) -> super::Error {
        super::Error::MissingApiKey {
            backend: self.name().to_string(),
            env_vars: self.env_vars().iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_id(s).ok_or_else(|| {
            let known: Vec<_> = Self::ALL.iter().map(Provider::id).collect();
            format!("unknown provider '{s}' (expected one of: {})", known.join(", "))
        })
    }
}
