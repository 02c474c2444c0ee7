//! Gemini API key client.

use super::types::{GenerateContentRequest, GenerateContentResponse};
use crate::provider::api_provider::Provider;
use crate::provider::client::TextGenerator;
use crate::provider::error::Error;
use crate::provider::http::{AuthConfig, HttpClient};
use async_trait::async_trait;

const API_VERSION: &str = "v1beta";

/// Normalize model name (strip any `models/` prefix).
fn normalize_model_name(model: &str) -> String {
    let trimmed = model.trim();
    trimmed
        .strip_prefix("models/")
        .unwrap_or(trimmed)
        .to_string()
}

/// Gemini client.
#[derive(Debug)]
pub struct GeminiClient {
    http: HttpClient,
    model: String,
}

impl GeminiClient {
    /// Create a new Gemini client.
    pub fn new(api_key: impl Into<String>, base_url: &str, model: &str) -> Self {
        let auth = AuthConfig::ApiKey {
            header: "x-goog-api-key".to_string(),
            key: api_key.into(),
        };
        Self {
            http: HttpClient::new(base_url, auth),
            model: normalize_model_name(model),
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    fn id(&self) -> &str {
        Provider::Google.id()
    }

    async fn generate(&self, prompt: &str) -> Result<String, Error> {
        let request = GenerateContentRequest::from_prompt(prompt);
        let path = format!("/{API_VERSION}/models/{}:generateContent", self.model);

        let response: GenerateContentResponse = self.http.post_json(&path, &request).await?;

        if let Some(usage) = &response.usage_metadata {
            tracing::debug!(
                prompt_tokens = usage.prompt_token_count,
                output_tokens = usage.candidates_token_count,
                total_tokens = usage.total_token_count,
                "Gemini usage"
            );
        }
        if let Some(reason) = response.block_reason() {
            tracing::warn!(model = %self.model, reason, "Gemini withheld the response");
        }

        Ok(response.text().unwrap_or_default())
    }
}
