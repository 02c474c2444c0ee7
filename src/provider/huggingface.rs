//! Hugging Face serverless inference client.

use crate::provider::api_provider::Provider;
use crate::provider::client::TextGenerator;
use crate::provider::error::Error;
use crate::provider::http::{AuthConfig, HttpClient};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters,
}

#[derive(Debug, Serialize)]
struct InferenceParameters {
    max_length: u32,
    temperature: f32,
    do_sample: bool,
}

impl Default for InferenceParameters {
    fn default() -> Self {
        Self {
            max_length: 500,
            temperature: 0.7,
            do_sample: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeneratedText {
    #[serde(default)]
    generated_text: Option<String>,
}

#[derive(Debug)]
pub struct HuggingFaceClient {
    http: HttpClient,
    model: String,
}

impl HuggingFaceClient {
    pub fn new(api_key: impl Into<String>, base_url: &str, model: &str) -> Self {
        Self {
            http: HttpClient::new(base_url, AuthConfig::Bearer(api_key.into())),
            model: model.trim().to_string(),
        }
    }
}

#[async_trait]
impl TextGenerator for HuggingFaceClient {
    fn id(&self) -> &str {
        Provider::HuggingFace.id()
    }

    async fn generate(&self, prompt: &str) -> Result<String, Error> {
        let request = InferenceRequest {
            inputs: prompt,
            parameters: InferenceParameters::default(),
        };
        let path = format!("/models/{}", self.model);

        let outputs: Vec<GeneratedText> = self.http.post_json(&path, &request).await?;

        Ok(outputs
            .into_iter()
            .next()
            .and_then(|o| o.generated_text)
            .unwrap_or_default())
    }
}
