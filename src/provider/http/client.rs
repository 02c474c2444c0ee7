//! JSON-over-HTTPS transport shared by the Gemini and Hugging Face backends.

use crate::provider::error::Error;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

/// Whole-request limit; free-tier inference can queue for a while.
const TIMEOUT: Duration = Duration::from_secs(120);
/// Limit on reaching the host at all.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How a backend proves its API key.
#[derive(Clone)]
pub enum AuthConfig {
    /// `Authorization: Bearer {token}` (Hugging Face).
    Bearer(String),
    /// Key in a named header, e.g. `x-goog-api-key` (Gemini).
    ApiKey { header: String, key: String },
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bearer(_) => f.debug_tuple("Bearer").field(&"[REDACTED]").finish(),
            Self::ApiKey { header, .. } => f
                .debug_struct("ApiKey")
                .field("header", header)
                .field("key", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Posts prompts to one backend's base URL with its credential attached.
#[derive(Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    auth: AuthConfig,
}

impl HttpClient {
    pub fn new(base_url: impl Into<String>, auth: AuthConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into(),
            auth,
        }
    }

    /// JSON content type plus the credential header.
    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        match &self.auth {
            AuthConfig::Bearer(token) => {
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| Error::Api("Bearer token contains invalid header characters".into()))?;
                headers.insert(AUTHORIZATION, value);
            }
            AuthConfig::ApiKey { header, key } => {
                let name = reqwest::header::HeaderName::try_from(header)
                    .map_err(|_| Error::Api("API key header name is invalid".into()))?;
                let value = HeaderValue::from_str(key)
                    .map_err(|_| Error::Api("API key contains invalid header characters".into()))?;
                headers.insert(name, value);
            }
        }

        Ok(headers)
    }

    /// POST `body` to `{base_url}{path}` and decode the JSON reply.
    ///
    /// 429 maps to `RateLimited`, other non-2xx statuses to `Api` with the
    /// raw body, undecodable 2xx bodies to `InvalidResponse`.
    pub async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<R, Error> {
        let url = format!("{}{path}", self.base_url.trim_end_matches('/'));
        let headers = self.build_headers()?;
        tracing::debug!(%url, "POST");

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited {
                retry_after: retry_after_secs(&response),
            });
        }

        let text = response.text().await?;
        if !status.is_success() {
            return Err(Error::Api(format!("HTTP {status}: {text}")));
        }
        serde_json::from_str(&text)
            .map_err(|e| Error::InvalidResponse(format!("{e}\nBody: {text}")))
    }
}

/// Seconds to wait, from a 429's `Retry-After` header.
fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    let value = response.headers().get(RETRY_AFTER)?.to_str().ok()?;
    parse_retry_after_value(value)
}

/// Whole seconds, rounded up and at least 1. HTTP dates are not supported.
fn parse_retry_after_value(s: &str) -> Option<u64> {
    let s = s.trim();
    let secs = match s.parse::<u64>() {
        Ok(secs) => secs,
        Err(_) => {
            let f = s.parse::<f64>().ok().filter(|f| f.is_finite() && *f > 0.0)?;
            f.ceil() as u64
        }
    };
    Some(secs.max(1))
}
