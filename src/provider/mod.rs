//! Generative-text provider abstraction.
//!
//! A [`ProviderClient`] hides authentication and transport behind one
//! operation: generate text for a prompt. Backends implement
//! [`TextGenerator`]; Google Gemini and Hugging Face inference ship built in.
//!
//! # Example
//!
//! ```ignore
//! use herald::provider::{Provider, ProviderClient, ProviderSettings};
//!
//! let settings = ProviderSettings::new(Provider::Google, api_key);
//! let client = ProviderClient::initialize(&settings).await?;
//! let text = client.generate("Say hi").await?;
//! ```

mod api_provider;
mod client;
mod error;
mod gemini;
mod http;
mod huggingface;

pub use api_provider::Provider;
pub use client::{ProviderClient, ProviderSettings, TextGenerator};
pub use error::{Error, Error as ProviderError, format_api_error};
pub use gemini::GeminiClient;
pub use huggingface::HuggingFaceClient;
