//! Google Gemini client using the public `generateContent` API.
//!
//! Authenticates with an AI Studio API key sent in `x-goog-api-key`.

mod client;
mod types;

pub use client::GeminiClient;
