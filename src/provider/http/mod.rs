//! Shared HTTP utilities for provider backends.

mod client;

pub use client::{AuthConfig, HttpClient};
