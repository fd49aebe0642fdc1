//! OpenAI-compatible chat-completions client.
//!
//! The service talks to whichever endpoint `ANALYST_API_BASE` points at
//! (the default is Gemini's OpenAI-compatible surface). A missing API key
//! is not a startup error: calls fail at request time and the pipeline
//! degrades to its fallback behavior instead.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{GenerationRequest, GenerationResponse, LlmProvider};
use crate::error::LlmError;

/// Default API base when `ANALYST_API_BASE` is not set.
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";

/// Client for OpenAI-compatible chat-completions APIs.
pub struct LlmClient {
    /// Base URL for the API.
    api_base: String,
    /// Optional API key for authentication.
    api_key: Option<String>,
    /// HTTP client for making API requests.
    http_client: Client,
}

impl LlmClient {
    /// Create a new client with explicit configuration.
    pub fn new(api_base: String, api_key: Option<String>) -> Self {
        Self {
            api_base,
            api_key,
            http_client: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Create a new client from environment variables.
    ///
    /// Reads:
    /// - `ANALYST_API_BASE`: base URL (defaults to [`DEFAULT_API_BASE`])
    /// - `ANALYST_API_KEY`: API key (optional; placeholder values such as
    ///   "test" or "dummy" are treated as absent)
    pub fn from_env() -> Self {
        let api_base = env::var("ANALYST_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let api_key = env::var("ANALYST_API_KEY").ok().filter(|k| is_real_key(k));
        Self::new(api_base, api_key)
    }

    /// Get the API base URL.
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Check if an API key is configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Rejects placeholder keys commonly used in dev environments.
fn is_real_key(key: &str) -> bool {
    let lower = key.trim().to_lowercase();
    !lower.is_empty()
        && lower != "test"
        && lower != "dummy"
        && lower != "placeholder"
        && !lower.starts_with("test_")
}

#[async_trait]
impl LlmProvider for LlmClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));

        let mut http_request = self.http_client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError {
                code: status.as_u16(),
                message,
            });
        }

        response
            .json::<GenerationResponse>()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_keys_rejected() {
        assert!(!is_real_key("test"));
        assert!(!is_real_key("DUMMY"));
        assert!(!is_real_key("test_123"));
        assert!(!is_real_key(""));
        assert!(is_real_key("sk-abc123"));
    }

    #[test]
    fn test_client_without_key() {
        let client = LlmClient::new("http://localhost:4000".to_string(), None);
        assert!(!client.has_api_key());
        assert_eq!(client.api_base(), "http://localhost:4000");
    }
}
