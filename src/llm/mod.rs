//! LLM integration for analyst-agent.
//!
//! The external generator is treated as an unreliable collaborator: possibly
//! unavailable, possibly slow, possibly wrong. Everything above this module
//! consumes it through [`Generator`], which enforces a caller-imposed
//! timeout on every call, and providers are swappable behind the
//! [`LlmProvider`] trait (the pipeline tests script one in memory).

pub mod client;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

pub use client::LlmClient;

/// One chat message on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Sender role: "system", "user" or "assistant".
    pub role: String,
    /// Message text.
    pub content: String,
}

impl Message {
    /// Builds a system-role message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Builds a user-role message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Chat-completions request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model to generate with.
    pub model: String,
    /// Conversation so far.
    pub messages: Vec<Message>,
    /// Sampling temperature; omitted from the wire when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Completion length limit; omitted from the wire when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Builds a request with default sampling parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Overrides the sampling temperature.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Chat-completions response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Provider-assigned response id.
    #[serde(default)]
    pub id: String,
    /// Model that produced the completion.
    #[serde(default)]
    pub model: String,
    /// Returned completions; the pipeline only ever reads the first.
    pub choices: Vec<Choice>,
}

impl GenerationResponse {
    /// Content of the first choice, if the provider returned any.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }
}

/// One completion within a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    /// Position within the response.
    #[serde(default)]
    pub index: u32,
    /// The completion itself.
    pub message: Message,
    /// Why generation stopped ("stop", "length", ...).
    #[serde(default)]
    pub finish_reason: String,
}

/// Anything that can serve a chat-completions request.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Produces a completion for the request.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Timeout-enforcing facade over an [`LlmProvider`].
///
/// Splits generation into the two capabilities the pipeline consumes:
/// plain text (planning, judging) on a fast model and code on a stronger
/// one. Every call is bounded by the caller's timeout; a hung upstream
/// call surfaces as [`LlmError::Timeout`] instead of stalling the
/// deadline clock.
#[derive(Clone)]
pub struct Generator {
    provider: Arc<dyn LlmProvider>,
    text_model: String,
    code_model: String,
}

impl Generator {
    /// Default model for non-coding reasoning and judging.
    pub const DEFAULT_TEXT_MODEL: &'static str = "gemini-2.5-flash";
    /// Default model for code generation.
    pub const DEFAULT_CODE_MODEL: &'static str = "gemini-2.5-pro";

    /// Creates a generator with explicit model choices.
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        text_model: impl Into<String>,
        code_model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            text_model: text_model.into(),
            code_model: code_model.into(),
        }
    }

    /// Creates a generator with models taken from the environment.
    ///
    /// Reads `ANALYST_TEXT_MODEL` and `ANALYST_CODE_MODEL`, falling back to
    /// the defaults above.
    pub fn from_env(provider: Arc<dyn LlmProvider>) -> Self {
        let text_model = std::env::var("ANALYST_TEXT_MODEL")
            .unwrap_or_else(|_| Self::DEFAULT_TEXT_MODEL.to_string());
        let code_model = std::env::var("ANALYST_CODE_MODEL")
            .unwrap_or_else(|_| Self::DEFAULT_CODE_MODEL.to_string());
        Self::new(provider, text_model, code_model)
    }

    /// Generates plain text from a prompt, bounded by `timeout`.
    pub async fn generate_text(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, LlmError> {
        self.call(&self.text_model, prompt, timeout).await
    }

    /// Generates source code from a prompt, bounded by `timeout`.
    ///
    /// The raw response may still contain markdown fences; the caller is
    /// responsible for extraction and output hygiene.
    pub async fn generate_code(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, LlmError> {
        self.call(&self.code_model, prompt, timeout).await
    }

    async fn call(&self, model: &str, prompt: &str, limit: Duration) -> Result<String, LlmError> {
        let request = GenerationRequest::new(model, vec![Message::user(prompt)]);
        let response = tokio::time::timeout(limit, self.provider.generate(request))
            .await
            .map_err(|_| LlmError::Timeout(limit))??;

        match response.first_content() {
            Some(content) if !content.trim().is_empty() => Ok(content.to_string()),
            _ => Err(LlmError::EmptyResponse),
        }
    }
}
