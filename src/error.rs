//! Error types for analyst-agent operations.
//!
//! Defines error types for the major subsystems:
//! - LLM API interactions
//! - Code generation output hygiene
//!
//! Sandbox failures are deliberately not an error type: the sandbox always
//! resolves to a [`crate::sandbox::SandboxResult`] so that launch errors,
//! timeouts and non-zero exits all flow through the same retry path.
//! Configuration errors live in [`crate::pipeline::config`].

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Generation returned no content")]
    EmptyResponse,

    #[error("LLM call exceeded its {0:?} budget")]
    Timeout(std::time::Duration),
}

/// Errors that can occur while turning a generation task into runnable code.
///
/// All variants are retryable from the orchestrator's point of view.
#[derive(Debug, Error)]
pub enum CodeGenError {
    #[error("Generator returned an empty response")]
    Empty,

    #[error("Generator returned the placeholder stub script")]
    StubOutput,

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}
