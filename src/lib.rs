//! analyst-agent: an agentic data-analyst service.
//!
//! A client uploads a natural-language questions file plus optional data
//! attachments; the service generates, executes and validates LLM-authored
//! analysis code until it produces a JSON-shaped answer within a hard
//! wall-clock deadline, degrading to a typed-placeholder response when it
//! cannot finish in time.

// Core modules
pub mod codegen;
pub mod error;
pub mod extract;
pub mod format;
pub mod images;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod sandbox;
pub mod server;
pub mod validator;

// Re-export commonly used error types
pub use error::{CodeGenError, LlmError};
pub use pipeline::config::{ConfigError, PipelineConfig};
