//! Pipeline coordination for the data-analyst service.
//!
//! The orchestrator ties the format extractor, code generator, sandbox and
//! validator together into a deadline-governed retry loop; configuration
//! lives in [`config`].

pub mod config;
pub mod orchestrator;

pub use config::{ConfigError, PipelineConfig};
pub use orchestrator::{Deadline, Pipeline};
