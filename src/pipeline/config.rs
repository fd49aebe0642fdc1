//! Tunables for the deadline-governed pipeline.
//!
//! Stage caps, abort thresholds and retry limits are configuration, not
//! hardcoded business rules: every duration here can be overridden from
//! the environment, and `validate()` rejects combinations that would make
//! the deadline accounting unsound.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while loading or checking configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment override did not parse.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// The assembled configuration is internally inconsistent.
    #[error("configuration rejected: {0}")]
    ValidationFailed(String),
}

/// Tunables for one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Retry settings
    /// Maximum number of generate/execute/validate attempts per request.
    pub max_attempts: u32,

    // Deadline accounting
    /// Floor below which the remaining budget is never reported; keeps
    /// stage timeouts positive even when the deadline is exhausted.
    pub remaining_floor: Duration,
    /// Abort before code generation if no more than this remains.
    pub min_before_generation: Duration,
    /// Abort before sandbox execution if no more than this remains.
    pub min_before_execution: Duration,
    /// Skip validation (degraded success) if no more than this remains.
    pub min_before_validation: Duration,
    /// Skip feedback generation if no more than this remains.
    pub min_before_feedback: Duration,

    // Per-stage timeout caps
    /// Cap on the format-extraction call.
    pub format_cap: Duration,
    /// Cap on one code-generation call.
    pub generation_cap: Duration,
    /// Cap on one sandbox execution.
    pub execution_cap: Duration,
    /// Cap on one validation call.
    pub validation_cap: Duration,
    /// Cap on one feedback-generation call.
    pub feedback_cap: Duration,

    // Sandbox settings
    /// Interpreter used for sandboxed execution.
    pub python_bin: String,

    // Logging settings
    /// Directory for per-request log files.
    pub log_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,

            remaining_floor: Duration::from_secs(5),
            min_before_generation: Duration::from_secs(10),
            min_before_execution: Duration::from_secs(15),
            min_before_validation: Duration::from_secs(20),
            min_before_feedback: Duration::from_secs(30),

            format_cap: Duration::from_secs(30),
            generation_cap: Duration::from_secs(60),
            execution_cap: Duration::from_secs(90),
            validation_cap: Duration::from_secs(30),
            feedback_cap: Duration::from_secs(30),

            python_bin: "python3".to_string(),
            log_dir: PathBuf::from("./logs"),
        }
    }
}

impl PipelineConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with `ANALYST_*` environment overrides applied.
    ///
    /// # Environment Variables
    ///
    /// - `ANALYST_MAX_ATTEMPTS`: attempts per request (default: 3)
    /// - `ANALYST_REMAINING_FLOOR_SECS`: budget floor (default: 5)
    /// - `ANALYST_MIN_BEFORE_GENERATION_SECS` (default: 10)
    /// - `ANALYST_MIN_BEFORE_EXECUTION_SECS` (default: 15)
    /// - `ANALYST_MIN_BEFORE_VALIDATION_SECS` (default: 20)
    /// - `ANALYST_MIN_BEFORE_FEEDBACK_SECS` (default: 30)
    /// - `ANALYST_FORMAT_CAP_SECS` (default: 30)
    /// - `ANALYST_GENERATION_CAP_SECS` (default: 60)
    /// - `ANALYST_EXECUTION_CAP_SECS` (default: 90)
    /// - `ANALYST_VALIDATION_CAP_SECS` (default: 30)
    /// - `ANALYST_FEEDBACK_CAP_SECS` (default: 30)
    /// - `ANALYST_PYTHON_BIN`: sandbox interpreter (default: python3)
    /// - `ANALYST_LOG_DIR`: per-request log directory (default: ./logs)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            max_attempts: env_parse("ANALYST_MAX_ATTEMPTS", defaults.max_attempts)?,
            remaining_floor: env_secs("ANALYST_REMAINING_FLOOR_SECS", defaults.remaining_floor)?,
            min_before_generation: env_secs(
                "ANALYST_MIN_BEFORE_GENERATION_SECS",
                defaults.min_before_generation,
            )?,
            min_before_execution: env_secs(
                "ANALYST_MIN_BEFORE_EXECUTION_SECS",
                defaults.min_before_execution,
            )?,
            min_before_validation: env_secs(
                "ANALYST_MIN_BEFORE_VALIDATION_SECS",
                defaults.min_before_validation,
            )?,
            min_before_feedback: env_secs(
                "ANALYST_MIN_BEFORE_FEEDBACK_SECS",
                defaults.min_before_feedback,
            )?,
            format_cap: env_secs("ANALYST_FORMAT_CAP_SECS", defaults.format_cap)?,
            generation_cap: env_secs("ANALYST_GENERATION_CAP_SECS", defaults.generation_cap)?,
            execution_cap: env_secs("ANALYST_EXECUTION_CAP_SECS", defaults.execution_cap)?,
            validation_cap: env_secs("ANALYST_VALIDATION_CAP_SECS", defaults.validation_cap)?,
            feedback_cap: env_secs("ANALYST_FEEDBACK_CAP_SECS", defaults.feedback_cap)?,
            python_bin: std::env::var("ANALYST_PYTHON_BIN").unwrap_or(defaults.python_bin),
            log_dir: std::env::var("ANALYST_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
        })
    }

    /// Validates that the configuration is internally consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.remaining_floor.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "remaining_floor must be positive".to_string(),
            ));
        }
        if self.remaining_floor >= self.min_before_generation {
            return Err(ConfigError::ValidationFailed(
                "remaining_floor must be below min_before_generation, otherwise the \
                 generation abort check can never trigger"
                    .to_string(),
            ));
        }
        if self.python_bin.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "python_bin must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

fn env_secs(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(env_parse(
        key,
        default.as_secs(),
    )?))
}
