//! Output validation and retry-feedback generation.
//!
//! The validator judges whether a sandbox result satisfies the original
//! request, using the text generator as an LLM judge. Its availability
//! policy is asymmetric on purpose:
//! - an unreachable or slow judge is treated as *valid* (fail-open), so
//!   infrastructure flakiness never blocks a plausible answer;
//! - an unparseable verdict is treated as *invalid*, because a judge that
//!   answered but made no sense is evidence of a real problem.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::extract;
use crate::llm::Generator;
use crate::sandbox::SandboxResult;

/// Verdict shape the judge is asked to return.
#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(default)]
    valid: bool,
    #[serde(default = "unknown_feedback")]
    feedback: String,
}

fn unknown_feedback() -> String {
    "Unknown validation error".to_string()
}

/// Judges sandbox output and produces corrective feedback for retries.
pub struct OutputValidator {
    generator: Generator,
}

impl OutputValidator {
    /// Creates a validator backed by the given generator.
    pub fn new(generator: Generator) -> Self {
        Self { generator }
    }

    /// Judges whether `result` answers the questions.
    ///
    /// Returns `(is_valid, feedback)`; never errors. Execution failures and
    /// unparseable output are rejected without a generator call.
    pub async fn validate(
        &self,
        questions_txt: &str,
        generated_code: &str,
        result: &SandboxResult,
        timeout: Duration,
    ) -> (bool, String) {
        if !result.ok {
            return (
                false,
                format!("Code execution failed with error: {}", result.stderr),
            );
        }

        let answer = match resolve_answer(result) {
            Some(answer) => answer,
            None => {
                return (
                    false,
                    format!(
                        "Code did not produce valid JSON output. Stdout was: {}",
                        preview(&result.stdout, 500)
                    ),
                )
            }
        };

        let prompt = build_validation_prompt(questions_txt, &answer, generated_code);

        let response = match self.generator.generate_text(&prompt, timeout).await {
            Ok(response) => response,
            Err(e) => {
                // Fail open: an indeterminate judge must not block the answer.
                debug!("Validator unavailable, accepting output: {e}");
                return (true, format!("Validator unavailable ({e}); accepting output"));
            }
        };

        match extract::extract_json_value(&response)
            .and_then(|value| serde_json::from_value::<Verdict>(value).ok())
        {
            Some(verdict) => (verdict.valid, verdict.feedback),
            None => (
                false,
                format!(
                    "Could not parse validator verdict. Raw response: {}",
                    preview(&response, 200)
                ),
            ),
        }
    }

    /// Summarizes what went wrong and what the next attempt should change.
    ///
    /// On generator failure or timeout, returns a synthesized fallback
    /// embedding the original failure description rather than erroring.
    pub async fn retry_feedback(
        &self,
        questions_txt: &str,
        previous_code: &str,
        failure: &str,
        result: &SandboxResult,
        timeout: Duration,
    ) -> String {
        let prompt = format!(
            "You are helping debug a Python code generation issue. The previous code failed or produced incorrect output.\n\
             \n\
             ORIGINAL QUESTIONS:\n{questions_txt}\n\
             \n\
             PREVIOUS CODE:\n{previous_code}\n\
             \n\
             ERROR/ISSUE:\n{failure}\n\
             \n\
             STDERR:\n{}\n\
             \n\
             STDOUT:\n{}\n\
             \n\
             Provide specific, actionable feedback for fixing the code:\n\
             1. What went wrong?\n\
             2. How to fix it?\n\
             3. What should the corrected code do differently?\n\
             \n\
             Be concise but specific. Your response will be used to regenerate better code.",
            preview(&result.stderr, 2000),
            preview(&result.stdout, 2000),
        );

        match self.generator.generate_text(&prompt, timeout).await {
            Ok(feedback) => feedback,
            Err(e) => format!("Could not generate feedback ({e}). Original failure: {failure}"),
        }
    }
}

/// Resolves the answer value from a successful sandbox result.
///
/// Prefers the pre-parsed `stdout_json`, falling back to parsing stdout.
pub fn resolve_answer(result: &SandboxResult) -> Option<Value> {
    result
        .stdout_json
        .clone()
        .or_else(|| serde_json::from_str(result.stdout.trim()).ok())
}

fn build_validation_prompt(questions_txt: &str, answer: &Value, generated_code: &str) -> String {
    format!(
        "You are a validator for a data analysis task. Given the user's questions and the generated output,\n\
         determine if the output correctly answers ALL the questions.\n\
         \n\
         USER QUESTIONS:\n{questions_txt}\n\
         \n\
         GENERATED OUTPUT:\n{}\n\
         \n\
         GENERATED CODE:\n{generated_code}\n\
         \n\
         VALIDATION CRITERIA:\n\
         1. Does the output format match what was requested?\n\
         2. Are all questions answered?\n\
         3. Do numeric answers seem reasonable?\n\
         4. For plots, is the base64 data URI format correct and within {max_uri} bytes?\n\
         5. Does the logic in the code appear sound?\n\
         \n\
         Respond with JSON:\n\
         {{\"valid\": true|false, \"feedback\": \"Detailed feedback for the code generator if invalid, or 'Valid' if valid\"}}",
        serde_json::to_string_pretty(answer).unwrap_or_else(|_| answer.to_string()),
        max_uri = crate::images::MAX_DATA_URI_BYTES,
    )
}

/// Truncates a string to at most `max` characters on a char boundary.
fn preview(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{truncated}...")
    }
}
