//! Code generation adapter.
//!
//! Turns a [`GenerationTask`] (plus optional prior-failure feedback) into a
//! runnable Python source string via the external generator, and enforces
//! output hygiene: decorative fences are stripped (preferring the last
//! fenced block), empty responses and the canonical stub script are
//! rejected as retryable failures instead of passing useless code through.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use crate::error::CodeGenError;
use crate::extract;
use crate::llm::Generator;

/// What kind of code a task should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Consume sourced data and/or attachments and emit the final answer.
    Code,
    /// Only fetch/collect external data and emit named datasets.
    Source,
}

/// Description of what one generation attempt should accomplish.
#[derive(Debug, Clone)]
pub struct GenerationTask {
    /// Stable identifier, used in logs.
    pub id: String,
    /// Which preamble governs the generated code.
    pub kind: TaskKind,
    /// Task instructions handed to the generator.
    pub instructions: String,
    /// Arbitrary structured context (question excerpt, attachment names).
    pub context: Value,
}

impl GenerationTask {
    /// The single comprehensive analysis task the pipeline runs per request.
    pub fn comprehensive<'a>(
        questions_txt: &str,
        attachment_names: impl Iterator<Item = &'a String>,
    ) -> Self {
        let names: Vec<&str> = attachment_names.map(String::as_str).collect();
        let instructions = format!(
            "Analyze the provided questions and data to produce the requested output.\n\
             \n\
             USER QUESTIONS:\n{questions_txt}\n\
             \n\
             REQUIREMENTS:\n\
             - Read and process any provided attachments\n\
             - Answer all questions in the requested format\n\
             - If URLs are mentioned, scrape the required data\n\
             - Generate any requested visualizations as base64 data URIs\n\
             - Return the final answer as specified in the questions"
        );
        Self {
            id: "comprehensive_analysis".to_string(),
            kind: TaskKind::Code,
            instructions,
            context: json!({
                "questions_length": questions_txt.len(),
                "attachments": names,
            }),
        }
    }
}

const SOURCE_PREAMBLE: &str = r#"You are a senior data engineer. Generate a single, self-contained Python script that:
- SOURCES data only (do not answer the user's questions here).
- Reads 'questions_txt' and any provided attachments from the injected dict attachments (name -> bytes).
- If URLs are referenced, fetch the full HTML/text content (use a proper User-Agent) without assuming table names or structure before scraping.
- If files are attached, read them fully (text or tabular via pandas); include raw bytes/text as needed.
- If a database schema is provided, issue targeted SELECT queries for only relevant columns/rows.
- Return a SINGLE JSON object mapping source names to their full contents; print ONLY this JSON to stdout.
- Do not require external API keys.
- Handle redirects/HTTP failures gracefully and include error strings in the JSON if a source fails."#;

const CODE_PREAMBLE: &str = r#"You are a senior data engineer. Generate a single, self-contained Python script that:
- Uses the injected variables sourced_data (JSON-like or None), attachments (dict of name -> bytes), and questions_txt (str).
- Treats sourced_data as the PRIMARY data context; DO NOT perform any network calls or re-fetch data when sourced_data exists.
- Relies only on the injected variables above; do not read from files, stdin or environment variables provided by the runner.
- Uses libraries such as pandas, numpy, matplotlib, bs4, lxml, duckdb when needed.
- Produces exactly the final answers in the requested format (JSON array/object). If a plot is requested, return a base64 data URI under 100kB.
- Prints ONLY the final JSON string to stdout.
Robustness rules:
- Do not assume table positions/names; if parsing HTML, scan all tables and pick by header match.
- When cleaning currency/number fields, strip all non-digit/decimal characters and use pd.to_numeric(errors='coerce').
- Use deterministic operations (sorted keys/rows) when selecting from ties.
- Treat optional columns defensively: if absent, compute the answers that do not need them and set the rest to null."#;

/// Generates runnable code for tasks via the external generator.
pub struct CodeGenerator {
    generator: Generator,
}

impl CodeGenerator {
    /// Creates an adapter backed by the given generator.
    pub fn new(generator: Generator) -> Self {
        Self { generator }
    }

    /// Produces a runnable source string for `task`, bounded by `timeout`.
    ///
    /// On a retry, `feedback` from the previous failed attempt is appended
    /// verbatim to the task instructions as corrective guidance.
    pub async fn generate(
        &self,
        task: &GenerationTask,
        feedback: Option<&str>,
        timeout: Duration,
    ) -> Result<String, CodeGenError> {
        let preamble = match task.kind {
            TaskKind::Code => CODE_PREAMBLE,
            TaskKind::Source => SOURCE_PREAMBLE,
        };

        let mut prompt = format!(
            "{preamble}\n\nTASK INSTRUCTIONS:\n{}\n\nCONTEXT:\n{}",
            task.instructions, task.context
        );
        if let Some(feedback) = feedback {
            prompt.push_str("\n\nFEEDBACK FROM THE PREVIOUS FAILED ATTEMPT:\n");
            prompt.push_str(feedback);
        }

        let raw = self.generator.generate_code(&prompt, timeout).await?;
        let code = extract_python_code(&raw);

        if code.trim().is_empty() {
            return Err(CodeGenError::Empty);
        }
        if is_stub_script(&code) {
            return Err(CodeGenError::StubOutput);
        }

        debug!("Generated {} chars of code for task {}", code.len(), task.id);
        Ok(code)
    }
}

/// Pulls runnable code out of a raw generator response.
///
/// Prefers the last ```python fenced block, then the last generic fenced
/// block, then the raw response.
fn extract_python_code(raw: &str) -> String {
    extract::last_fenced_block(raw, "python")
        .or_else(|| extract::last_generic_block(raw))
        .unwrap_or_else(|| raw.trim().to_string())
}

/// Recognizes the sentinel script an unavailable generator emits.
fn is_stub_script(code: &str) -> bool {
    let lines: Vec<&str> = code
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();

    !lines.is_empty()
        && lines.iter().any(|l| l.contains("stub"))
        && lines.iter().all(|l| {
            *l == "import json" || l.replace('"', "'").replace(' ', "") == "print(json.dumps(['stub']))"
        })
}
