//! Deadline-governed pipeline orchestration.
//!
//! One run per inbound request: extract the expected answer format once,
//! then loop generate -> execute -> validate under a single monotonic
//! deadline clock, retrying with corrective feedback until an answer
//! validates, the attempt budget is spent, or the clock runs out. The run
//! always resolves to a JSON value — a real answer, a degraded
//! (unvalidated) answer, a populated placeholder template, or a structured
//! error object — never an error to the caller.

use std::cmp::min;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::codegen::{CodeGenerator, GenerationTask};
use crate::format::{populate_with_fallback, FormatExtractor};
use crate::llm::Generator;
use crate::logging::RequestLog;
use crate::sandbox::{Sandbox, SandboxResult};
use crate::validator::{resolve_answer, OutputValidator};

use super::config::PipelineConfig;

/// Monotonic deadline clock shared by one pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    total: Duration,
    floor: Duration,
}

impl Deadline {
    /// Starts the clock with a total budget and a reporting floor.
    pub fn start(total: Duration, floor: Duration) -> Self {
        Self {
            start: Instant::now(),
            total,
            floor,
        }
    }

    /// Remaining budget, clamped at the floor.
    ///
    /// The clamp keeps every derived stage timeout positive; the abort
    /// thresholds sit above the floor, so an exhausted clock still
    /// short-circuits the loop.
    pub fn remaining(&self) -> Duration {
        self.total.saturating_sub(self.start.elapsed()).max(self.floor)
    }

    /// Time elapsed since the clock started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// The generate/execute/validate pipeline for one service instance.
///
/// Holds only read-only configuration and collaborators; concurrent
/// requests share it freely.
pub struct Pipeline {
    config: PipelineConfig,
    format: FormatExtractor,
    codegen: CodeGenerator,
    validator: OutputValidator,
    sandbox: Sandbox,
}

impl Pipeline {
    /// Creates a pipeline from validated configuration and a generator.
    pub fn new(config: PipelineConfig, generator: Generator) -> Self {
        let sandbox = Sandbox::new(config.python_bin.clone());
        Self {
            format: FormatExtractor::new(generator.clone()),
            codegen: CodeGenerator::new(generator.clone()),
            validator: OutputValidator::new(generator),
            sandbox,
            config,
        }
    }

    /// Runs the pipeline for one request. Always resolves to a JSON value.
    pub async fn run(
        &self,
        questions_txt: &str,
        attachments: &BTreeMap<String, Vec<u8>>,
        deadline_budget: Duration,
        log: &RequestLog,
    ) -> Value {
        let deadline = Deadline::start(deadline_budget, self.config.remaining_floor);

        log.log("Pipeline start");
        log.log(&format!("Questions length: {} chars", questions_txt.len()));
        log.log(&format!(
            "Attachments: {:?}",
            attachments.keys().collect::<Vec<_>>()
        ));
        info!(
            "Pipeline start: {} chars of questions, {} attachments, {:?} budget",
            questions_txt.len(),
            attachments.len(),
            deadline_budget
        );

        // Derive the fallback shape once, up front, while budget is plentiful.
        let template = self
            .format
            .extract(
                questions_txt,
                min(self.config.format_cap, deadline.remaining()),
            )
            .await;
        log.log(&format!(
            "Format template: {}",
            template
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_else(|| "none".to_string())
        ));

        let task = GenerationTask::comprehensive(questions_txt, attachments.keys());

        let mut current_code: Option<String> = None;
        let mut last_result: Option<SandboxResult> = None;
        let mut last_failure: Option<String> = None;

        for attempt in 1..=self.config.max_attempts {
            if deadline.remaining() <= self.config.min_before_generation {
                log.log("Budget too low for another generation attempt");
                break;
            }

            log.log(&format!(
                "Attempt {attempt}/{} (remaining {:?})",
                self.config.max_attempts,
                deadline.remaining()
            ));

            // Corrective feedback for retries.
            let feedback = match (attempt > 1, current_code.as_deref(), last_result.as_ref()) {
                (true, Some(code), Some(result))
                    if deadline.remaining() > self.config.min_before_feedback =>
                {
                    log.log("Generating feedback for code regeneration");
                    let feedback = self
                        .validator
                        .retry_feedback(
                            questions_txt,
                            code,
                            last_failure
                                .as_deref()
                                .unwrap_or("Previous attempt failed validation or execution"),
                            result,
                            min(self.config.feedback_cap, deadline.remaining()),
                        )
                        .await;
                    Some(feedback)
                }
                // Not enough budget (or no prior result): reuse the raw
                // failure description instead of another generator call.
                (true, _, _) => last_failure.clone(),
                _ => None,
            };

            // Generate.
            let code = match self
                .codegen
                .generate(
                    &task,
                    feedback.as_deref(),
                    min(self.config.generation_cap, deadline.remaining()),
                )
                .await
            {
                Ok(code) => code,
                Err(e) => {
                    warn!("Code generation failed on attempt {attempt}: {e}");
                    log.log(&format!("Code generation failed: {e}"));
                    last_failure = Some(format!("Code generation failed: {e}"));
                    continue;
                }
            };
            log.log(&format!("Generated code: {} chars", code.len()));
            current_code = Some(code.clone());

            if deadline.remaining() <= self.config.min_before_execution {
                log.log("Budget too low for execution");
                break;
            }

            // Execute.
            let result = self
                .sandbox
                .execute(
                    &code,
                    attachments,
                    questions_txt,
                    None,
                    min(self.config.execution_cap, deadline.remaining()),
                )
                .await;
            if result.ok {
                log.log(&format!(
                    "Sandbox execution OK; stdout preview: {}",
                    &result.stdout.chars().take(400).collect::<String>()
                ));
            } else {
                log.log(&format!("Sandbox execution ERROR; stderr: {}", result.stderr));
                last_failure = Some(format!(
                    "Code execution failed with error: {}",
                    result.stderr
                ));
                last_result = Some(result);
                continue;
            }

            // Degraded success: validation budget is gone, accept the raw
            // parsed output rather than miss the deadline.
            if deadline.remaining() <= self.config.min_before_validation {
                if let Some(answer) = resolve_answer(&result) {
                    log.log("Validation skipped (budget); returning unvalidated output");
                    info!("Returning unvalidated output after {:?}", deadline.elapsed());
                    return answer;
                }
                last_failure = Some("Output was not valid JSON".to_string());
                last_result = Some(result);
                continue;
            }

            // Validate.
            let (valid, verdict) = self
                .validator
                .validate(
                    questions_txt,
                    &code,
                    &result,
                    min(self.config.validation_cap, deadline.remaining()),
                )
                .await;
            log.log(&format!(
                "Validation result: {}",
                if valid { "VALID" } else { "INVALID" }
            ));

            if valid {
                if let Some(answer) = resolve_answer(&result) {
                    info!(
                        "Pipeline completed on attempt {attempt} after {:?}",
                        deadline.elapsed()
                    );
                    log.log(&format!("Pipeline completed successfully on attempt {attempt}"));
                    return answer;
                }
                last_failure =
                    Some("Validator accepted output but stdout was not valid JSON".to_string());
            } else {
                log.log(&format!("Validation feedback: {verdict}"));
                last_failure = Some(verdict);
            }
            last_result = Some(result);
        }

        // RESOLVE: attempts exhausted or budget gone.
        debug!("Resolving without a validated answer: {:?}", last_failure);
        log.log("No validated answer; resolving with fallback");
        match &template {
            Some(template) => populate_with_fallback(Some(template)),
            None => json!({
                "error": "Pipeline failed to produce a validated answer within the time budget",
                "detail": last_failure.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    enum Reply {
        Text(String),
        Fail,
        Sleep(Duration),
    }

    /// Provider that plays back a scripted sequence of replies, then
    /// repeats a fallback behavior once the script is exhausted.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Reply>>,
        fallback: Reply,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Reply>, fallback: Reply) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let reply = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());

            match reply {
                Reply::Fail => Err(LlmError::RequestFailed("connection refused".to_string())),
                Reply::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    Err(LlmError::RequestFailed("upstream hung".to_string()))
                }
                Reply::Text(content) => Ok(GenerationResponse {
                    id: "r".to_string(),
                    model: request.model,
                    choices: vec![Choice {
                        index: 0,
                        message: Message {
                            role: "assistant".to_string(),
                            content,
                        },
                        finish_reason: "stop".to_string(),
                    }],
                }),
            }
        }
    }

    fn pipeline_with(provider: Arc<ScriptedProvider>, config: PipelineConfig) -> Pipeline {
        Pipeline::new(config, Generator::new(provider, "flash", "pro"))
    }

    fn no_attachments() -> BTreeMap<String, Vec<u8>> {
        BTreeMap::new()
    }

    #[test]
    fn test_deadline_remaining_clamps_at_floor() {
        let deadline = Deadline::start(Duration::ZERO, Duration::from_secs(5));
        assert_eq!(deadline.remaining(), Duration::from_secs(5));

        let deadline = Deadline::start(Duration::from_secs(100), Duration::from_secs(5));
        assert!(deadline.remaining() > Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_retry_bound_is_respected() {
        // Every call fails: one format call plus exactly max_attempts
        // generation calls, no more.
        let provider = Arc::new(ScriptedProvider::new(vec![], Reply::Fail));
        let pipeline = pipeline_with(provider.clone(), PipelineConfig::default());

        let value = pipeline
            .run(
                "Output [1,2,3] as JSON array",
                &no_attachments(),
                Duration::from_secs(300),
                &RequestLog::disabled(),
            )
            .await;

        assert_eq!(provider.calls(), 1 + 3);
        assert!(value.get("error").is_some());
    }

    #[tokio::test]
    async fn test_unavailable_generator_yields_populated_template() {
        // The format call succeeds with an array-of-one-number template;
        // everything afterwards fails.
        let provider = Arc::new(ScriptedProvider::new(
            vec![Reply::Text("[7]".to_string())],
            Reply::Fail,
        ));
        let pipeline = pipeline_with(provider.clone(), PipelineConfig::default());

        let value = pipeline
            .run(
                "Output [1,2,3] as JSON array",
                &no_attachments(),
                Duration::from_secs(300),
                &RequestLog::disabled(),
            )
            .await;

        assert_eq!(value, json!([0]));
    }

    #[tokio::test]
    async fn test_slow_generator_aborts_before_deadline() {
        // Generator sleeps far longer than the whole deadline; the run must
        // resolve to the fallback without hanging past the budget.
        let config = PipelineConfig {
            remaining_floor: Duration::from_millis(50),
            min_before_generation: Duration::from_millis(300),
            min_before_execution: Duration::from_millis(300),
            min_before_validation: Duration::from_millis(300),
            min_before_feedback: Duration::from_millis(300),
            ..Default::default()
        };
        let provider = Arc::new(ScriptedProvider::new(
            vec![],
            Reply::Sleep(Duration::from_secs(20)),
        ));
        let pipeline = pipeline_with(provider, config);

        let start = Instant::now();
        let value = pipeline
            .run(
                "anything",
                &no_attachments(),
                Duration::from_secs(1),
                &RequestLog::disabled(),
            )
            .await;

        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(value.get("error").is_some());
    }

    #[tokio::test]
    async fn test_successful_attempt_returns_answer() {
        // format -> template, generation -> runnable code, judge -> valid.
        let provider = Arc::new(ScriptedProvider::new(
            vec![
                Reply::Text("[0]".to_string()),
                Reply::Text(
                    "```python\nimport json\nprint(json.dumps([1, 2, 3]))\n```".to_string(),
                ),
                Reply::Text("{\"valid\": true, \"feedback\": \"Valid\"}".to_string()),
            ],
            Reply::Fail,
        ));
        let pipeline = pipeline_with(provider.clone(), PipelineConfig::default());

        let value = pipeline
            .run(
                "Output [1,2,3] as JSON array",
                &no_attachments(),
                Duration::from_secs(300),
                &RequestLog::disabled(),
            )
            .await;

        assert_eq!(value, json!([1, 2, 3]));
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_validation_skipped_when_budget_low() {
        // min_before_validation above the whole deadline forces the
        // degraded-success path: output accepted without a judge call.
        let config = PipelineConfig {
            min_before_validation: Duration::from_secs(600),
            ..Default::default()
        };
        let provider = Arc::new(ScriptedProvider::new(
            vec![
                Reply::Fail, // format extraction
                Reply::Text(
                    "```python\nimport json\nprint(json.dumps({\"a\": 1}))\n```".to_string(),
                ),
            ],
            Reply::Fail,
        ));
        let pipeline = pipeline_with(provider.clone(), config);

        let value = pipeline
            .run(
                "Output {\"a\": 1}",
                &no_attachments(),
                Duration::from_secs(300),
                &RequestLog::disabled(),
            )
            .await;

        assert_eq!(value, json!({"a": 1}));
        // Format + generation only; no validation or feedback calls.
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_invalid_verdict_triggers_feedback_and_retry() {
        // First attempt executes but the judge rejects it; the second
        // attempt consumes feedback and passes.
        let provider = Arc::new(ScriptedProvider::new(
            vec![
                Reply::Fail, // format extraction
                Reply::Text(
                    "```python\nimport json\nprint(json.dumps([1]))\n```".to_string(),
                ),
                Reply::Text(
                    "{\"valid\": false, \"feedback\": \"Array must have 3 elements\"}".to_string(),
                ),
                Reply::Text("Return all three elements.".to_string()), // retry feedback
                Reply::Text(
                    "```python\nimport json\nprint(json.dumps([1, 2, 3]))\n```".to_string(),
                ),
                Reply::Text("{\"valid\": true, \"feedback\": \"Valid\"}".to_string()),
            ],
            Reply::Fail,
        ));
        let pipeline = pipeline_with(provider.clone(), PipelineConfig::default());

        let value = pipeline
            .run(
                "Output [1,2,3] as JSON array",
                &no_attachments(),
                Duration::from_secs(300),
                &RequestLog::disabled(),
            )
            .await;

        assert_eq!(value, json!([1, 2, 3]));
        assert_eq!(provider.calls(), 6);
    }
}
