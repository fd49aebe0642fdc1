//! Isolated execution of generated analysis code.
//!
//! Generated code is untrusted: it runs in a separate OS process so a
//! runaway or hostile script can neither corrupt this process nor outlive
//! its wall-clock budget. The harness pre-populates three bindings before
//! the generated code runs: `attachments` (name -> bytes), `questions_txt`
//! (str) and `sourced_data` (previously fetched JSON, or `None`).
//!
//! Every payload crosses into the harness base64-encoded and is decoded at
//! harness start, so no attachment content, questions text or sourced data
//! can alter the syntactic structure of the script.

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::Value;
use tracing::{debug, warn};

/// Sentinel written to stderr when execution exceeds its budget.
pub const TIMEOUT_SENTINEL: &str = "timeout";

/// Outcome of one sandboxed execution. Never mutated after creation.
#[derive(Debug, Clone)]
pub struct SandboxResult {
    /// Whether the process launched and exited with status zero.
    pub ok: bool,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error, or a launch/timeout description.
    pub stderr: String,
    /// Best-effort parse of stdout as a single JSON value.
    pub stdout_json: Option<Value>,
}

impl SandboxResult {
    /// Result for a process that never produced usable output.
    fn failure(stderr: impl Into<String>) -> Self {
        Self {
            ok: false,
            stdout: String::new(),
            stderr: stderr.into(),
            stdout_json: None,
        }
    }

    /// Result for an execution that exceeded its wall-clock budget.
    fn timed_out() -> Self {
        Self::failure(TIMEOUT_SENTINEL)
    }
}

/// Runs generated Python code in an isolated child process.
#[derive(Debug, Clone)]
pub struct Sandbox {
    /// Interpreter to launch (e.g. "python3").
    python_bin: String,
}

impl Sandbox {
    /// Creates a sandbox that launches the given interpreter.
    pub fn new(python_bin: impl Into<String>) -> Self {
        Self {
            python_bin: python_bin.into(),
        }
    }

    /// Executes `code` with the injected bindings, bounded by `timeout`.
    ///
    /// This never errors: launch failures, timeouts and non-zero exits all
    /// resolve to a `SandboxResult` with `ok == false` so that every
    /// failure mode flows through the same retry path.
    pub async fn execute(
        &self,
        code: &str,
        attachments: &BTreeMap<String, Vec<u8>>,
        questions_txt: &str,
        sourced_data: Option<&Value>,
        timeout: Duration,
    ) -> SandboxResult {
        let script = compose_harness(code, attachments, questions_txt, sourced_data);

        // NamedTempFile removes the script on drop, on every exit path.
        let script_file = match tempfile::Builder::new()
            .prefix("analyst-harness-")
            .suffix(".py")
            .tempfile()
        {
            Ok(file) => file,
            Err(e) => return SandboxResult::failure(format!("harness setup failed: {e}")),
        };
        if let Err(e) = std::fs::write(script_file.path(), &script) {
            return SandboxResult::failure(format!("harness setup failed: {e}"));
        }

        debug!(
            "Executing {} byte harness with {:?} budget",
            script.len(),
            timeout
        );

        let mut command = tokio::process::Command::new(&self.python_bin);
        command
            .arg(script_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return SandboxResult::failure(format!(
                    "failed to launch {}: {e}",
                    self.python_bin
                ))
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            // Dropping the wait future drops the child handle; kill_on_drop
            // terminates the process and the runtime reaps it.
            Err(_elapsed) => {
                warn!("Sandbox execution exceeded its {:?} budget", timeout);
                SandboxResult::timed_out()
            }
            Ok(Err(e)) => SandboxResult::failure(format!("sandbox wait failed: {e}")),
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                let stdout_json = serde_json::from_str::<Value>(stdout.trim()).ok();
                SandboxResult {
                    ok: output.status.success(),
                    stdout,
                    stderr,
                    stdout_json,
                }
            }
        }
    }
}

/// Harness prologue: decoding helpers plus the injected-binding table.
const HARNESS_PRELUDE: &str = "\
# generated execution harness
import sys, io, json, base64

def _b64(payload):
    return base64.b64decode(payload)

def _b64s(payload):
    return base64.b64decode(payload).decode('utf-8', 'ignore')

attachments = {}
";

/// Composes the runnable harness around the generated code.
///
/// Exactly one substitution point per injected binding, each transported
/// through base64 so the payload cannot break out of its slot.
fn compose_harness(
    code: &str,
    attachments: &BTreeMap<String, Vec<u8>>,
    questions_txt: &str,
    sourced_data: Option<&Value>,
) -> String {
    let mut script = String::from(HARNESS_PRELUDE);

    for (name, content) in attachments {
        script.push_str(&format!(
            "attachments[_b64s('{}')] = _b64('{}')\n",
            BASE64.encode(name.as_bytes()),
            BASE64.encode(content),
        ));
    }

    script.push_str(&format!(
        "questions_txt = _b64s('{}')\n",
        BASE64.encode(questions_txt.as_bytes()),
    ));

    match sourced_data {
        Some(value) => {
            let payload = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
            script.push_str(&format!(
                "sourced_data = json.loads(_b64s('{}'))\n",
                BASE64.encode(payload.as_bytes()),
            ));
        }
        None => script.push_str("sourced_data = None\n"),
    }

    script.push_str("\n# generated code starts here\n");
    script.push_str(code);
    script.push('\n');
    script
}
