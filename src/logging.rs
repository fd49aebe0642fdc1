//! Per-request append-only file logs.
//!
//! Each inbound request gets its own log file so a single run can be
//! reconstructed after the fact. Writes are fire-and-forget: a log call
//! must never fail observably or affect control flow, so every I/O error
//! is swallowed. Messages within one request are ordered; ordering across
//! concurrent requests is not guaranteed (they write to different files).

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Append-only log session for one request.
#[derive(Debug, Clone)]
pub struct RequestLog {
    path: Option<PathBuf>,
}

impl RequestLog {
    /// Creates a log session writing to `dir/{prefix}-{ts}-{id}.log`.
    ///
    /// The directory is created if missing; if that fails the session is
    /// still usable and simply drops messages.
    pub fn create(dir: &Path, prefix: &str) -> Self {
        let _ = std::fs::create_dir_all(dir);

        let ts = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let id = Uuid::new_v4().simple().to_string();
        let path = dir.join(format!("{prefix}-{ts}-{}.log", &id[..8]));

        let log = Self { path: Some(path) };
        log.log(&format!("Log session started: {}", chrono::Local::now()));
        log
    }

    /// A session that writes nothing. Used by tests and one-shot runs.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    /// Appends a timestamped message. Never fails observably.
    pub fn log(&self, message: &str) {
        let Some(path) = &self.path else { return };

        let ts = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let _ = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "[{ts}] {message}"));
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
