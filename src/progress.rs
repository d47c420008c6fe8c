//! Upload progress reporting.
//!
//! The dispatcher counts finished chunks on a [`ProgressTracker`] and the
//! tracker emits an [`UploadProgressEvent`] every [`REPORT_EVERY`]
//! completions and at the final one. Counting is a single atomic add and
//! reporters must not block, so progress never sits on the write path.
//!
//! The server logs progress through `tracing`; CLI uploads print it on
//! **stderr** so stdout stays parseable for scripts.

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Completions between two progress reports.
pub const REPORT_EVERY: usize = 5;

/// Snapshot of a dispatch in flight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadProgressEvent {
    pub request_id: String,
    pub completed: usize,
    pub total: usize,
}

impl UploadProgressEvent {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed as f64 / self.total as f64 * 100.0
        }
    }
}

/// Receives progress events. Implementations must return promptly.
pub trait UploadProgressReporter: Send + Sync {
    fn report(&self, event: UploadProgressEvent);
}

/// Logs progress at info level.
pub struct LogProgress;

impl UploadProgressReporter for LogProgress {
    fn report(&self, event: UploadProgressEvent) {
        tracing::info!(
            request_id = %event.request_id,
            "upload progress: {}/{} chunks ({:.1}%)",
            event.completed,
            event.total,
            event.percent()
        );
    }
}

/// Human-friendly progress on stderr: "upload  1,234 / 5,000 chunks (24.7%)".
pub struct StderrProgress;

impl UploadProgressReporter for StderrProgress {
    fn report(&self, event: UploadProgressEvent) {
        let line = format!(
            "upload  {} / {} chunks ({:.1}%)\n",
            format_number(event.completed as u64),
            format_number(event.total as u64),
            event.percent()
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl UploadProgressReporter for JsonProgress {
    fn report(&self, event: UploadProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "request_id": event.request_id,
            "completed": event.completed,
            "total": event.total,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl UploadProgressReporter for NoProgress {
    fn report(&self, _event: UploadProgressEvent) {}
}

/// Best-effort completion counter shared by all chunk tasks of a dispatch.
pub struct ProgressTracker {
    request_id: String,
    total: usize,
    completed: AtomicUsize,
    reporter: Arc<dyn UploadProgressReporter>,
}

impl ProgressTracker {
    pub fn new(
        request_id: impl Into<String>,
        total: usize,
        reporter: Arc<dyn UploadProgressReporter>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            total,
            completed: AtomicUsize::new(0),
            reporter,
        }
    }

    /// Count one finished chunk and report if it falls on the cadence.
    pub fn record(&self) {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if completed % REPORT_EVERY == 0 || completed == self.total {
            self.reporter.report(UploadProgressEvent {
                request_id: self.request_id.clone(),
                completed,
                total: self.total,
            });
        }
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for CLI uploads: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn UploadProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}
