//! Collection progress reporting.
//!
//! The collector publishes [`ProgressEvent`]s on a bounded
//! `tokio::sync::mpsc` channel; a slow consumer slows the collector down
//! rather than letting events pile up. [`spawn_reporter`] drains the
//! channel into a [`ProgressReporter`] and returns the final
//! [`ProgressTally`] once the collector drops its sender.
//!
//! Reporters write to **stderr** so stdout remains parseable for scripts.

use serde::Serialize;
use std::io::Write;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use sightline_core::FailureKind;

/// A single progress event from a collection run.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    TaskStarted {
        task: String,
        source: String,
    },
    TaskCompleted {
        task: String,
        fetched: u64,
        new: u64,
        duplicates: u64,
        rejected: u64,
    },
    RecordNew {
        source: String,
        natural_key: String,
        record_id: String,
    },
    RecordDuplicate {
        source: String,
        natural_key: String,
        record_id: String,
    },
    TaskFailed {
        task: String,
        kind: FailureKind,
        message: String,
    },
}

/// Reports collection progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Human-friendly progress on stderr: "collect daily:2024-01-01..2024-01-31  done  1,234 fetched".
///
/// Per-record events are only counted, not printed.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &ProgressEvent) {
        let line = match event {
            ProgressEvent::TaskStarted { task, .. } => format!("collect {}  started\n", task),
            ProgressEvent::TaskCompleted {
                task,
                fetched,
                new,
                duplicates,
                rejected,
            } => format!(
                "collect {}  done  {} fetched, {} new, {} duplicate, {} rejected\n",
                task,
                format_number(*fetched),
                format_number(*new),
                format_number(*duplicates),
                format_number(*rejected)
            ),
            ProgressEvent::TaskFailed {
                task,
                kind,
                message,
            } => format!("collect {}  failed ({:?}): {}\n", task, kind, message),
            ProgressEvent::RecordNew { .. } | ProgressEvent::RecordDuplicate { .. } => return,
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &ProgressEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Group digits in thousands: `1234567` -> `"1,234,567"`.
fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Which reporter drains the progress channel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human lines for an interactive stderr, nothing when piped or logged.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            return ProgressMode::Human;
        }
        ProgressMode::Off
    }

    pub fn reporter(self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Event counts observed by a reporter task.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgressTally {
    pub tasks_started: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub records_new: u64,
    pub records_duplicate: u64,
}

impl ProgressTally {
    fn observe(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::TaskStarted { .. } => self.tasks_started += 1,
            ProgressEvent::TaskCompleted { .. } => self.tasks_completed += 1,
            ProgressEvent::TaskFailed { .. } => self.tasks_failed += 1,
            ProgressEvent::RecordNew { .. } => self.records_new += 1,
            ProgressEvent::RecordDuplicate { .. } => self.records_duplicate += 1,
        }
    }
}

/// Drain `rx` into `reporter` until every sender is dropped.
pub fn spawn_reporter(
    mut rx: mpsc::Receiver<ProgressEvent>,
    reporter: Box<dyn ProgressReporter>,
) -> JoinHandle<ProgressTally> {
    tokio::spawn(async move {
        let mut tally = ProgressTally::default();
        while let Some(event) = rx.recv().await {
            tally.observe(&event);
            reporter.report(&event);
        }
        tally
    })
}
