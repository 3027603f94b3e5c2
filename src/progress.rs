//! Batch progress reporting.
//!
//! The orchestrator emits one [`BatchProgressEvent`] per state change. CLI
//! reporters write to **stderr** so stdout stays parseable for scripts;
//! [`WatchProgress`] publishes the latest [`BatchProgress`] snapshot on a
//! `tokio::sync::watch` channel for callers that render their own counter.

use std::io::Write;
use tokio::sync::watch;

/// A single progress event for a batch run. Indices are zero-based.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchProgressEvent {
    Started { total: usize },
    /// Request for prompt `index` is about to be sent.
    Generating {
        index: usize,
        total: usize,
        prompt: String,
    },
    Generated { index: usize, total: usize },
    /// Prompt `index` failed; the batch stops here.
    Failed { index: usize, total: usize },
}

/// Reports batch progress.
pub trait BatchProgressReporter: Send + Sync {
    fn report(&self, event: BatchProgressEvent);
}

/// Human-friendly progress on stderr: "generating  3 / 12  a red fox".
pub struct StderrProgress;

impl BatchProgressReporter for StderrProgress {
    fn report(&self, event: BatchProgressEvent) {
        let line = match &event {
            BatchProgressEvent::Started { total } => {
                format!("batch  {} prompts\n", format_number(*total))
            }
            BatchProgressEvent::Generating {
                index,
                total,
                prompt,
            } => format!(
                "generating  {} / {}  {}\n",
                format_number(index + 1),
                format_number(*total),
                preview(prompt, 50)
            ),
            BatchProgressEvent::Generated { index, total } => {
                format!("generated  {} / {}\n", format_number(index + 1), format_number(*total))
            }
            BatchProgressEvent::Failed { index, total } => {
                format!("failed  {} / {}\n", format_number(index + 1), format_number(*total))
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl BatchProgressReporter for JsonProgress {
    fn report(&self, event: BatchProgressEvent) {
        let obj = match &event {
            BatchProgressEvent::Started { total } => serde_json::json!({
                "event": "progress",
                "phase": "started",
                "total": total
            }),
            BatchProgressEvent::Generating {
                index,
                total,
                prompt,
            } => serde_json::json!({
                "event": "progress",
                "phase": "generating",
                "n": index + 1,
                "total": total,
                "prompt": prompt
            }),
            BatchProgressEvent::Generated { index, total } => serde_json::json!({
                "event": "progress",
                "phase": "generated",
                "n": index + 1,
                "total": total
            }),
            BatchProgressEvent::Failed { index, total } => serde_json::json!({
                "event": "progress",
                "phase": "failed",
                "n": index + 1,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl BatchProgressReporter for NoProgress {
    fn report(&self, _event: BatchProgressEvent) {}
}

/// Snapshot of a running batch. `current` is the zero-based index of the
/// prompt in flight, `None` before the first request and after the last.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchProgress {
    pub current: Option<usize>,
    pub completed: usize,
    pub total: usize,
    pub failed: bool,
}

/// Publishes [`BatchProgress`] on a watch channel.
pub struct WatchProgress {
    tx: watch::Sender<BatchProgress>,
}

impl WatchProgress {
    pub fn new() -> (Self, watch::Receiver<BatchProgress>) {
        let (tx, rx) = watch::channel(BatchProgress::default());
        (Self { tx }, rx)
    }
}

impl BatchProgressReporter for WatchProgress {
    fn report(&self, event: BatchProgressEvent) {
        self.tx.send_modify(|p| match event {
            BatchProgressEvent::Started { total } => {
                *p = BatchProgress {
                    total,
                    ..BatchProgress::default()
                };
            }
            BatchProgressEvent::Generating { index, total, .. } => {
                p.current = Some(index);
                p.total = total;
            }
            BatchProgressEvent::Generated { index, .. } => {
                p.completed = index + 1;
                p.current = None;
            }
            BatchProgressEvent::Failed { .. } => {
                p.failed = true;
                p.current = None;
            }
        });
    }
}

fn preview(prompt: &str, max_chars: usize) -> String {
    if prompt.chars().count() > max_chars {
        let head: String = prompt.chars().take(max_chars).collect();
        format!("{}...", head)
    } else {
        prompt.to_string()
    }
}

fn format_number(n: usize) -> String {
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

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
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

    pub fn reporter(&self) -> Box<dyn BatchProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
