//! Apply progress reporting.
//!
//! Reports observable progress during `fhz apply` so operators see how far
//! the rewrite has come and when the store is fully harmonized. Progress is
//! emitted on **stderr** so stdout remains parseable for scripts; the HTTP
//! server consumes the same events through a channel-backed reporter in
//! [`jobs`](crate::jobs).
//!
//! Ordering guarantee: `current` is monotonically non-decreasing for a given
//! job, and exactly one terminal event (`Completed` or `Error`) is delivered
//! per job.

use std::io::Write;

/// A single progress event for an apply job.
#[derive(Clone, Debug, PartialEq)]
pub enum ApplyEvent {
    /// Batch boundary: `current` documents scanned out of `total`.
    Progress { current: u64, total: u64 },
    /// Terminal: the run finished (including cancelled/aborted runs, which
    /// describe themselves in `message`).
    Completed { message: String },
    /// Terminal: the run failed fatally.
    Error { message: String },
}

/// Reports apply progress. Implementations write to stderr (human or JSON)
/// or forward into a channel.
pub trait ApplyProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the apply loop at batch boundaries.
    fn report(&self, event: &ApplyEvent);
}

/// Human-friendly progress on stderr: "apply  1,234 / 5,000 documents".
pub struct StderrProgress;

impl ApplyProgressReporter for StderrProgress {
    fn report(&self, event: &ApplyEvent) {
        let line = match event {
            ApplyEvent::Progress { current, total } => {
                format!(
                    "apply  {} / {} documents\n",
                    format_number(*current),
                    format_number(*total)
                )
            }
            ApplyEvent::Completed { message } => format!("apply  {}\n", message),
            ApplyEvent::Error { message } => format!("apply  error: {}\n", message),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ApplyProgressReporter for JsonProgress {
    fn report(&self, event: &ApplyEvent) {
        let obj = match event {
            ApplyEvent::Progress { current, total } => serde_json::json!({
                "event": "progress",
                "current": current,
                "total": total
            }),
            ApplyEvent::Completed { message } => serde_json::json!({
                "event": "completed",
                "message": message
            }),
            ApplyEvent::Error { message } => serde_json::json!({
                "event": "error",
                "message": message
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

impl ApplyProgressReporter for NoProgress {
    fn report(&self, _event: &ApplyEvent) {}
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

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
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

    /// Build a reporter for this mode. Caller passes it to the applier.
    pub fn reporter(&self) -> Box<dyn ApplyProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
