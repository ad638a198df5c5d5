//! Run progress reporting.
//!
//! Reports observable progress during `chix run` so users see how many
//! planned actions are done and how many remain. Progress is emitted on
//! **stderr** so stdout (the plan and the report) remains parseable.

use std::io::Write;

/// A single progress event for a reconciliation run.
#[derive(Clone, Debug)]
pub enum RunProgressEvent {
    /// Connector is producing the item set. Total unknown.
    Scanning { connector: String },
    /// Apply phase: `n` actions settled out of `total`.
    Applying {
        connector: String,
        n: u64,
        total: u64,
        failed: u64,
    },
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait RunProgressReporter: Send + Sync {
    /// Emit a progress event. Called from apply workers concurrently.
    fn report(&self, event: RunProgressEvent);
}

/// Human-friendly progress on stderr: "run terraform  applying  12 / 40 actions".
pub struct StderrProgress;

impl RunProgressReporter for StderrProgress {
    fn report(&self, event: RunProgressEvent) {
        let line = match &event {
            RunProgressEvent::Scanning { connector } => {
                format!("run {}  scanning...\n", connector)
            }
            RunProgressEvent::Applying {
                connector,
                n,
                total,
                failed,
            } => {
                let mut line = format!(
                    "run {}  applying  {} / {} actions",
                    connector,
                    format_number(*n),
                    format_number(*total)
                );
                if *failed > 0 {
                    line.push_str(&format!("  ({} failed)", format_number(*failed)));
                }
                line.push('\n');
                line
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RunProgressReporter for JsonProgress {
    fn report(&self, event: RunProgressEvent) {
        let obj = match &event {
            RunProgressEvent::Scanning { connector } => serde_json::json!({
                "event": "progress",
                "connector": connector,
                "phase": "scanning"
            }),
            RunProgressEvent::Applying {
                connector,
                n,
                total,
                failed,
            } => serde_json::json!({
                "event": "progress",
                "connector": connector,
                "phase": "applying",
                "n": n,
                "total": total,
                "failed": failed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl RunProgressReporter for NoProgress {
    fn report(&self, _event: RunProgressEvent) {}
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

    pub fn reporter(&self) -> std::sync::Arc<dyn RunProgressReporter> {
        match self {
            ProgressMode::Off => std::sync::Arc::new(NoProgress),
            ProgressMode::Human => std::sync::Arc::new(StderrProgress),
            ProgressMode::Json => std::sync::Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }
}
