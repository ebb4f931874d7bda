//! Load progress reporting.
//!
//! Reports observable progress during `syl load` and `syl watch` so users
//! see which course is being read and how far the write phase has come.
//! Progress is emitted on **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;

/// Stage of the write phase, in pipeline order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadStage {
    Instructors,
    Modules,
    Lessons,
    Outline,
}

impl LoadStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadStage::Instructors => "instructors",
            LoadStage::Modules => "modules",
            LoadStage::Lessons => "lessons",
            LoadStage::Outline => "outline",
        }
    }
}

/// A single progress event for a load.
#[derive(Clone, Debug, PartialEq)]
pub enum LoadProgressEvent {
    /// Reading and validating the course directory.
    Parsing { path: String },
    /// n items of a stage written out of total.
    Writing {
        course: String,
        stage: LoadStage,
        n: u64,
        total: u64,
    },
    /// Committed with a fresh version token.
    Committed { course: String, token: String },
}

/// Reports load progress. Implementations write to stderr (human or JSON).
pub trait LoadProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the loader.
    fn report(&self, event: LoadProgressEvent);
}

/// Human-friendly progress on stderr: "load alpha  lessons  3 / 5".
pub struct StderrProgress;

impl LoadProgressReporter for StderrProgress {
    fn report(&self, event: LoadProgressEvent) {
        let line = match &event {
            LoadProgressEvent::Parsing { path } => format!("load {}  parsing...\n", path),
            LoadProgressEvent::Writing {
                course,
                stage,
                n,
                total,
            } => format!(
                "load {}  {}  {} / {}\n",
                course,
                stage.as_str(),
                format_number(*n),
                format_number(*total)
            ),
            LoadProgressEvent::Committed { course, token } => {
                format!("load {}  committed {}\n", course, short_token(token))
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl LoadProgressReporter for JsonProgress {
    fn report(&self, event: LoadProgressEvent) {
        let obj = match &event {
            LoadProgressEvent::Parsing { path } => serde_json::json!({
                "event": "progress",
                "phase": "parsing",
                "path": path
            }),
            LoadProgressEvent::Writing {
                course,
                stage,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "writing",
                "course": course,
                "stage": stage.as_str(),
                "n": n,
                "total": total
            }),
            LoadProgressEvent::Committed { course, token } => serde_json::json!({
                "event": "committed",
                "course": course,
                "token": token
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

impl LoadProgressReporter for NoProgress {
    fn report(&self, _event: LoadProgressEvent) {}
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

fn short_token(token: &str) -> &str {
    token.get(..12).unwrap_or(token)
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

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    /// Build a reporter for this mode. Caller can pass it to the loader.
    pub fn reporter(&self) -> Box<dyn LoadProgressReporter> {
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

    #[test]
    fn progress_mode_parse() {
        assert_eq!(ProgressMode::parse("off"), Some(ProgressMode::Off));
        assert_eq!(ProgressMode::parse("json"), Some(ProgressMode::Json));
        assert_eq!(ProgressMode::parse("loud"), None);
    }

    #[test]
    fn short_token_truncates() {
        assert_eq!(short_token("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_token("abc"), "abc");
    }
}
