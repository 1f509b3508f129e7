//! Indexing progress reporting.
//!
//! Reports observable progress while a run walks the tree and pushes
//! batches, so operators can see what is being scanned and how much is
//! left. Progress is emitted on **stderr** so stdout stays parseable for
//! the end-of-run summary.

use std::io::Write;
use std::sync::Arc;

/// A single progress event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Directory walk in progress. Total unknown.
    Discovering { dirs: u64, files: u64 },
    /// `n` of `total` scheduled files have been chunked.
    Processing { n: u64, total: u64 },
    /// A batch of chunks was embedded and written.
    Flushed { batch: u64, chunks: u64 },
}

/// Receives progress events from discovery and the pipeline.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "index  processing  1,234 / 5,000 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Discovering { dirs, files } => format!(
                "index  scanning  {} directories, {} files so far\n",
                format_number(*dirs),
                format_number(*files)
            ),
            ProgressEvent::Processing { n, total } => format!(
                "index  processing  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Flushed { batch, chunks } => format!(
                "index  batch {}  {} chunks written\n",
                format_number(*batch),
                format_number(*chunks)
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Discovering { dirs, files } => serde_json::json!({
                "event": "progress",
                "phase": "discovering",
                "dirs": dirs,
                "files": files
            }),
            ProgressEvent::Processing { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "processing",
                "n": n,
                "total": total
            }),
            ProgressEvent::Flushed { batch, chunks } => serde_json::json!({
                "event": "progress",
                "phase": "flushed",
                "batch": batch,
                "chunks": chunks
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Format an integer with thousands separators.
pub fn format_number(n: u64) -> String {
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
    /// Parse the `--progress` flag. `auto` picks human output on a TTY.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::default_for_tty()),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            "off" => Some(ProgressMode::Off),
            _ => None,
        }
    }

    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
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

    #[test]
    fn parse_modes() {
        assert_eq!(ProgressMode::parse("json"), Some(ProgressMode::Json));
        assert_eq!(ProgressMode::parse("off"), Some(ProgressMode::Off));
        assert_eq!(ProgressMode::parse("loud"), None);
    }
}
