//! Progress lines from yt-dlp's `--newline` output.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// One progress update from a running tool. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub stage: String,
    pub percent_text: String,
    pub message: String,
}

impl ProgressEvent {
    pub fn percent(&self) -> Option<f64> {
        self.percent_text.trim_end_matches('%').trim().parse().ok()
    }
}

/// Parses `--newline` progress output such as
/// `[download]  42.3% of ~ 12.00MiB at 1.2MiB/s ETA 00:07`.
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RE
        .get_or_init(|| Regex::new(r"^\[([A-Za-z]+)\]\s+(\d{1,3}(?:\.\d+)?%)").ok())
        .as_ref()?;
    let line = line.trim();
    let caps = re.captures(line)?;
    Some(ProgressEvent {
        stage: caps.get(1)?.as_str().to_ascii_lowercase(),
        percent_text: caps.get(2)?.as_str().to_string(),
        message: line.to_string(),
    })
}
