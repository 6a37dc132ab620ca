//! Capabilities the core consumes from its host: a per-session output sink
//! and a human decision prompt.

use crate::paths::AppPaths;
use crate::progress::ProgressEvent;
use crate::session::SessionId;
use crate::Result;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

const SESSION_LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;
const SESSION_LOG_MAX_BACKUPS: usize = 2;

pub trait SessionSink: Send + Sync {
    fn log(&self, session: &SessionId, message: &str);

    /// The download target is locked by another program.
    fn file_in_use(&self, session: &SessionId, file_name: &str);

    fn progress(&self, session: &SessionId, event: &ProgressEvent) {
        let _ = (session, event);
    }
}

/// Appends one JSON object per line to `logs/sessions/<session>.jsonl`,
/// rotating the file once it grows past a size cap.
pub struct JsonlSessionLog {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSessionLog {
    pub fn new(paths: &AppPaths) -> Self {
        Self {
            dir: paths.session_logs_dir(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn log_path(&self, session: &SessionId) -> PathBuf {
        self.dir.join(format!("{session}.jsonl"))
    }

    fn append(&self, session: &SessionId, event: &str, data: serde_json::Value) -> Result<()> {
        let line = serde_json::json!({
            "ts_ms": now_ms(),
            "session_id": session.as_str(),
            "event": event,
            "data": data,
        })
        .to_string();

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::fs::create_dir_all(&self.dir)?;
        let path = self.log_path(session);
        rotate_if_needed(&path)?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?
            .write_all(format!("{line}\n").as_bytes())?;
        Ok(())
    }

    fn append_best_effort(&self, session: &SessionId, event: &str, data: serde_json::Value) {
        if let Err(err) = self.append(session, event, data) {
            log::warn!("session {session}: failed to write session log: {err}");
        }
    }
}

impl SessionSink for JsonlSessionLog {
    fn log(&self, session: &SessionId, message: &str) {
        self.append_best_effort(session, "log", serde_json::json!({ "message": message }));
    }

    fn file_in_use(&self, session: &SessionId, file_name: &str) {
        self.append_best_effort(
            session,
            "file_in_use",
            serde_json::json!({ "file_name": file_name }),
        );
    }

    fn progress(&self, session: &SessionId, event: &ProgressEvent) {
        self.append_best_effort(
            session,
            "progress",
            serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
        );
    }
}

fn rotate_if_needed(path: &Path) -> Result<()> {
    let len = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(_) => return Ok(()),
    };
    if len < SESSION_LOG_ROTATE_BYTES {
        return Ok(());
    }
    for idx in (1..SESSION_LOG_MAX_BACKUPS).rev() {
        let from = with_suffix(path, &format!(".{idx}"));
        if from.exists() {
            std::fs::rename(&from, with_suffix(path, &format!(".{}", idx + 1)))?;
        }
    }
    std::fs::rename(path, with_suffix(path, ".1"))?;
    Ok(())
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Context shown to the user when a probe could not verify an item.
#[derive(Debug, Clone, Serialize)]
pub struct InaccessibleContext {
    pub session: SessionId,
    pub title: String,
    pub url: String,
    /// 1-based position and collection size; `None` for single items.
    pub position: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LowerResolutionContext {
    pub session: SessionId,
    pub title: String,
    pub url: String,
    pub requested_height: u32,
    pub available_height: u32,
    pub position: Option<(usize, usize)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LowerResolutionDecision {
    Skip,
    DownloadLower,
    CancelAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InaccessibleDecision {
    Skip,
    /// Try the download anyway without a verified resolution.
    Retry,
    CancelAll,
}

/// Blocking human prompt. A cancel request does not close an open prompt;
/// the caller re-checks its token once the call returns.
pub trait DecisionPrompt: Send + Sync {
    fn confirm_lower_resolution(&self, ctx: &LowerResolutionContext) -> LowerResolutionDecision;

    fn resolve_inaccessible(&self, ctx: &InaccessibleContext) -> InaccessibleDecision;
}
