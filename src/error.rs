use crate::classify::ErrorKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("download canceled by user")]
    Canceled,

    #[error("could not verify media at {url}")]
    ProbeInconclusive { url: String },

    #[error("external tool is missing: {tool}")]
    ExternalToolMissing { tool: String },

    #[error("external tool failed: {tool} (code={code:?}) {stderr}")]
    ExternalToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{}: {detail}", kind.summary())]
    Classified { kind: ErrorKind, detail: String },

    #[error("session already has a download in progress: {0}")]
    SessionBusy(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("invalid download request: {0}")]
    InvalidRequest(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, EngineError::Canceled)
    }

    /// Errors that end the whole session instead of one item or chunk.
    pub fn aborts_session(&self) -> bool {
        matches!(
            self,
            EngineError::Canceled | EngineError::ExternalToolMissing { .. }
        )
    }

    /// User-facing remediation for classified failures.
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            EngineError::Classified { kind, .. } => Some(kind.remediation()),
            EngineError::ExternalToolMissing { .. } => Some(
                "yt-dlp is required. Reinstall the dependencies from the settings panel or put yt-dlp on PATH.",
            ),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
