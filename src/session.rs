//! Session identity, download requests and the table of open sessions.

use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Stable identifier of one open Wave (tab).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
}

/// Requested vertical resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Resolution {
    Best,
    Height(u32),
}

impl Resolution {
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim().trim_end_matches('p');
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("best") {
            return Some(Resolution::Best);
        }
        match trimmed.parse::<u32>() {
            Ok(0) => None,
            Ok(h) => Some(Resolution::Height(h)),
            Err(_) => None,
        }
    }

    pub fn height(&self) -> Option<u32> {
        match self {
            Resolution::Best => None,
            Resolution::Height(h) => Some(*h),
        }
    }
}

impl TryFrom<String> for Resolution {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        Resolution::parse(&value).ok_or_else(|| format!("invalid resolution: {value}"))
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        match value {
            Resolution::Best => "best".to_string(),
            Resolution::Height(h) => h.to_string(),
        }
    }
}

/// Display name for a height, e.g. `Full HD (1080p)`.
pub fn resolution_label(height: u32) -> String {
    match height {
        2160 => "4K (2160p)".to_string(),
        1440 => "2K (1440p)".to_string(),
        1080 => "Full HD (1080p)".to_string(),
        720 => "HD (720p)".to_string(),
        480 => "SD (480p)".to_string(),
        other => format!("{other}p"),
    }
}

/// Everything one "start download" needs from the tab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub target_url: String,
    pub media_kind: MediaKind,
    /// Merge container for video (`mp4`, `mkv`) or audio codec (`mp3`, `m4a`).
    pub container_format: String,
    pub desired_resolution: Resolution,
    /// Falls back to the preferences' default download path when unset.
    #[serde(default)]
    pub destination_directory: Option<PathBuf>,
    #[serde(default)]
    pub ignore_collection: bool,
    #[serde(default)]
    pub allow_lower_resolution: bool,
    #[serde(default)]
    pub auth_cookies_path: Option<PathBuf>,
    /// Subfolder created under the destination for collection downloads.
    #[serde(default)]
    pub collection_folder_name: Option<String>,
}

impl DownloadRequest {
    pub fn video(url: impl Into<String>, resolution: Resolution) -> Self {
        Self {
            target_url: url.into(),
            media_kind: MediaKind::Video,
            container_format: "mp4".to_string(),
            desired_resolution: resolution,
            destination_directory: None,
            ignore_collection: false,
            allow_lower_resolution: false,
            auth_cookies_path: None,
            collection_folder_name: None,
        }
    }

    pub fn audio(url: impl Into<String>, format: impl Into<String>) -> Self {
        Self {
            target_url: url.into(),
            media_kind: MediaKind::Audio,
            container_format: format.into(),
            desired_resolution: Resolution::Best,
            destination_directory: None,
            ignore_collection: false,
            allow_lower_resolution: false,
            auth_cookies_path: None,
            collection_folder_name: None,
        }
    }

    /// Height that has to be verified before downloading, if any.
    pub fn strict_height(&self) -> Option<u32> {
        if self.media_kind != MediaKind::Video || self.allow_lower_resolution {
            return None;
        }
        self.desired_resolution.height()
    }

    pub fn cookie_file(&self) -> Option<&PathBuf> {
        self.auth_cookies_path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    ResolvingTarget,
    EnumeratingPlaylist,
    ProbingResolution,
    Downloading,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        !matches!(
            self,
            SessionState::Idle
                | SessionState::Completed
                | SessionState::Cancelled
                | SessionState::Failed
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub label: String,
    pub state: SessionState,
    pub last_request: Option<DownloadRequest>,
    /// Epoch of the run that owns `state`.
    #[serde(skip)]
    run: Option<u64>,
}

/// Open sessions keyed by id. Guards against two orchestration runs on one
/// session.
#[derive(Default)]
pub struct SessionTable {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl SessionTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn open(&self, label: impl Into<String>) -> SessionId {
        let id = SessionId::new();
        self.insert(id.clone(), label);
        id
    }

    pub fn insert(&self, id: SessionId, label: impl Into<String>) {
        self.lock().insert(
            id.clone(),
            Session {
                id,
                label: label.into(),
                state: SessionState::Idle,
                last_request: None,
                run: None,
            },
        );
    }

    pub fn remove(&self, id: &SessionId) -> Option<Session> {
        self.lock().remove(id)
    }

    pub fn state(&self, id: &SessionId) -> Option<SessionState> {
        self.lock().get(id).map(|s| s.state)
    }

    /// Hands the session to the run with epoch `run`. Only that run may
    /// change its state from now on.
    pub fn bind_run(&self, id: &SessionId, run: u64) {
        if let Some(session) = self.lock().get_mut(id) {
            session.run = Some(run);
        }
    }

    /// Updates the state on behalf of run `run`. Writes from a run that no
    /// longer owns the session (closed, reopened, superseded) are dropped.
    pub fn set_run_state(&self, id: &SessionId, run: u64, state: SessionState) -> bool {
        let mut sessions = self.lock();
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        if session.run != Some(run) {
            log::debug!("session {id}: ignoring {state:?} from superseded run {run}");
            return false;
        }
        log::debug!("session {id}: {:?} -> {:?}", session.state, state);
        session.state = state;
        true
    }

    /// Moves an idle or finished session to `ResolvingTarget`. Fails with
    /// `SessionBusy` while a run is in flight.
    pub fn try_begin(&self, id: &SessionId, request: &DownloadRequest) -> Result<()> {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownSession(id.to_string()))?;
        if session.state.is_running() {
            return Err(EngineError::SessionBusy(id.to_string()));
        }
        session.state = SessionState::ResolvingTarget;
        session.last_request = Some(request.clone());
        session.run = None;
        Ok(())
    }

    pub fn list(&self) -> Vec<Session> {
        let mut out: Vec<Session> = self.lock().values().cloned().collect();
        out.sort_by(|a, b| a.label.cmp(&b.label).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Sessions with a run in flight, e.g. for a confirm-before-quit prompt.
    pub fn running(&self) -> Vec<Session> {
        self.list()
            .into_iter()
            .filter(|s| s.state.is_running())
            .collect()
    }
}
