//! Session download orchestration.
//!
//! One run per session at a time: resolve the target, enumerate collections,
//! verify resolutions (asking the user when needed), then download item by
//! item, in chunks, or in one invocation. Every step re-checks the run's
//! [`CancelToken`].

use crate::batch::{self, CHUNK_SIZE, LARGE_COLLECTION_THRESHOLD};
use crate::config;
use crate::events::{
    DecisionPrompt, InaccessibleContext, InaccessibleDecision, JsonlSessionLog,
    LowerResolutionContext, LowerResolutionDecision, SessionSink,
};
use crate::executor;
use crate::paths::AppPaths;
use crate::playlist::{self, CollectionItem};
use crate::probe::{self, Verification};
use crate::process::SystemLauncher;
use crate::classify::ErrorKind;
use crate::registry::{CancelToken, ProcessRegistry, CANCEL_GRACE_PERIOD};
use crate::runner::ToolContext;
use crate::session::{
    resolution_label, DownloadRequest, Session, SessionId, SessionState, SessionTable,
};
use crate::ytdlp::{CookieSource, PlaylistScope};
use crate::{EngineError, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Downloads refuse to start with less free space than this at the
/// destination.
pub const MIN_FREE_SPACE_BYTES: u64 = 500 * 1024 * 1024;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Cancelled,
    Failed,
}

impl Outcome {
    fn state(self) -> SessionState {
        match self {
            Outcome::Completed => SessionState::Completed,
            Outcome::Cancelled => SessionState::Cancelled,
            Outcome::Failed => SessionState::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadSummary {
    pub outcome: Outcome,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed_chunks: usize,
    pub total: usize,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    #[serde(flatten)]
    pub session: Session,
    pub active_process_id: Option<u32>,
}

#[derive(Debug, Default)]
struct Tally {
    downloaded: usize,
    skipped: usize,
    failed_chunks: usize,
    total: usize,
}

pub struct Orchestrator {
    registry: Arc<ProcessRegistry>,
    sessions: SessionTable,
    ctx: ToolContext,
    sink: Arc<dyn SessionSink>,
    prompt: Arc<dyn DecisionPrompt>,
    min_free_bytes: u64,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ProcessRegistry>,
        ctx: ToolContext,
        sink: Arc<dyn SessionSink>,
        prompt: Arc<dyn DecisionPrompt>,
    ) -> Self {
        Self {
            registry,
            sessions: SessionTable::default(),
            ctx,
            sink,
            prompt,
            min_free_bytes: MIN_FREE_SPACE_BYTES,
        }
    }

    pub fn with_min_free_space(mut self, bytes: u64) -> Self {
        self.min_free_bytes = bytes;
        self
    }

    /// Real tools and saved preferences under `paths`, session logs as JSONL.
    pub fn from_paths(paths: &AppPaths, prompt: Arc<dyn DecisionPrompt>) -> Result<Self> {
        let prefs = config::load_preferences(paths)?;
        let ctx = ToolContext::new(Arc::new(SystemLauncher), paths.tools(), prefs);
        log::info!(
            "using yt-dlp at {} (ffmpeg: {:?})",
            ctx.tools.yt_dlp.display(),
            ctx.tools.ffmpeg
        );
        Ok(Self::new(
            ProcessRegistry::new(),
            ctx,
            Arc::new(JsonlSessionLog::new(paths)),
            prompt,
        ))
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    pub fn open_session(&self, label: impl Into<String>) -> SessionId {
        self.sessions.open(label)
    }

    /// Registers a session under a host-chosen id.
    pub fn open_session_with_id(&self, id: SessionId, label: impl Into<String>) {
        self.sessions.insert(id, label);
    }

    /// Cancels whatever the session is running and forgets it.
    pub fn close_session(&self, session: &SessionId) {
        self.registry.remove_session(session);
        self.sessions.remove(session);
    }

    pub fn session_state(&self, session: &SessionId) -> Option<SessionState> {
        self.sessions.state(session)
    }

    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .list()
            .into_iter()
            .map(|session| SessionSnapshot {
                active_process_id: self.registry.active_process_id(&session.id),
                session,
            })
            .collect()
    }

    /// Sessions with a download in flight.
    pub fn running_sessions(&self) -> Vec<SessionSnapshot> {
        self.sessions()
            .into_iter()
            .filter(|s| s.session.state.is_running())
            .collect()
    }

    /// Kills the session's process and waits briefly for it to unwind. The
    /// cancelled run stays cancelled; the next start begins clean.
    pub fn cancel(&self, session: &SessionId) {
        if !self.registry.cancel_and_settle(session, CANCEL_GRACE_PERIOD) {
            log::warn!("session {session}: process still running after cancel grace period");
        }
        self.sink.log(session, "Download cancelled");
    }

    /// Runs a download on the calling thread. Errors only when the run
    /// could not start; everything after that is reported in the summary.
    pub fn start_download(
        &self,
        session: &SessionId,
        request: DownloadRequest,
    ) -> Result<DownloadSummary> {
        let token = self.begin(session, &request)?;
        Ok(self.run(&token, &request))
    }

    /// Like [`Orchestrator::start_download`] but on a dedicated thread. The
    /// busy check happens before the thread starts.
    pub fn spawn_download(
        self: &Arc<Self>,
        session: &SessionId,
        request: DownloadRequest,
    ) -> Result<JoinHandle<DownloadSummary>> {
        let token = self.begin(session, &request)?;
        let this = Arc::clone(self);
        thread::Builder::new()
            .name(format!("download-{session}"))
            .spawn(move || this.run(&token, &request))
            .map_err(EngineError::Io)
    }

    fn begin(&self, session: &SessionId, request: &DownloadRequest) -> Result<CancelToken> {
        if request.target_url.trim().is_empty() {
            return Err(EngineError::InvalidRequest("target URL is empty".to_string()));
        }
        self.sessions.try_begin(session, request)?;
        let token = self.registry.begin_run(session);
        self.sessions.bind_run(session, token.epoch());
        Ok(token)
    }

    fn set_state(&self, token: &CancelToken, state: SessionState) -> bool {
        self.sessions
            .set_run_state(token.session(), token.epoch(), state)
    }

    fn run(&self, token: &CancelToken, request: &DownloadRequest) -> DownloadSummary {
        let mut tally = Tally::default();
        let result = self.drive(token, request, &mut tally);
        self.finish(token, tally, result)
    }

    fn drive(&self, token: &CancelToken, request: &DownloadRequest, tally: &mut Tally) -> Result<()> {
        let session = token.session();
        let base = self.destination(request)?;
        std::fs::create_dir_all(&base)?;
        self.check_free_space(token, &base)?;
        token.check()?;

        let url = request.target_url.trim();
        if playlist::is_collection_url(url) && !request.ignore_collection {
            self.download_collection(token, request, url, &base, tally)
        } else {
            self.sink.log(session, &format!("Starting download: {url}"));
            self.download_single(token, request, url, &base, tally)
        }
    }

    fn destination(&self, request: &DownloadRequest) -> Result<PathBuf> {
        request
            .destination_directory
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .or_else(|| self.ctx.prefs.default_download_dir())
            .ok_or_else(|| {
                EngineError::InvalidRequest(
                    "no destination directory and no default download path configured".to_string(),
                )
            })
    }

    fn check_free_space(&self, token: &CancelToken, dir: &Path) -> Result<()> {
        let available = match fs2::available_space(dir) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::warn!("could not read free space at {}: {err}", dir.display());
                return Ok(());
            }
        };
        let free_gb = available as f64 / GIB;
        if available < self.min_free_bytes {
            self.sink.log(
                token.session(),
                &format!("Not enough disk space: {free_gb:.2} GB available."),
            );
            return Err(EngineError::Classified {
                kind: ErrorKind::DiskFull,
                detail: format!(
                    "{free_gb:.2} GB available at {}, at least {:.2} GB required",
                    dir.display(),
                    self.min_free_bytes as f64 / GIB
                ),
            });
        }
        self.sink
            .log(token.session(), &format!("Free space: {free_gb:.2} GB"));
        Ok(())
    }

    fn collection_destination(&self, request: &DownloadRequest, base: &Path) -> Result<PathBuf> {
        let folder = request
            .collection_folder_name
            .as_deref()
            .map(sanitize_folder_name)
            .filter(|name| !name.is_empty() && !self.ctx.prefs.no_playlist_folder);
        let dest = match folder {
            Some(name) => base.join(name),
            None => base.to_path_buf(),
        };
        std::fs::create_dir_all(&dest)?;
        Ok(dest)
    }

    fn cookies(&self, request: &DownloadRequest) -> CookieSource {
        self.ctx
            .cookie_source(request.cookie_file().map(|p| p.as_path()))
    }

    fn download_collection(
        &self,
        token: &CancelToken,
        request: &DownloadRequest,
        url: &str,
        base: &Path,
        tally: &mut Tally,
    ) -> Result<()> {
        let session = token.session();
        self.set_state(token, SessionState::EnumeratingPlaylist);
        self.sink.log(session, "Reading collection...");

        let limit = self.ctx.prefs.effective_playlist_limit();
        let items = playlist::enumerate(&self.ctx, token, url, limit, &self.cookies(request))?;
        tally.total = items.len();
        if items.is_empty() {
            self.sink.log(session, "The collection has no downloadable items.");
            return Ok(());
        }
        self.sink
            .log(session, &format!("Found {} items", items.len()));
        let dest = self.collection_destination(request, base)?;

        if let Some(height) = request.strict_height() {
            return self.download_verified(token, request, &items, height, &dest, tally);
        }

        self.set_state(token, SessionState::Downloading);
        if items.len() > LARGE_COLLECTION_THRESHOLD {
            let sink = self.sink.as_ref();
            let report = batch::run_chunks(token, items.len(), CHUNK_SIZE, sink, &mut |chunk| {
                let scope = PlaylistScope::Window {
                    start: chunk.start_index,
                    end: chunk.end_index,
                };
                executor::download_target(&self.ctx, token, sink, url, request, &dest, scope)
            })?;
            tally.downloaded = report.completed_items(items.len());
            tally.skipped = items.len() - tally.downloaded;
            tally.failed_chunks = report.failed_chunks.len();
            return Ok(());
        }

        executor::download_target(
            &self.ctx,
            token,
            self.sink.as_ref(),
            url,
            request,
            &dest,
            PlaylistScope::Capped(limit),
        )?;
        tally.downloaded = items.len();
        Ok(())
    }

    fn download_verified(
        &self,
        token: &CancelToken,
        request: &DownloadRequest,
        items: &[CollectionItem],
        height: u32,
        dest: &Path,
        tally: &mut Tally,
    ) -> Result<()> {
        let session = token.session();
        let cookies = self.cookies(request);
        let total = items.len();

        for (idx, item) in items.iter().enumerate() {
            token.check()?;
            let position = Some((idx + 1, total));
            self.sink.log(
                session,
                &format!("[{}/{total}] Checking {}", idx + 1, item.title),
            );

            self.set_state(token, SessionState::ProbingResolution);
            let verification = match probe::verify(&self.ctx, token, &item.resolved_url, height, &cookies) {
                Ok(v) => v,
                Err(err) if err.aborts_session() => return Err(err),
                Err(err) => {
                    self.sink
                        .log(session, &format!("Skipping {}: {err}", item.title));
                    tally.skipped += 1;
                    continue;
                }
            };

            let Some(allow_lower) =
                self.decide(token, verification, &item.title, &item.resolved_url, height, position)?
            else {
                self.sink.log(session, &format!("Skipped {}", item.title));
                tally.skipped += 1;
                continue;
            };

            self.set_state(token, SessionState::Downloading);
            let mut item_request = request.clone();
            item_request.allow_lower_resolution = allow_lower;
            match executor::download_one(
                &self.ctx,
                token,
                self.sink.as_ref(),
                &item.resolved_url,
                &item_request,
                dest,
            ) {
                Ok(()) => tally.downloaded += 1,
                Err(err) if err.aborts_session() => return Err(err),
                Err(err) => {
                    log::warn!("session {session}: item {} failed: {err}", item.item_id);
                    self.sink
                        .log(session, &format!("Failed to download {}: {err}", item.title));
                    tally.skipped += 1;
                }
            }
        }
        Ok(())
    }

    fn download_single(
        &self,
        token: &CancelToken,
        request: &DownloadRequest,
        url: &str,
        dest: &Path,
        tally: &mut Tally,
    ) -> Result<()> {
        tally.total = 1;
        let mut request = request.clone();

        if let Some(height) = request.strict_height() {
            self.set_state(token, SessionState::ProbingResolution);
            let verification = probe::verify(&self.ctx, token, url, height, &self.cookies(&request))?;
            match self.decide(token, verification, url, url, height, None)? {
                Some(allow_lower) => request.allow_lower_resolution = allow_lower,
                None => {
                    tally.skipped = 1;
                    return Err(EngineError::Canceled);
                }
            }
        }

        self.set_state(token, SessionState::Downloading);
        executor::download_one(&self.ctx, token, self.sink.as_ref(), url, &request, dest)?;
        tally.downloaded = 1;
        Ok(())
    }

    /// Turns a verification into "download, with or without fallback" or
    /// "skip". Cancel-all and a cancel that arrived while the prompt was open
    /// both surface as `Canceled`.
    fn decide(
        &self,
        token: &CancelToken,
        verification: Verification,
        title: &str,
        url: &str,
        height: u32,
        position: Option<(usize, usize)>,
    ) -> Result<Option<bool>> {
        let session = token.session();
        let allow_lower = match verification {
            Verification::Exact(_) => {
                self.sink.log(
                    session,
                    &format!("{} available, downloading", resolution_label(height)),
                );
                return Ok(Some(false));
            }
            Verification::Lower(available) => {
                self.sink.log(
                    session,
                    &format!(
                        "{} not available for {title}; best is {}",
                        resolution_label(height),
                        resolution_label(available)
                    ),
                );
                let decision = self.prompt.confirm_lower_resolution(&LowerResolutionContext {
                    session: session.clone(),
                    title: title.to_string(),
                    url: url.to_string(),
                    requested_height: height,
                    available_height: available,
                    position,
                });
                token.check()?;
                match decision {
                    LowerResolutionDecision::DownloadLower => Some(true),
                    LowerResolutionDecision::Skip => None,
                    LowerResolutionDecision::CancelAll => return Err(EngineError::Canceled),
                }
            }
            Verification::Inaccessible => {
                self.sink
                    .log(session, &format!("Could not verify {title}"));
                let decision = self.prompt.resolve_inaccessible(&InaccessibleContext {
                    session: session.clone(),
                    title: title.to_string(),
                    url: url.to_string(),
                    position,
                });
                token.check()?;
                match decision {
                    InaccessibleDecision::Retry => Some(true),
                    InaccessibleDecision::Skip => None,
                    InaccessibleDecision::CancelAll => return Err(EngineError::Canceled),
                }
            }
        };
        Ok(allow_lower)
    }

    fn finish(&self, token: &CancelToken, tally: Tally, result: Result<()>) -> DownloadSummary {
        let session = token.session();
        let (outcome, message) = match result {
            Ok(()) if tally.total == 0 => (Outcome::Completed, "Nothing to download.".to_string()),
            Ok(()) if tally.failed_chunks > 0 || tally.skipped > 0 => (
                Outcome::Completed,
                format!(
                    "Finished with problems: {} of {} downloaded, {} skipped, {} failed chunk(s).",
                    tally.downloaded, tally.total, tally.skipped, tally.failed_chunks
                ),
            ),
            Ok(()) => (
                Outcome::Completed,
                format!("Download complete: {} of {} items.", tally.downloaded, tally.total),
            ),
            Err(err) if err.is_cancellation() => (
                Outcome::Cancelled,
                format!(
                    "Download stopped. {} item(s) already downloaded were kept.",
                    tally.downloaded
                ),
            ),
            Err(err) => {
                log::error!("session {session}: download failed: {err}");
                let message = match err.remediation() {
                    Some(hint) => format!("Download failed: {err}. {hint}"),
                    None => format!("Download failed: {err}"),
                };
                (Outcome::Failed, message)
            }
        };

        // A run whose tab was closed (or reused) reports nothing to it.
        if self.set_state(token, outcome.state()) {
            self.sink.log(session, &message);
        }
        log::info!("session {session}: {outcome:?} ({} of {})", tally.downloaded, tally.total);
        DownloadSummary {
            outcome,
            downloaded: tally.downloaded,
            skipped: tally.skipped,
            failed_chunks: tally.failed_chunks,
            total: tally.total,
            message,
        }
    }
}

fn sanitize_folder_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim_end_matches(['.', ' '])
        .to_string()
}
