//! Per-session process handles and cancellation state.
//!
//! Every tool run for a session is spawned through [`ProcessRegistry::spawn`],
//! which launches and registers the process under one lock. A cancel request
//! can therefore never land between "process started" and "process known".
//!
//! Cancellation is tracked per run epoch. [`ProcessRegistry::begin_run`] takes
//! a fresh epoch from a registry-wide counter and hands out a [`CancelToken`];
//! a token goes stale as soon as a newer run begins, so a slow continuation
//! from an old run can't treat the reset flag as permission to keep working.
//! Epochs never repeat, not even after a session is removed and its id
//! reused.

use crate::process::{LaunchedProcess, ProcessLauncher, ToolProcess};
use crate::session::SessionId;
use crate::{EngineError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// How long [`ProcessRegistry::cancel_and_settle`] waits for a killed process
/// to unwind before clearing the flag.
pub const CANCEL_GRACE_PERIOD: Duration = Duration::from_millis(500);

const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Default)]
struct Slot {
    handle: Option<Arc<dyn ToolProcess>>,
    cancel_requested: bool,
    epoch: u64,
}

#[derive(Default)]
pub struct ProcessRegistry {
    slots: Mutex<HashMap<SessionId, Slot>>,
    last_epoch: AtomicU64,
}

impl ProcessRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Slot>> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_epoch(&self) -> u64 {
        self.last_epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Starts a new run for `session`: clears the cancel flag and invalidates
    /// every token handed out before.
    pub fn begin_run(self: &Arc<Self>, session: &SessionId) -> CancelToken {
        let mut slots = self.lock();
        let slot = slots.entry(session.clone()).or_default();
        slot.epoch = self.next_epoch();
        slot.cancel_requested = false;
        CancelToken {
            registry: Arc::clone(self),
            session: session.clone(),
            epoch: slot.epoch,
        }
    }

    /// Launches `program` for the token's session and registers the handle
    /// atomically.
    pub fn spawn(
        &self,
        token: &CancelToken,
        launcher: &dyn ProcessLauncher,
        program: &Path,
        args: &[String],
    ) -> Result<LaunchedProcess> {
        let mut slots = self.lock();
        let slot = slots.entry(token.session.clone()).or_default();
        if slot.cancel_requested || slot.epoch != token.epoch {
            return Err(EngineError::Canceled);
        }
        if let Some(existing) = slot.handle.as_ref() {
            if matches!(existing.try_wait(), Ok(None)) {
                return Err(EngineError::SessionBusy(token.session.to_string()));
            }
        }

        let launched = launcher.launch(program, args).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::ExternalToolMissing {
                tool: tool_name(program),
            },
            _ => EngineError::Io(e),
        })?;
        slot.handle = Some(Arc::clone(&launched.process));
        log::debug!(
            "session {}: spawned {} (pid {})",
            token.session,
            tool_name(program),
            launched.process.id()
        );
        Ok(launched)
    }

    /// Stores a handle started elsewhere. Overwrites any prior handle; a
    /// still-running prior process is no longer killable through the registry.
    pub fn register(&self, session: &SessionId, handle: Arc<dyn ToolProcess>) {
        let mut slots = self.lock();
        let slot = slots.entry(session.clone()).or_default();
        if let Some(prior) = slot.handle.as_ref() {
            if matches!(prior.try_wait(), Ok(None)) {
                log::warn!(
                    "session {session}: replacing live process {} with {}",
                    prior.id(),
                    handle.id()
                );
            }
        }
        slot.handle = Some(handle);
    }

    pub fn unregister(&self, session: &SessionId) {
        if let Some(slot) = self.lock().get_mut(session) {
            slot.handle = None;
        }
    }

    /// Drops the handle only when it is still the process identified by
    /// `pid`, so a finished run can't unregister its successor.
    pub(crate) fn unregister_process(&self, session: &SessionId, pid: u32) {
        if let Some(slot) = self.lock().get_mut(session) {
            if slot.handle.as_ref().map(|h| h.id()) == Some(pid) {
                slot.handle = None;
            }
        }
    }

    /// Sets the cancel flag and kills the session's process tree, if any.
    /// Succeeds for unknown sessions and when nothing is running.
    pub fn request_cancel(&self, session: &SessionId) {
        let handle = {
            let mut slots = self.lock();
            let slot = slots.entry(session.clone()).or_default();
            slot.cancel_requested = true;
            slot.handle.clone()
        };
        if let Some(handle) = handle {
            log::info!("session {session}: killing process tree {}", handle.id());
            handle.kill_tree();
        }
    }

    pub fn is_cancelled(&self, session: &SessionId) -> bool {
        self.lock()
            .get(session)
            .map(|slot| slot.cancel_requested)
            .unwrap_or(false)
    }

    pub fn clear_cancel(&self, session: &SessionId) {
        if let Some(slot) = self.lock().get_mut(session) {
            slot.cancel_requested = false;
        }
    }

    pub fn active_process_id(&self, session: &SessionId) -> Option<u32> {
        self.lock()
            .get(session)
            .and_then(|slot| slot.handle.as_ref().map(|h| h.id()))
    }

    /// Cancels, waits up to `grace` for the process handle to be released,
    /// then clears the flag unless a new run started in the meantime.
    /// Returns whether the session unwound within the grace period.
    pub fn cancel_and_settle(&self, session: &SessionId, grace: Duration) -> bool {
        self.request_cancel(session);
        let epoch = self.lock().get(session).map(|slot| slot.epoch);

        let started = Instant::now();
        let mut settled = false;
        while started.elapsed() < grace {
            if self.active_process_id(session).is_none() {
                settled = true;
                break;
            }
            thread::sleep(SETTLE_POLL_INTERVAL);
        }

        let mut slots = self.lock();
        if let Some(slot) = slots.get_mut(session) {
            if Some(slot.epoch) == epoch {
                slot.cancel_requested = false;
                // Stale continuations of this run must still see a cancel.
                slot.epoch = self.next_epoch();
            }
        }
        settled
    }

    /// Cancels and forgets the session. Outstanding tokens report cancelled.
    pub fn remove_session(&self, session: &SessionId) {
        self.request_cancel(session);
        self.lock().remove(session);
    }
}

fn tool_name(program: &Path) -> String {
    program
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string_lossy().to_string())
}

/// Cooperative cancellation handle for one run of one session.
#[derive(Clone)]
pub struct CancelToken {
    registry: Arc<ProcessRegistry>,
    session: SessionId,
    epoch: u64,
}

impl CancelToken {
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Run identifier, unique across the registry.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_cancelled(&self) -> bool {
        match self.registry.lock().get(&self.session) {
            Some(slot) => slot.cancel_requested || slot.epoch != self.epoch,
            None => true,
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(EngineError::Canceled);
        }
        Ok(())
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("session", &self.session)
            .field("epoch", &self.epoch)
            .finish()
    }
}
