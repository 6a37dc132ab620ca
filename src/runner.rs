//! Runs one external tool for a session: spawn through the registry, stream
//! output lines to a callback, poll cancellation, unregister on exit.

use crate::config::Preferences;
use crate::paths::ToolPaths;
use crate::process::{ExitStatus, ProcessLauncher};
use crate::registry::CancelToken;
use crate::ytdlp::CookieSource;
use crate::{EngineError, Result};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(200);
// Output still buffered in the pipes after exit.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const STDERR_TAIL_LINES: usize = 200;

/// What every tool invocation needs: how to launch, where the tools live,
/// and the user's preferences.
#[derive(Clone)]
pub struct ToolContext {
    pub launcher: Arc<dyn ProcessLauncher>,
    pub tools: ToolPaths,
    pub prefs: Preferences,
}

impl ToolContext {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, tools: ToolPaths, prefs: Preferences) -> Self {
        Self {
            launcher,
            tools,
            prefs,
        }
    }

    /// Cookie source for a run; `cookie_file` overrides the preferences.
    pub fn cookie_source(&self, cookie_file: Option<&Path>) -> CookieSource {
        let preferred = self.prefs.cookies_file();
        let file = cookie_file.or(preferred.as_deref());
        CookieSource::pick(file, self.prefs.cookie_browser())
    }

    pub fn run_yt_dlp(
        &self,
        token: &CancelToken,
        args: &[String],
        on_line: &mut dyn FnMut(Stream, &str),
    ) -> Result<ToolOutput> {
        run_tool(
            token,
            self.launcher.as_ref(),
            &self.tools.yt_dlp,
            args,
            on_line,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    /// Last lines of stderr, newline-joined.
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

pub fn run_tool(
    token: &CancelToken,
    launcher: &dyn ProcessLauncher,
    program: &Path,
    args: &[String],
    on_line: &mut dyn FnMut(Stream, &str),
) -> Result<ToolOutput> {
    token.check()?;
    let registry = token.registry();
    let launched = registry.spawn(token, launcher, program, args)?;
    let process = launched.process;
    let pid = process.id();

    let (tx, rx) = mpsc::channel::<(Stream, String)>();
    spawn_reader(launched.stdout, Stream::Stdout, tx.clone());
    spawn_reader(launched.stderr, Stream::Stderr, tx);

    let mut stderr_tail: VecDeque<String> = VecDeque::new();
    let mut killed = false;
    let mut readers_done = false;

    let mut deliver = |stream: Stream, line: String, killed: bool| {
        if stream == Stream::Stderr {
            if stderr_tail.len() == STDERR_TAIL_LINES {
                stderr_tail.pop_front();
            }
            stderr_tail.push_back(line.clone());
        }
        if !killed {
            on_line(stream, &line);
        }
    };

    let status = loop {
        if !readers_done {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok((stream, line)) => {
                    if stream == Stream::Stdout && !killed && token.is_cancelled() {
                        process.kill_tree();
                        killed = true;
                    }
                    deliver(stream, line, killed);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => readers_done = true,
            }
        } else {
            thread::sleep(POLL_INTERVAL);
        }

        if !killed && token.is_cancelled() {
            process.kill_tree();
            killed = true;
        }

        match process.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(err) => {
                process.kill_tree();
                registry.unregister_process(token.session(), pid);
                return Err(EngineError::Io(err));
            }
        }
    };

    if !readers_done {
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match rx.recv_timeout(remaining) {
                Ok((stream, line)) => deliver(stream, line, killed),
                Err(_) => break,
            }
        }
    }

    registry.unregister_process(token.session(), pid);

    if killed || token.is_cancelled() {
        log::info!("session {}: process {pid} ended after cancel", token.session());
        return Err(EngineError::Canceled);
    }

    Ok(ToolOutput {
        status,
        stderr: stderr_tail.into_iter().collect::<Vec<_>>().join("\n"),
    })
}

fn spawn_reader(source: Box<dyn Read + Send>, stream: Stream, tx: Sender<(Stream, String)>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\r', '\n']);
                    if line.trim().is_empty() {
                        continue;
                    }
                    if tx.send((stream, line.to_string())).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProcessRegistry;
    use crate::session::SessionId;

    #[cfg(unix)]
    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[cfg(unix)]
    #[test]
    fn streams_lines_and_collects_stderr_tail() {
        use crate::process::SystemLauncher;

        let registry = ProcessRegistry::new();
        let session = SessionId::from("runner");
        let token = registry.begin_run(&session);
        let mut seen = Vec::new();

        let output = run_tool(
            &token,
            &SystemLauncher,
            Path::new("sh"),
            &sh("echo one; echo two; echo oops >&2; exit 2"),
            &mut |stream, line| seen.push((stream, line.to_string())),
        )
        .expect("run");

        assert_eq!(output.status.code, Some(2));
        assert_eq!(output.stderr, "oops");
        assert!(seen.contains(&(Stream::Stdout, "one".to_string())));
        assert!(seen.contains(&(Stream::Stdout, "two".to_string())));
        assert_eq!(registry.active_process_id(&session), None);
    }

    #[cfg(unix)]
    #[test]
    fn cancel_kills_running_process_promptly() {
        use crate::process::SystemLauncher;

        let registry = ProcessRegistry::new();
        let session = SessionId::from("runner");
        let token = registry.begin_run(&session);

        let canceller = {
            let registry = registry.clone();
            let session = session.clone();
            thread::spawn(move || {
                let started = Instant::now();
                while registry.active_process_id(&session).is_none() {
                    assert!(started.elapsed() < Duration::from_secs(10));
                    thread::sleep(Duration::from_millis(10));
                }
                registry.request_cancel(&session);
            })
        };

        let started = Instant::now();
        let err = run_tool(
            &token,
            &SystemLauncher,
            Path::new("sh"),
            &sh("sleep 30"),
            &mut |_, _| {},
        )
        .err()
        .expect("cancelled");
        canceller.join().expect("canceller");

        assert!(err.is_cancellation());
        assert!(started.elapsed() < Duration::from_secs(15));
        assert_eq!(registry.active_process_id(&session), None);
    }

    #[test]
    fn cancelled_token_spawns_nothing() {
        struct PanicLauncher;
        impl ProcessLauncher for PanicLauncher {
            fn launch(
                &self,
                _program: &Path,
                _args: &[String],
            ) -> std::io::Result<crate::process::LaunchedProcess> {
                panic!("must not launch");
            }
        }

        let registry = ProcessRegistry::new();
        let session = SessionId::from("runner");
        let token = registry.begin_run(&session);
        registry.request_cancel(&session);
        let err = run_tool(&token, &PanicLauncher, Path::new("yt-dlp"), &[], &mut |_, _| {})
            .err()
            .expect("cancelled");
        assert!(err.is_cancellation());
    }
}
